use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::EntityId;

/// Scalar attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Scalar {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<u64> for Scalar {
    fn from(i: u64) -> Self {
        // GitHub ids stay far below i64::MAX; reinterpret bits like the SQLite layer does.
        #[allow(clippy::cast_possible_wrap)]
        Self::Int(i as i64)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// `[identity-attribute, identity-value]` — a reference by identity, not by handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Lookup {
    pub attr: String,
    pub value: Scalar,
}

impl Lookup {
    pub fn new(attr: impl Into<String>, value: impl Into<Scalar>) -> Self {
        Self {
            attr: attr.into(),
            value: value.into(),
        }
    }
}

impl std::fmt::Display for Lookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} {}]", self.attr, self.value)
    }
}

/// Target of a reference attribute in a candidate fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityRef {
    /// Resolve (or stub) by identity.
    Lookup(Lookup),
    /// Already-resolved internal handle.
    Id(EntityId),
}

impl From<Lookup> for EntityRef {
    fn from(l: Lookup) -> Self {
        Self::Lookup(l)
    }
}

impl From<EntityId> for EntityRef {
    fn from(id: EntityId) -> Self {
        Self::Id(id)
    }
}

/// Value side of a candidate fact. `Null` entries are dropped before merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactValue {
    Null,
    Scalar(Scalar),
    Ref(EntityRef),
    Many(Vec<FactValue>),
}

impl FactValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

macro_rules! scalar_fact_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for FactValue {
                fn from(v: $ty) -> Self {
                    Self::Scalar(v.into())
                }
            }
        )*
    };
}

scalar_fact_value!(&str, String, i64, u64, bool);

impl From<Scalar> for FactValue {
    fn from(s: Scalar) -> Self {
        Self::Scalar(s)
    }
}

impl From<Lookup> for FactValue {
    fn from(l: Lookup) -> Self {
        Self::Ref(EntityRef::Lookup(l))
    }
}

impl From<EntityId> for FactValue {
    fn from(id: EntityId) -> Self {
        Self::Ref(EntityRef::Id(id))
    }
}

impl From<Vec<Lookup>> for FactValue {
    fn from(lookups: Vec<Lookup>) -> Self {
        Self::Many(lookups.into_iter().map(Self::from).collect())
    }
}

/// A candidate fact: attribute → value, merged into one entity by identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fact {
    attrs: BTreeMap<String, FactValue>,
}

impl Fact {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, attr: &str, value: impl Into<FactValue>) -> Self {
        self.insert(attr, value);
        self
    }

    /// Insert only when `value` is present; `None` leaves the attribute out.
    #[must_use]
    pub fn with_opt<V: Into<FactValue>>(mut self, attr: &str, value: Option<V>) -> Self {
        if let Some(v) = value {
            self.insert(attr, v);
        }
        self
    }

    pub fn insert(&mut self, attr: &str, value: impl Into<FactValue>) {
        self.attrs.insert(attr.to_string(), value.into());
    }

    pub fn get(&self, attr: &str) -> Option<&FactValue> {
        self.attrs.get(attr)
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FactValue)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl IntoIterator for Fact {
    type Item = (String, FactValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, FactValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.attrs.into_iter()
    }
}

impl From<Lookup> for Fact {
    /// Stub fact holding only an identity attribute.
    fn from(l: Lookup) -> Self {
        let mut fact = Self::new();
        fact.insert(&l.attr, l.value);
        fact
    }
}

// ── Stored entities ────────────────────────────────────────────────

/// One committed value: a scalar or a resolved entity handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Datum {
    Scalar(Scalar),
    Ref(EntityId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    One(Datum),
    Many(BTreeSet<Datum>),
}

/// A committed entity and all of its attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub id: EntityId,
    pub attrs: BTreeMap<String, AttrValue>,
}

impl Entity {
    pub(crate) fn new(id: EntityId) -> Self {
        Self {
            id,
            attrs: BTreeMap::new(),
        }
    }

    pub fn get(&self, attr: &str) -> Option<&AttrValue> {
        self.attrs.get(attr)
    }

    pub fn scalar(&self, attr: &str) -> Option<&Scalar> {
        match self.attrs.get(attr)? {
            AttrValue::One(Datum::Scalar(s)) => Some(s),
            _ => None,
        }
    }

    pub fn str(&self, attr: &str) -> Option<&str> {
        self.scalar(attr).and_then(Scalar::as_str)
    }

    pub fn int(&self, attr: &str) -> Option<i64> {
        self.scalar(attr).and_then(Scalar::as_int)
    }

    pub fn bool(&self, attr: &str) -> Option<bool> {
        self.scalar(attr).and_then(Scalar::as_bool)
    }

    /// Target of a cardinality-one reference attribute.
    pub fn reference(&self, attr: &str) -> Option<EntityId> {
        match self.attrs.get(attr)? {
            AttrValue::One(Datum::Ref(id)) => Some(*id),
            _ => None,
        }
    }

    /// Targets of a reference attribute, whatever its cardinality.
    pub fn references(&self, attr: &str) -> Vec<EntityId> {
        match self.attrs.get(attr) {
            Some(AttrValue::One(Datum::Ref(id))) => vec![*id],
            Some(AttrValue::Many(set)) => set
                .iter()
                .filter_map(|d| match d {
                    Datum::Ref(id) => Some(*id),
                    Datum::Scalar(_) => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn refers_to(&self, attr: &str, target: EntityId) -> bool {
        match self.attrs.get(attr) {
            Some(AttrValue::One(Datum::Ref(id))) => *id == target,
            Some(AttrValue::Many(set)) => set.contains(&Datum::Ref(target)),
            _ => false,
        }
    }

    /// Attribute namespace (`user`, `issue`, ...) taken from the first attribute.
    pub fn kind(&self) -> Option<&str> {
        let attr = self.attrs.keys().next()?;
        attr.trim_start_matches(':').split_once('/').map(|(ns, _)| ns)
    }

    /// JSON rendering for consumers; references render as `{"db/id": n}`.
    pub fn to_json(&self) -> serde_json::Value {
        fn datum(d: &Datum) -> serde_json::Value {
            match d {
                Datum::Scalar(s) => serde_json::to_value(s).unwrap_or(serde_json::Value::Null),
                Datum::Ref(id) => serde_json::json!({ "db/id": id.0 }),
            }
        }

        let mut map = serde_json::Map::new();
        map.insert("db/id".to_string(), serde_json::json!(self.id.0));
        for (attr, value) in &self.attrs {
            let rendered = match value {
                AttrValue::One(d) => datum(d),
                AttrValue::Many(set) => serde_json::Value::Array(set.iter().map(datum).collect()),
            };
            map.insert(attr.clone(), rendered);
        }
        serde_json::Value::Object(map)
    }
}
