use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::SchemaViolation;
use crate::types::EntityId;

use super::schema::{AttrSpec, Schema, ValueType};
use super::value::{AttrValue, Datum, Entity, EntityRef, Fact, FactValue, Lookup, Scalar};

/// Capacity of the change channel. Lagging subscribers only miss duplicates
/// of a payload-free signal, so a small buffer is enough.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Fired once per transact that applied at least one fact. Consumers re-query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreChanged;

/// Outcome of one `transact` call.
#[derive(Debug, Default)]
pub struct TxReport {
    /// Entity each applied fact resolved to, in batch order.
    pub entities: Vec<EntityId>,
    /// Rejected facts as `(batch index, reason)`.
    pub violations: Vec<(usize, SchemaViolation)>,
}

impl TxReport {
    pub fn applied(&self) -> usize {
        self.entities.len()
    }

    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Counts of entities by attribute namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactStats {
    pub total_entities: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub basis_tx: u64,
}

/// An immutable database value. Snapshots are cheap `Arc` clones.
#[derive(Debug, Clone)]
pub struct Db {
    schema: Arc<Schema>,
    next_id: u64,
    basis_tx: u64,
    pub(super) entities: BTreeMap<EntityId, Entity>,
    identity: HashMap<Lookup, EntityId>,
}

/// Validated, resolved form of one fact. Building a plan never mutates.
struct Plan {
    target: Option<EntityId>,
    writes: Vec<(String, AttrSpec, Vec<FactValue>)>,
}

impl Db {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema: Arc::new(schema),
            next_id: 1,
            basis_tx: 0,
            entities: BTreeMap::new(),
            identity: HashMap::new(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Number of committed transactions this value reflects.
    pub fn basis_tx(&self) -> u64 {
        self.basis_tx
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Resolve an identity lookup to its entity handle.
    pub fn resolve(&self, lookup: &Lookup) -> Option<EntityId> {
        self.identity.get(lookup).copied()
    }

    pub fn resolve_ref(&self, target: &EntityRef) -> Option<EntityId> {
        match target {
            EntityRef::Lookup(l) => self.resolve(l),
            EntityRef::Id(id) => self.entities.contains_key(id).then_some(*id),
        }
    }

    /// Entity addressed by an identity lookup.
    pub fn pull(&self, lookup: &Lookup) -> Option<&Entity> {
        self.resolve(lookup).and_then(|id| self.entities.get(&id))
    }

    pub fn stats(&self) -> FactStats {
        let mut by_kind = BTreeMap::new();
        for entity in self.entities.values() {
            if let Some(kind) = entity.kind() {
                *by_kind.entry(kind.to_string()).or_insert(0) += 1;
            }
        }
        FactStats {
            total_entities: self.entities.len(),
            by_kind,
            basis_tx: self.basis_tx,
        }
    }

    /// Validate and apply one fact. On error nothing has been modified.
    fn apply(&mut self, fact: Fact) -> Result<EntityId, SchemaViolation> {
        let plan = self.plan(fact)?;
        Ok(self.commit(plan))
    }

    fn plan(&self, fact: Fact) -> Result<Plan, SchemaViolation> {
        let mut target: Option<(Lookup, EntityId)> = None;
        let mut has_identity = false;
        let mut writes = Vec::new();

        for (attr, value) in fact {
            let Some(spec) = self.schema.get(&attr).copied() else {
                return Err(SchemaViolation::UnknownAttribute(attr));
            };

            let values: Vec<FactValue> = match value {
                FactValue::Null => continue,
                FactValue::Many(vs) => vs.into_iter().filter(|v| !v.is_null()).collect(),
                single => vec![single],
            };
            if values.is_empty() {
                continue;
            }
            if !spec.is_many() && values.len() > 1 {
                return Err(SchemaViolation::CardinalityMismatch(attr));
            }

            for v in &values {
                self.check_value(&attr, spec, v)?;
            }

            if spec.is_identity() {
                has_identity = true;
                let lookup = match &values[0] {
                    FactValue::Scalar(scalar) => Lookup::new(attr.clone(), scalar.clone()),
                    _ => continue,
                };
                if let Some(&found) = self.identity.get(&lookup) {
                    match &target {
                        None => target = Some((lookup, found)),
                        Some((first, existing)) if *existing != found => {
                            return Err(SchemaViolation::IdentityConflict {
                                first_attr: first.attr.clone(),
                                first_value: first.value.to_string(),
                                first_entity: existing.0,
                                second_attr: lookup.attr,
                                second_value: lookup.value.to_string(),
                                second_entity: found.0,
                            });
                        }
                        Some(_) => {}
                    }
                }
            }

            writes.push((attr, spec, values));
        }

        if !has_identity {
            return Err(SchemaViolation::MissingIdentity);
        }

        Ok(Plan {
            target: target.map(|(_, id)| id),
            writes,
        })
    }

    fn check_value(&self, attr: &str, spec: AttrSpec, value: &FactValue) -> Result<(), SchemaViolation> {
        let mismatch = || SchemaViolation::TypeMismatch {
            attr: attr.to_string(),
            expected: spec.value_type.as_str(),
        };
        match (spec.value_type, value) {
            (ValueType::Scalar, FactValue::Scalar(_)) => Ok(()),
            (ValueType::Ref, FactValue::Ref(EntityRef::Lookup(l))) => match self.schema.get(&l.attr) {
                None => Err(SchemaViolation::UnknownAttribute(l.attr.clone())),
                Some(s) if !s.is_identity() => Err(SchemaViolation::NotIdentity(l.attr.clone())),
                Some(_) => Ok(()),
            },
            (ValueType::Ref, FactValue::Ref(EntityRef::Id(id))) => {
                if self.entities.contains_key(id) {
                    Ok(())
                } else {
                    Err(SchemaViolation::UnknownEntity(id.0))
                }
            }
            (_, FactValue::Many(_)) => Err(SchemaViolation::CardinalityMismatch(attr.to_string())),
            _ => Err(mismatch()),
        }
    }

    fn commit(&mut self, plan: Plan) -> EntityId {
        let id = plan.target.unwrap_or_else(|| self.allocate());

        // Identity attributes first, so lookups later in the same fact can
        // resolve to this entity instead of creating a stub.
        let (identities, others): (Vec<_>, Vec<_>) = plan
            .writes
            .into_iter()
            .partition(|(_, spec, _)| spec.is_identity());

        for (attr, _, values) in identities {
            let Some(FactValue::Scalar(scalar)) = values.into_iter().next() else {
                continue;
            };
            self.bind_identity(id, attr, scalar);
        }

        for (attr, spec, values) in others {
            let data: Vec<Datum> = values
                .into_iter()
                .filter_map(|v| self.to_datum(v))
                .collect();
            let entity = self.entities.entry(id).or_insert_with(|| Entity::new(id));
            if spec.is_many() {
                match entity.attrs.entry(attr) {
                    std::collections::btree_map::Entry::Occupied(mut slot) => {
                        if let AttrValue::Many(set) = slot.get_mut() {
                            set.extend(data);
                        } else {
                            slot.insert(AttrValue::Many(data.into_iter().collect()));
                        }
                    }
                    std::collections::btree_map::Entry::Vacant(slot) => {
                        slot.insert(AttrValue::Many(data.into_iter().collect::<BTreeSet<_>>()));
                    }
                }
            } else if let Some(datum) = data.into_iter().next() {
                entity.attrs.insert(attr, AttrValue::One(datum));
            }
        }

        id
    }

    fn to_datum(&mut self, value: FactValue) -> Option<Datum> {
        match value {
            FactValue::Scalar(s) => Some(Datum::Scalar(s)),
            FactValue::Ref(EntityRef::Id(id)) => Some(Datum::Ref(id)),
            FactValue::Ref(EntityRef::Lookup(l)) => Some(Datum::Ref(self.resolve_or_stub(l))),
            FactValue::Null | FactValue::Many(_) => None,
        }
    }

    fn allocate(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        self.entities.insert(id, Entity::new(id));
        id
    }

    /// Dangling lookups become stub entities holding only the identity attribute.
    fn resolve_or_stub(&mut self, lookup: Lookup) -> EntityId {
        if let Some(&id) = self.identity.get(&lookup) {
            return id;
        }
        let id = self.allocate();
        debug!(lookup = %lookup, entity = id.0, "Created stub entity");
        self.bind_identity(id, lookup.attr, lookup.value);
        id
    }

    fn bind_identity(&mut self, id: EntityId, attr: String, value: Scalar) {
        let entity = self.entities.entry(id).or_insert_with(|| Entity::new(id));
        let previous = entity
            .attrs
            .insert(attr.clone(), AttrValue::One(Datum::Scalar(value.clone())));
        if let Some(AttrValue::One(Datum::Scalar(old))) = previous {
            if old != value {
                self.identity.remove(&Lookup::new(attr.clone(), old));
            }
        }
        self.identity.insert(Lookup::new(attr, value), id);
    }
}

/// Process-wide fact store: atomic batched writes, lock-free-in-practice reads.
///
/// Writers build the next database value off to the side and publish it with
/// a pointer swap, so a query never observes a half-applied batch.
#[derive(Debug)]
pub struct FactStore {
    current: RwLock<Arc<Db>>,
    writer: Mutex<()>,
    changes: broadcast::Sender<StoreChanged>,
}

impl FactStore {
    pub fn new(schema: Schema) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            current: RwLock::new(Arc::new(Db::new(schema))),
            writer: Mutex::new(()),
            changes,
        }
    }

    /// Store with the GitHub schema.
    pub fn github() -> Self {
        Self::new(Schema::github())
    }

    /// The latest committed database value.
    pub fn snapshot(&self) -> Arc<Db> {
        Arc::clone(&self.current.read().expect("fact store lock poisoned"))
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChanged> {
        self.changes.subscribe()
    }

    /// Apply a batch of facts.
    ///
    /// Facts violating the schema are dropped and reported; the remainder is
    /// published as one new database value followed by one `StoreChanged`.
    pub fn transact(&self, facts: impl IntoIterator<Item = Fact>) -> TxReport {
        let _writer = self.writer.lock().expect("fact store writer lock poisoned");
        // Full copy of the current value per commit, so a transact costs
        // O(store size). Fine for one inbox; a persistent map would lift it.
        let mut next = Db::clone(&self.snapshot());
        let mut report = TxReport::default();

        for (index, fact) in facts.into_iter().enumerate() {
            match next.apply(fact) {
                Ok(id) => report.entities.push(id),
                Err(violation) => {
                    warn!(index, %violation, "Rejected fact");
                    report.violations.push((index, violation));
                }
            }
        }

        if report.applied() == 0 {
            return report;
        }

        next.basis_tx += 1;
        let basis_tx = next.basis_tx;
        *self.current.write().expect("fact store lock poisoned") = Arc::new(next);
        debug!(
            basis_tx,
            applied = report.applied(),
            rejected = report.violations.len(),
            "Transaction committed"
        );

        // No receivers is fine: nobody is watching yet.
        let _ = self.changes.send(StoreChanged);
        report
    }

    pub fn stats(&self) -> FactStats {
        self.snapshot().stats()
    }
}

#[cfg(test)]
mod tests {
    use super::super::schema::attr;
    use super::*;

    fn user(id: u64, login: &str) -> Fact {
        Fact::new().with(attr::USER_ID, id).with(attr::USER_LOGIN, login)
    }

    #[test]
    fn identity_upsert_overwrites_field() {
        let store = FactStore::github();
        store.transact([Fact::new().with(attr::USER_ID, 1u64).with(attr::USER_NAME, "a")]);
        store.transact([Fact::new().with(attr::USER_ID, 1u64).with(attr::USER_NAME, "b")]);

        let db = store.snapshot();
        assert_eq!(db.len(), 1);
        let e = db.pull(&Lookup::new(attr::USER_ID, 1u64)).unwrap();
        assert_eq!(e.str(attr::USER_NAME), Some("b"));
    }

    #[test]
    fn null_never_scrubs_known_value() {
        let store = FactStore::github();
        store.transact([user(1, "bob").with(attr::USER_NAME, "Bob")]);
        store.transact([user(1, "bob").with(attr::USER_NAME, FactValue::Null)]);

        let db = store.snapshot();
        let e = db.pull(&Lookup::new(attr::USER_LOGIN, "bob")).unwrap();
        assert_eq!(e.str(attr::USER_NAME), Some("Bob"));
    }

    #[test]
    fn forward_reference_merges_into_stub() {
        let store = FactStore::github();
        let canonical = "issue:o/r#5";
        store.transact([Fact::new()
            .with(attr::COMMENT_ID, 10u64)
            .with(
                attr::COMMENT_REFERENCES,
                vec![Lookup::new(attr::ISSUE_CANONICAL_NAME, canonical)],
            )]);

        let db = store.snapshot();
        let stub = db.resolve(&Lookup::new(attr::ISSUE_CANONICAL_NAME, canonical)).unwrap();
        assert_eq!(db.entity(stub).unwrap().attrs.len(), 1);

        store.transact([Fact::new()
            .with(attr::ISSUE_ID, 500u64)
            .with(attr::ISSUE_CANONICAL_NAME, canonical)
            .with(attr::ISSUE_TITLE, "Crash on start")]);

        let db = store.snapshot();
        assert_eq!(db.len(), 2);
        let issue = db.pull(&Lookup::new(attr::ISSUE_ID, 500u64)).unwrap();
        assert_eq!(issue.id, stub);
        assert_eq!(issue.str(attr::ISSUE_TITLE), Some("Crash on start"));
    }

    #[test]
    fn cardinality_many_unions() {
        let store = FactStore::github();
        let refs = |logins: &[&str]| {
            logins
                .iter()
                .map(|l| Lookup::new(attr::USER_LOGIN, *l))
                .collect::<Vec<_>>()
        };
        store.transact([Fact::new()
            .with(attr::ISSUE_ID, 1u64)
            .with(attr::ISSUE_ASSIGNEES, refs(&["ann", "bob"]))]);
        store.transact([Fact::new()
            .with(attr::ISSUE_ID, 1u64)
            .with(attr::ISSUE_ASSIGNEES, refs(&["bob", "cy"]))]);

        let db = store.snapshot();
        let issue = db.pull(&Lookup::new(attr::ISSUE_ID, 1u64)).unwrap();
        assert_eq!(issue.references(attr::ISSUE_ASSIGNEES).len(), 3);
    }

    #[test]
    fn identity_conflict_rejects_only_that_fact() {
        let store = FactStore::github();
        store.transact([user(1, "ann"), user(2, "bob")]);

        let report = store.transact([
            user(1, "bob"),
            Fact::new().with(attr::USER_LOGIN, "cy"),
        ]);

        assert_eq!(report.applied(), 1);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].0, 0);
        assert!(matches!(
            report.violations[0].1,
            SchemaViolation::IdentityConflict { .. }
        ));

        let db = store.snapshot();
        assert_eq!(db.len(), 3);
        let ann = db.pull(&Lookup::new(attr::USER_ID, 1u64)).unwrap();
        assert_eq!(ann.str(attr::USER_LOGIN), Some("ann"));
    }

    #[test]
    fn renaming_identity_rebinds_index() {
        let store = FactStore::github();
        store.transact([user(1, "old-name")]);
        store.transact([user(1, "new-name")]);

        let db = store.snapshot();
        assert!(db.resolve(&Lookup::new(attr::USER_LOGIN, "old-name")).is_none());
        assert_eq!(
            db.resolve(&Lookup::new(attr::USER_LOGIN, "new-name")),
            db.resolve(&Lookup::new(attr::USER_ID, 1u64))
        );
    }

    #[test]
    fn schema_checks_reject_bad_facts() {
        let store = FactStore::github();
        let report = store.transact([
            Fact::new().with(":user/shoe-size", 9i64),
            Fact::new().with(attr::USER_NAME, "nobody"),
            Fact::new()
                .with(attr::COMMENT_ID, 1u64)
                .with(attr::COMMENT_USER, Lookup::new(attr::USER_NAME, "x")),
            Fact::new().with(attr::COMMENT_ID, 2u64).with(attr::COMMENT_USER, "bob"),
            Fact::new().with(attr::COMMENT_ID, 3u64).with(
                attr::COMMENT_USER,
                vec![Lookup::new(attr::USER_LOGIN, "a"), Lookup::new(attr::USER_LOGIN, "b")],
            ),
            Fact::new()
                .with(attr::COMMENT_ID, 4u64)
                .with(attr::COMMENT_USER, EntityId(999)),
        ]);

        let reasons: Vec<_> = report.violations.into_iter().map(|(_, v)| v).collect();
        assert_eq!(
            reasons,
            vec![
                SchemaViolation::UnknownAttribute(":user/shoe-size".into()),
                SchemaViolation::MissingIdentity,
                SchemaViolation::NotIdentity(attr::USER_NAME.into()),
                SchemaViolation::TypeMismatch {
                    attr: attr::COMMENT_USER.into(),
                    expected: "reference"
                },
                SchemaViolation::CardinalityMismatch(attr::COMMENT_USER.into()),
                SchemaViolation::UnknownEntity(999),
            ]
        );
        assert!(store.snapshot().is_empty(), "rejected facts leave no stubs behind");
    }

    #[test]
    fn lookup_to_own_identity_resolves_to_self() {
        let store = FactStore::github();
        store.transact([Fact::new()
            .with(attr::REPOSITORY_FULL_NAME, "bob/dots")
            .with(attr::REPOSITORY_OWNER, Lookup::new(attr::USER_LOGIN, "bob"))
            .with(attr::REPOSITORY_NAME, "dots")]);
        store.transact([user(7, "bob")]);

        let db = store.snapshot();
        assert_eq!(db.len(), 2);
        let repo = db.pull(&Lookup::new(attr::REPOSITORY_FULL_NAME, "bob/dots")).unwrap();
        let owner = repo.reference(attr::REPOSITORY_OWNER).unwrap();
        assert_eq!(db.resolve(&Lookup::new(attr::USER_ID, 7u64)), Some(owner));
    }

    #[test]
    fn one_notification_per_transact() {
        let store = FactStore::github();
        let mut rx = store.subscribe();

        store.transact([user(1, "a"), user(2, "b"), user(3, "c")]);
        assert!(matches!(rx.try_recv(), Ok(StoreChanged)));
        assert!(rx.try_recv().is_err());

        // Nothing applied, nothing published.
        store.transact(Vec::<Fact>::new());
        store.transact([Fact::new().with(attr::USER_NAME, "x")]);
        assert!(rx.try_recv().is_err());
        assert_eq!(store.snapshot().basis_tx(), 1);
    }

    #[test]
    fn snapshots_are_isolated_from_later_writes() {
        let store = FactStore::github();
        store.transact([user(1, "a")]);
        let before = store.snapshot();
        store.transact([user(2, "b")]);
        assert_eq!(before.len(), 1);
        assert_eq!(store.snapshot().len(), 2);
    }

    #[test]
    fn stats_count_by_namespace() {
        let store = FactStore::github();
        store.transact([
            user(1, "a"),
            user(2, "b"),
            Fact::new().with(attr::ISSUE_CANONICAL_NAME, "issue:o/r#1"),
        ]);
        let stats = store.stats();
        assert_eq!(stats.total_entities, 3);
        assert_eq!(stats.by_kind.get("user"), Some(&2));
        assert_eq!(stats.by_kind.get("issue"), Some(&1));
    }
}
