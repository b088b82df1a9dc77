// Declarative query patterns evaluated against a database value.
//
// Only the shapes the views need: attribute presence, attribute equality,
// and one-hop traversal over a set of reference attributes.

use std::collections::BTreeSet;

use crate::types::EntityId;

use super::store::Db;
use super::value::{Datum, Entity, EntityRef, Scalar};

/// A query over one database value. Results come back ordered by entity id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Every entity that has `attr`.
    Has(String),
    /// Entities where cardinality-one `attr` equals `value`.
    Eq { attr: String, value: Scalar },
    /// Entities whose reference attributes in `via` point at `target`.
    Referencing { target: EntityRef, via: Vec<String> },
    /// Entities that `source` points at through any attribute in `via`.
    ReferencedBy { source: EntityRef, via: Vec<String> },
}

impl Pattern {
    pub fn has(attr: &str) -> Self {
        Self::Has(attr.to_string())
    }

    pub fn eq(attr: &str, value: impl Into<Scalar>) -> Self {
        Self::Eq {
            attr: attr.to_string(),
            value: value.into(),
        }
    }

    pub fn referencing(target: impl Into<EntityRef>, via: &[&str]) -> Self {
        Self::Referencing {
            target: target.into(),
            via: via.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    pub fn referenced_by(source: impl Into<EntityRef>, via: &[&str]) -> Self {
        Self::ReferencedBy {
            source: source.into(),
            via: via.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl Db {
    /// Evaluate `pattern` against this value.
    pub fn query(&self, pattern: &Pattern) -> Vec<&Entity> {
        match pattern {
            Pattern::Has(attr) => self
                .entities
                .values()
                .filter(|e| e.attrs.contains_key(attr))
                .collect(),

            Pattern::Eq { attr, value } => {
                if self.schema().is_identity(attr) {
                    let lookup = super::value::Lookup::new(attr.clone(), value.clone());
                    return self.pull(&lookup).into_iter().collect();
                }
                self.entities
                    .values()
                    .filter(|e| e.scalar(attr) == Some(value))
                    .collect()
            }

            Pattern::Referencing { target, via } => {
                let Some(target) = self.resolve_ref(target) else {
                    return Vec::new();
                };
                self.entities
                    .values()
                    .filter(|e| via.iter().any(|attr| e.refers_to(attr, target)))
                    .collect()
            }

            Pattern::ReferencedBy { source, via } => {
                let Some(source) = self.resolve_ref(source).and_then(|id| self.entity(id)) else {
                    return Vec::new();
                };
                let targets: BTreeSet<EntityId> = via
                    .iter()
                    .flat_map(|attr| source.references(attr))
                    .collect();
                targets.into_iter().filter_map(|id| self.entity(id)).collect()
            }
        }
    }

    /// Ids of entities matching `pattern`.
    pub fn query_ids(&self, pattern: &Pattern) -> Vec<EntityId> {
        self.query(pattern).into_iter().map(|e| e.id).collect()
    }

    /// Scalar values of `attr` across entities matching `pattern`.
    pub fn project(&self, pattern: &Pattern, attr: &str) -> Vec<Scalar> {
        self.query(pattern)
            .into_iter()
            .filter_map(|e| match e.get(attr)? {
                super::value::AttrValue::One(Datum::Scalar(s)) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::schema::attr;
    use super::super::store::FactStore;
    use super::super::value::{Fact, Lookup};
    use super::*;

    fn seeded() -> FactStore {
        let store = FactStore::github();
        let bob = Lookup::new(attr::USER_LOGIN, "bob");
        store.transact([
            Fact::new().with(attr::USER_ID, 1u64).with(attr::USER_LOGIN, "bob"),
            Fact::new().with(attr::USER_ID, 2u64).with(attr::USER_LOGIN, "ann"),
            Fact::new()
                .with(attr::ISSUE_ID, 10u64)
                .with(attr::ISSUE_STATE, "open")
                .with(attr::ISSUE_USER, Lookup::new(attr::USER_LOGIN, "ann"))
                .with(attr::ISSUE_ASSIGNEES, vec![bob.clone()]),
            Fact::new()
                .with(attr::COMMENT_ID, 20u64)
                .with(attr::COMMENT_USER, Lookup::new(attr::USER_LOGIN, "ann"))
                .with(attr::COMMENT_REFERENCES, vec![bob.clone()]),
            Fact::new()
                .with(attr::REPOSITORY_FULL_NAME, "bob/dots")
                .with(attr::REPOSITORY_OWNER, bob),
            Fact::new().with(attr::ISSUE_ID, 11u64).with(attr::ISSUE_STATE, "closed"),
        ]);
        store
    }

    #[test]
    fn has_attribute_finds_all_users() {
        let store = seeded();
        let db = store.snapshot();
        let logins = db.project(&Pattern::has(attr::USER_LOGIN), attr::USER_LOGIN);
        assert_eq!(logins, vec![Scalar::from("bob"), Scalar::from("ann")]);
    }

    #[test]
    fn eq_on_identity_uses_index() {
        let store = seeded();
        let db = store.snapshot();
        let hits = db.query(&Pattern::eq(attr::USER_LOGIN, "ann"));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].int(attr::USER_ID), Some(2));
    }

    #[test]
    fn eq_on_plain_attribute_scans() {
        let store = seeded();
        let db = store.snapshot();
        let open = db.query(&Pattern::eq(attr::ISSUE_STATE, "open"));
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].int(attr::ISSUE_ID), Some(10));
    }

    #[test]
    fn referencing_follows_any_listed_attribute() {
        let store = seeded();
        let db = store.snapshot();
        let pattern = Pattern::referencing(
            Lookup::new(attr::USER_LOGIN, "bob"),
            &[
                attr::ISSUE_ASSIGNEES,
                attr::COMMENT_REFERENCES,
                attr::REPOSITORY_OWNER,
            ],
        );
        let hits = db.query(&pattern);
        let kinds: Vec<_> = hits.iter().filter_map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["issue", "comment", "repository"]);
    }

    #[test]
    fn referencing_unknown_target_is_empty() {
        let store = seeded();
        let db = store.snapshot();
        let pattern = Pattern::referencing(
            Lookup::new(attr::USER_LOGIN, "ghost"),
            &[attr::ISSUE_ASSIGNEES],
        );
        assert!(db.query(&pattern).is_empty());
    }

    #[test]
    fn referenced_by_walks_forward() {
        let store = seeded();
        let db = store.snapshot();
        let pattern = Pattern::referenced_by(
            Lookup::new(attr::ISSUE_ID, 10u64),
            &[attr::ISSUE_USER, attr::ISSUE_ASSIGNEES],
        );
        let logins = db.project(&pattern, attr::USER_LOGIN);
        assert_eq!(logins, vec![Scalar::from("bob"), Scalar::from("ann")]);
    }
}
