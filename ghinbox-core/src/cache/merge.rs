// Merge rules for cached resources.

use std::collections::HashSet;
use std::hash::Hash;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::types::{Comment, Notification};

/// An item with a stable per-item identifier.
pub trait Keyed {
    type Key: Eq + Hash + Clone;

    fn key(&self) -> Self::Key;
}

impl Keyed for Notification {
    type Key = String;

    fn key(&self) -> String {
        self.id.clone()
    }
}

impl Keyed for Comment {
    type Key = u64;

    fn key(&self) -> u64 {
        self.id
    }
}

/// `(existing items whose key is absent from incoming) ∪ incoming`.
///
/// Incoming entries win on key collision. Order is unspecified; callers sort.
pub fn merge_by_id<T: Keyed>(existing: Vec<T>, incoming: Vec<T>) -> Vec<T> {
    let incoming_keys: HashSet<T::Key> = incoming.iter().map(T::key).collect();
    let mut merged: Vec<T> = existing
        .into_iter()
        .filter(|item| !incoming_keys.contains(&item.key()))
        .collect();
    merged.extend(incoming);
    merged
}

/// Shallow field union `{...existing, ...incoming}` on JSON objects.
///
/// Non-object values are replaced wholesale by `incoming`.
pub fn merge_fields(existing: serde_json::Value, incoming: serde_json::Value) -> serde_json::Value {
    match (existing, incoming) {
        (serde_json::Value::Object(mut base), serde_json::Value::Object(top)) => {
            base.extend(top);
            serde_json::Value::Object(base)
        }
        (_, incoming) => incoming,
    }
}

/// Field-union two typed records through their JSON form.
pub fn merge_record<T>(existing: &T, incoming: &T) -> Result<T, serde_json::Error>
where
    T: Serialize + DeserializeOwned,
{
    let merged = merge_fields(serde_json::to_value(existing)?, serde_json::to_value(incoming)?);
    serde_json::from_value(merged)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Item {
        id: u8,
        rev: u32,
    }

    impl Keyed for Item {
        type Key = u8;

        fn key(&self) -> u8 {
            self.id
        }
    }

    fn item(id: u8, rev: u32) -> Item {
        Item { id, rev }
    }

    #[test]
    fn incoming_wins_and_unseen_are_kept() {
        let merged = merge_by_id(vec![item(1, 0), item(2, 0)], vec![item(2, 5), item(3, 5)]);
        let mut merged: Vec<_> = merged.into_iter().map(|i| (i.id, i.rev)).collect();
        merged.sort_unstable();
        assert_eq!(merged, vec![(1, 0), (2, 5), (3, 5)]);
    }

    #[test]
    fn empty_incoming_is_identity() {
        let merged = merge_by_id(vec![item(1, 0)], Vec::new());
        assert_eq!(merged, vec![item(1, 0)]);
    }

    #[test]
    fn field_union_keeps_absent_fields() {
        let merged = merge_fields(
            json!({"title": "old", "body": "kept", "state": "open"}),
            json!({"title": "new", "state": "closed"}),
        );
        assert_eq!(
            merged,
            json!({"title": "new", "body": "kept", "state": "closed"})
        );
    }

    #[test]
    fn non_object_is_replaced() {
        assert_eq!(merge_fields(json!([1]), json!({"a": 1})), json!({"a": 1}));
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Record {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bio: Option<String>,
    }

    #[test]
    fn typed_record_merge_preserves_optional_fields() {
        let old = Record {
            name: "a".into(),
            bio: Some("hi".into()),
        };
        let new = Record {
            name: "b".into(),
            bio: None,
        };
        let merged = merge_record(&old, &new).unwrap();
        assert_eq!(
            merged,
            Record {
                name: "b".into(),
                bio: Some("hi".into())
            }
        );
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn arb_items() -> impl Strategy<Value = Vec<Item>> {
            prop::collection::vec((0u8..20, any::<u32>()), 0..20).prop_map(|pairs| {
                // Unique keys within one list, as the remote guarantees.
                let unique: HashMap<u8, u32> = pairs.into_iter().collect();
                unique.into_iter().map(|(id, rev)| item(id, rev)).collect()
            })
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(200))]

            #[test]
            fn merge_by_id_keeps_every_key(existing in arb_items(), incoming in arb_items()) {
                let mut expected: HashMap<u8, u32> =
                    existing.iter().map(|i| (i.id, i.rev)).collect();
                expected.extend(incoming.iter().map(|i| (i.id, i.rev)));

                let merged = merge_by_id(existing, incoming);
                let got: HashMap<u8, u32> = merged.iter().map(|i| (i.id, i.rev)).collect();

                prop_assert_eq!(merged.len(), got.len(), "no duplicate keys");
                prop_assert_eq!(got, expected);
            }

            #[test]
            fn merge_by_id_is_idempotent(existing in arb_items(), incoming in arb_items()) {
                let once = merge_by_id(existing, incoming.clone());
                let mut twice: Vec<_> = merge_by_id(once.clone(), incoming)
                    .into_iter()
                    .map(|i| (i.id, i.rev))
                    .collect();
                let mut once: Vec<_> = once.into_iter().map(|i| (i.id, i.rev)).collect();
                once.sort_unstable();
                twice.sort_unstable();
                prop_assert_eq!(once, twice);
            }

            #[test]
            fn field_union_never_drops_keys(
                a in prop::collection::btree_map("[a-e]", 0u8..10, 0..5),
                b in prop::collection::btree_map("[a-e]", 0u8..10, 0..5),
            ) {
                let merged = merge_fields(json!(a), json!(b));
                let obj = merged.as_object().unwrap();
                for (k, v) in &a {
                    if !b.contains_key(k) {
                        prop_assert_eq!(&obj[k], &json!(v));
                    }
                }
                for (k, v) in &b {
                    prop_assert_eq!(&obj[k], &json!(v));
                }
            }
        }
    }
}
