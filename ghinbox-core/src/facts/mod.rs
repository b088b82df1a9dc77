//! Schema-constrained in-memory fact store.
//!
//! Entities are upserted by unique identity attributes, references are
//! identity lookups that resolve (or stub) at transact time, and every
//! committed batch publishes one [`StoreChanged`] signal.

pub mod query;
pub mod schema;
pub mod store;
pub mod value;

pub use query::Pattern;
pub use schema::{AttrSpec, Cardinality, Schema, Uniqueness, ValueType, attr};
pub use store::{Db, FactStats, FactStore, StoreChanged, TxReport};
pub use value::{AttrValue, Datum, Entity, EntityRef, Fact, FactValue, Lookup, Scalar};
