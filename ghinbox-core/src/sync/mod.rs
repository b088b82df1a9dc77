//! Resource sync: stale-while-revalidate poll loops over the remote source,
//! merged through the cache and exposed as shared per-key streams.

pub mod controller;
pub mod cursor;
pub mod resource;

pub use controller::{ResourceStream, SyncContext, SyncController};
pub use cursor::NotificationCursor;
pub use resource::ResourceKey;
