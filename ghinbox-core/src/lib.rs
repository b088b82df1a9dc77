//! ghinbox core library: local sync and fact store for GitHub notifications.
//!
//! Remote data flows through [`sync::SyncController`], which polls the
//! [`remote::RemoteSource`], folds each response into the
//! [`cache::MergeCache`], and streams merged values to subscribers. Every
//! merge also lands in the [`facts::FactStore`] as normalized entity facts,
//! which [`views::Views`] turns into debounced derived results.

pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod facts;
pub mod normalize;
pub mod remote;
pub mod sync;
pub mod types;
pub mod views;
