//! Derived, debounced views over the fact store.
//!
//! A view computes its query when created, then recomputes after each burst
//! of store changes once the store has been quiet for the view's debounce
//! window. Views only read snapshots.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{debug, trace};

use crate::config::ViewsSection;
use crate::facts::{Db, Entity, FactStore, Lookup, Pattern, attr};

/// Reference attributes that can point at a user.
pub const USER_REFERENCE_ATTRS: [&str; 6] = [
    attr::ISSUE_USER,
    attr::ISSUE_ASSIGNEES,
    attr::ISSUE_REFERENCES,
    attr::COMMENT_USER,
    attr::COMMENT_REFERENCES,
    attr::REPOSITORY_OWNER,
];

/// Subscriber handle to a derived view. Dropping it stops recomputation.
#[derive(Debug)]
pub struct DerivedView<T> {
    rx: watch::Receiver<T>,
}

impl<T: Clone> DerivedView<T> {
    /// Current result without waiting.
    pub fn latest(&self) -> T {
        self.rx.borrow().clone()
    }

    /// Wait for the next recomputed result that differs from the last one seen.
    pub async fn changed(&mut self) -> Option<T> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

/// Spawn a view computing `query` against `store`. Requires a Tokio runtime.
pub fn derive<T, F>(store: Arc<FactStore>, debounce: Duration, query: F) -> DerivedView<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(&Db) -> T + Send + Sync + 'static,
{
    // Subscribe before the first computation so no commit slips between.
    let mut changes = store.subscribe();
    let (tx, rx) = watch::channel(query(&store.snapshot()));

    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = changes.recv() => {
                    if matches!(event, Err(broadcast::error::RecvError::Closed)) {
                        break;
                    }
                }
                () = tx.closed() => break,
            }

            // Quiescence: restart the window on every further change.
            loop {
                tokio::select! {
                    () = tokio::time::sleep(debounce) => break,
                    event = changes.recv() => {
                        if matches!(event, Err(broadcast::error::RecvError::Closed)) {
                            return;
                        }
                        trace!("Debounce window restarted");
                    }
                    () = tx.closed() => return,
                }
            }

            let db = store.snapshot();
            let value = query(&db);
            let updated = tx.send_if_modified(|current| {
                if *current == value {
                    false
                } else {
                    *current = value;
                    true
                }
            });
            debug!(basis_tx = db.basis_tx(), updated, "Recomputed view");
        }
    });

    DerivedView { rx }
}

/// Every user entity, ordered by entity id.
pub fn users(db: &Db) -> Vec<Entity> {
    db.query(&Pattern::has(attr::USER_LOGIN))
        .into_iter()
        .cloned()
        .collect()
}

/// Issues, comments, and repositories pointing at the user with `login`.
pub fn user_references(db: &Db, login: &str) -> Vec<Entity> {
    db.query(&Pattern::referencing(
        Lookup::new(attr::USER_LOGIN, login),
        &USER_REFERENCE_ATTRS,
    ))
    .into_iter()
    .cloned()
    .collect()
}

/// Notification entities, most recently updated first.
pub fn notifications(db: &Db) -> Vec<Entity> {
    let mut found: Vec<Entity> = db
        .query(&Pattern::has(attr::NOTIFICATION_ID))
        .into_iter()
        .cloned()
        .collect();
    found.sort_by(|a, b| {
        b.str(attr::NOTIFICATION_UPDATED_AT)
            .cmp(&a.str(attr::NOTIFICATION_UPDATED_AT))
    });
    found
}

/// The views the UI subscribes to, with their configured debounce windows.
#[derive(Debug, Clone)]
pub struct Views {
    store: Arc<FactStore>,
    config: ViewsSection,
}

impl Views {
    pub fn new(store: Arc<FactStore>, config: ViewsSection) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<FactStore> {
        &self.store
    }

    pub fn users(&self) -> DerivedView<Vec<Entity>> {
        derive(Arc::clone(&self.store), self.config.collection_debounce(), users)
    }

    pub fn user_references(&self, login: &str) -> DerivedView<Vec<Entity>> {
        let login = login.to_string();
        derive(
            Arc::clone(&self.store),
            self.config.reference_debounce(),
            move |db| user_references(db, &login),
        )
    }

    pub fn notifications(&self) -> DerivedView<Vec<Entity>> {
        derive(
            Arc::clone(&self.store),
            self.config.collection_debounce(),
            notifications,
        )
    }
}
