use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::types::FetchWindow;

/// Watermark for the notifications resource.
///
/// Each request covers `[last successful before, now)`; the first request
/// after startup looks back a fixed window instead.
#[derive(Debug, Default)]
pub struct NotificationCursor {
    last_before: Mutex<Option<DateTime<Utc>>>,
}

impl NotificationCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cursor resuming from a previously saved watermark.
    pub fn starting_at(last_before: Option<DateTime<Utc>>) -> Self {
        Self {
            last_before: Mutex::new(last_before),
        }
    }

    pub fn last_before(&self) -> Option<DateTime<Utc>> {
        *self.last_before.lock().expect("cursor mutex poisoned")
    }

    /// Window for the next request.
    pub fn window(&self, now: DateTime<Utc>, lookback: chrono::Duration) -> FetchWindow {
        let since = self
            .last_before()
            .unwrap_or_else(|| now.checked_sub_signed(lookback).unwrap_or(now));
        FetchWindow { since, before: now }
    }

    /// Record a successful fetch of `window`. Never moves backwards.
    pub fn advance(&self, window: &FetchWindow) {
        let mut last = self.last_before.lock().expect("cursor mutex poisoned");
        if last.is_none_or(|prev| window.before > prev) {
            *last = Some(window.before);
        }
    }

    /// Restore a saved watermark unless one is already set.
    pub fn restore(&self, saved: DateTime<Utc>) {
        let mut last = self.last_before.lock().expect("cursor mutex poisoned");
        if last.is_none() {
            *last = Some(saved);
        }
    }
}
