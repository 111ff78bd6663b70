use std::collections::HashMap;
use std::sync::Mutex;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared, WeakShared};

use crate::Result;
use crate::key::RequestKey;
use crate::response::ApiResponse;
use crate::util::lock_unpoisoned;

pub(crate) type PendingResponse = Shared<BoxFuture<'static, Result<ApiResponse>>>;

struct PendingEntry {
    id: u64,
    future: WeakShared<BoxFuture<'static, Result<ApiResponse>>>,
}

#[derive(Default)]
struct PendingState {
    next_id: u64,
    entries: HashMap<RequestKey, PendingEntry>,
}

/// In-flight request futures keyed by method and endpoint.
///
/// Only callers keep the shared future alive. Once every caller drops it, the
/// inner future is dropped and its [`DedupRelease`] clears the entry.
#[derive(Default)]
pub(crate) struct DedupRegistry {
    pending: Mutex<PendingState>,
}

impl DedupRegistry {
    /// Returns the in-flight future for `key`, registering `start(id)` when none exists.
    ///
    /// The second tuple field is `true` when the caller joined an existing request.
    pub(crate) fn join_or_register<F>(&self, key: &RequestKey, start: F) -> (PendingResponse, bool)
    where
        F: FnOnce(u64) -> BoxFuture<'static, Result<ApiResponse>>,
    {
        let mut state = lock_unpoisoned(&self.pending);
        if let Some(existing) = state.entries.get(key).and_then(|entry| entry.future.upgrade()) {
            return (existing, true);
        }
        let id = state.next_id;
        state.next_id = state.next_id.wrapping_add(1);
        let shared = start(id).shared();
        match shared.downgrade() {
            Some(future) => {
                state.entries.insert(key.clone(), PendingEntry { id, future });
            }
            None => {
                state.entries.remove(key);
            }
        }
        (shared, false)
    }

    fn release(&self, key: &RequestKey, id: u64) {
        let mut state = lock_unpoisoned(&self.pending);
        if state.entries.get(key).is_some_and(|entry| entry.id == id) {
            state.entries.remove(key);
        }
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> usize {
        lock_unpoisoned(&self.pending).entries.len()
    }
}

pub(crate) struct DedupRelease<'a> {
    registry: &'a DedupRegistry,
    key: RequestKey,
    id: u64,
}

impl<'a> DedupRelease<'a> {
    pub(crate) fn new(registry: &'a DedupRegistry, key: RequestKey, id: u64) -> Self {
        Self { registry, key, id }
    }
}

impl Drop for DedupRelease<'_> {
    fn drop(&mut self) {
        self.registry.release(&self.key, self.id);
    }
}
