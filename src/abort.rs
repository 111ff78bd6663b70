use std::collections::HashMap;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use crate::key::RequestKey;
use crate::util::lock_unpoisoned;

struct AbortEntry {
    id: u64,
    token: CancellationToken,
    holders: usize,
}

/// Cancellation handles for outstanding calls, shared by calls with the same key.
#[derive(Default)]
pub(crate) struct AbortRegistry {
    state: Mutex<AbortState>,
}

#[derive(Default)]
struct AbortState {
    next_id: u64,
    entries: HashMap<RequestKey, AbortEntry>,
}

impl AbortRegistry {
    pub(crate) fn acquire(&self, key: &RequestKey) -> AbortGuard<'_> {
        let mut state = lock_unpoisoned(&self.state);
        if let Some(entry) = state.entries.get_mut(key) {
            entry.holders += 1;
            return AbortGuard {
                registry: self,
                key: key.clone(),
                id: entry.id,
                token: entry.token.clone(),
            };
        }

        state.next_id = state.next_id.wrapping_add(1);
        let id = state.next_id;
        let token = CancellationToken::new();
        state.entries.insert(
            key.clone(),
            AbortEntry {
                id,
                token: token.clone(),
                holders: 1,
            },
        );
        AbortGuard {
            registry: self,
            key: key.clone(),
            id,
            token,
        }
    }

    pub(crate) fn cancel(&self, key: &RequestKey) -> bool {
        let entry = lock_unpoisoned(&self.state).entries.remove(key);
        match entry {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) fn cancel_all(&self) -> usize {
        let drained: Vec<AbortEntry> = lock_unpoisoned(&self.state)
            .entries
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in &drained {
            entry.token.cancel();
        }
        drained.len()
    }

    #[cfg(test)]
    pub(crate) fn outstanding(&self) -> usize {
        lock_unpoisoned(&self.state).entries.len()
    }

    fn release(&self, key: &RequestKey, id: u64) {
        let mut state = lock_unpoisoned(&self.state);
        let Some(entry) = state.entries.get_mut(key) else {
            return;
        };
        if entry.id != id {
            return;
        }
        entry.holders = entry.holders.saturating_sub(1);
        if entry.holders == 0 {
            state.entries.remove(key);
        }
    }
}

pub(crate) struct AbortGuard<'a> {
    registry: &'a AbortRegistry,
    key: RequestKey,
    id: u64,
    token: CancellationToken,
}

impl AbortGuard<'_> {
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for AbortGuard<'_> {
    fn drop(&mut self) {
        self.registry.release(&self.key, self.id);
    }
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::AbortRegistry;
    use crate::key::RequestKey;

    #[test]
    fn calls_with_same_key_share_one_handle() {
        let registry = AbortRegistry::default();
        let key = RequestKey::new(Method::GET, "/loans");
        let first = registry.acquire(&key);
        let second = registry.acquire(&key);
        assert_eq!(registry.outstanding(), 1);

        drop(first);
        assert_eq!(registry.outstanding(), 1);
        assert!(registry.cancel(&key));
        assert!(second.token().is_cancelled());
        assert_eq!(registry.outstanding(), 0);
    }

    #[test]
    fn stale_guard_does_not_release_a_newer_handle() {
        let registry = AbortRegistry::default();
        let key = RequestKey::new(Method::POST, "/loans");
        let stale = registry.acquire(&key);
        registry.cancel(&key);

        let fresh = registry.acquire(&key);
        drop(stale);
        assert_eq!(registry.outstanding(), 1);
        assert!(!fresh.token().is_cancelled());
    }

    #[test]
    fn cancel_all_triggers_every_token() {
        let registry = AbortRegistry::default();
        let a = registry.acquire(&RequestKey::get("/a"));
        let b = registry.acquire(&RequestKey::get("/b"));
        assert_eq!(registry.cancel_all(), 2);
        assert!(a.token().is_cancelled());
        assert!(b.token().is_cancelled());
        assert!(!registry.cancel(&RequestKey::get("/a")));
    }
}
