use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use http::Method;
use serde_json::Value;

use crate::extensions::Clock;
use crate::key::RequestKey;
use crate::util::lock_unpoisoned;

#[derive(Clone, Debug)]
struct CacheEntry {
    payload: Value,
    stored_at: SystemTime,
}

/// GET payload cache with lazy, pull-based TTL eviction.
pub(crate) struct ResponseCache {
    entries: Mutex<HashMap<RequestKey, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl ResponseCache {
    pub(crate) fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub(crate) fn get(&self, key: &RequestKey, ttl: Duration) -> Option<Value> {
        let now = self.clock.now_system();
        let mut entries = lock_unpoisoned(&self.entries);
        let entry = entries.get(key)?;
        let age = now.duration_since(entry.stored_at).unwrap_or(Duration::ZERO);
        if age >= ttl {
            entries.remove(key);
            return None;
        }
        Some(entry.payload.clone())
    }

    pub(crate) fn set(&self, key: RequestKey, payload: Value) {
        let entry = CacheEntry {
            payload,
            stored_at: self.clock.now_system(),
        };
        lock_unpoisoned(&self.entries).insert(key, entry);
    }

    pub(crate) fn invalidate(&self, endpoint: &str) {
        let key = RequestKey::new(Method::GET, endpoint);
        lock_unpoisoned(&self.entries).remove(&key);
    }

    pub(crate) fn clear(&self) {
        lock_unpoisoned(&self.entries).clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        lock_unpoisoned(&self.entries).len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, SystemTime};

    use serde_json::json;

    use super::ResponseCache;
    use crate::extensions::Clock;
    use crate::key::RequestKey;

    pub(crate) struct ManualClock {
        now: Mutex<SystemTime>,
    }

    impl ManualClock {
        pub(crate) fn new() -> Self {
            Self {
                now: Mutex::new(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)),
            }
        }

        pub(crate) fn advance(&self, by: Duration) {
            let mut now = self.now.lock().expect("clock lock");
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now_system(&self) -> SystemTime {
            *self.now.lock().expect("clock lock")
        }
    }

    #[test]
    fn entry_is_served_until_ttl_elapses_then_evicted() {
        let clock = Arc::new(ManualClock::new());
        let cache = ResponseCache::new(clock.clone());
        let key = RequestKey::get("/loans/42");
        let ttl = Duration::from_secs(60);

        cache.set(key.clone(), json!({ "id": 42 }));
        clock.advance(Duration::from_secs(59));
        assert_eq!(cache.get(&key, ttl), Some(json!({ "id": 42 })));

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get(&key, ttl), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn invalidate_removes_only_the_get_entry_for_endpoint() {
        let cache = ResponseCache::new(Arc::new(ManualClock::new()));
        cache.set(RequestKey::get("/loans"), json!([1]));
        cache.set(RequestKey::get("/savings"), json!([2]));

        cache.invalidate("/loans");
        let ttl = Duration::from_secs(60);
        assert_eq!(cache.get(&RequestKey::get("/loans"), ttl), None);
        assert_eq!(cache.get(&RequestKey::get("/savings"), ttl), Some(json!([2])));

        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}
