//! Agent-owner lookup cache (§5): a multi-day TTL cache keyed by `agent_id`.
//! Writes to an agent invalidate implicitly by TTL expiry; there is no
//! explicit busting path.

use dashmap::DashMap;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

pub struct TtlCache<V: Clone> {
    entries: DashMap<String, Entry<V>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), ttl }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        match self.entries.get(key) {
            Some(e) if e.expires_at > Instant::now() => Some(e.value.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: String, value: V) {
        self.entries.insert(key, Entry { value, expires_at: Instant::now() + self.ttl });
    }
}
