//! Short-TTL in-process memoization for user, group-list, and policy reads.
//!
//! Entries expire after 60 seconds; admin writes invalidate locally only.
//! Cross-process invalidation is unnecessary because every replica's
//! entries age out within one TTL.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::constants::CACHE_TTL;
use crate::store::{Policy, User};

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

struct TtlMap<T> {
    entries: Mutex<HashMap<String, Entry<T>>>,
    ttl: Duration,
}

impl<T: Clone> TtlMap<T> {
    fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn get(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn put(&self, key: &str, value: T) {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    fn invalidate(&self, key: &str) {
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .remove(key);
    }

    fn clear(&self) {
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .clear();
    }
}

/// `Option` values distinguish a cached "row absent" from a cache miss.
pub struct CacheLayer {
    users: TtlMap<Option<User>>,
    groups: TtlMap<Vec<String>>,
    policies: TtlMap<Option<Policy>>,
}

impl CacheLayer {
    pub fn new() -> Self {
        Self::with_ttl(CACHE_TTL)
    }

    fn with_ttl(ttl: Duration) -> Self {
        Self {
            users: TtlMap::new(ttl),
            groups: TtlMap::new(ttl),
            policies: TtlMap::new(ttl),
        }
    }

    pub fn get_user(&self, id: &str) -> Option<Option<User>> {
        self.users.get(id)
    }

    pub fn put_user(&self, id: &str, user: Option<User>) {
        self.users.put(id, user);
    }

    pub fn invalidate_user(&self, id: &str) {
        self.users.invalidate(id);
    }

    pub fn clear_users(&self) {
        self.users.clear();
    }

    pub fn get_groups(&self, user_id: &str) -> Option<Vec<String>> {
        self.groups.get(user_id)
    }

    pub fn put_groups(&self, user_id: &str, groups: Vec<String>) {
        self.groups.put(user_id, groups);
    }

    pub fn get_policy(&self, id: &str) -> Option<Option<Policy>> {
        self.policies.get(id)
    }

    pub fn put_policy(&self, id: &str, policy: Option<Policy>) {
        self.policies.put(id, policy);
    }

    pub fn invalidate_policy(&self, id: &str) {
        self.policies.invalidate(id);
    }
}

impl Default for CacheLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_hit_then_invalidate() {
        let cache = CacheLayer::new();
        assert!(cache.get_groups("alice").is_none());

        cache.put_groups("alice", vec!["eng".to_string()]);
        assert_eq!(cache.get_groups("alice"), Some(vec!["eng".to_string()]));

        cache.invalidate_user("alice"); // different map, no effect
        assert!(cache.get_groups("alice").is_some());
    }

    #[test]
    fn absent_rows_are_cached_distinctly() {
        let cache = CacheLayer::new();
        assert!(cache.get_user("ghost").is_none());

        cache.put_user("ghost", None);
        assert_eq!(cache.get_user("ghost"), Some(None));
    }

    #[test]
    fn entries_expire() {
        let cache = CacheLayer::with_ttl(Duration::from_millis(0));
        cache.put_groups("bob", vec!["ops".to_string()]);
        assert!(cache.get_groups("bob").is_none());
    }
}
