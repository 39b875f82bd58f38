//! Bounded per-domain result cache.
//!
//! Holds expensive-to-refetch navigation state (e.g. which sub-page of a
//! firm's site holds the listing index) keyed by normalized domain, so
//! records sharing a domain within one run do not repeat the navigation.
//! Eviction is strict FIFO over insertion order, not recency. Not safe for
//! unsynchronized concurrent writers; callers running parallel traversals
//! shard caches per worker or guard access with a mutex.

use std::collections::{HashMap, VecDeque};

use url::Url;

/// Default maximum entry count.
pub const DEFAULT_CAPACITY: usize = 1_000;

/// Normalize a URL to its cache key: lowercase host with any `www.` prefix
/// stripped.
pub fn normalize_domain(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

/// Bounded FIFO cache keyed by normalized domain.
#[derive(Debug)]
pub struct DomainCache<V> {
    capacity: usize,
    entries: HashMap<String, V>,
    order: VecDeque<String>,
}

impl<V> DomainCache<V> {
    /// Create a cache with the given bound. Zero capacities are rejected by
    /// config validation before this is reached.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, domain: &str) -> Option<&V> {
        self.entries.get(domain)
    }

    /// Insert a value. Updating an existing key keeps its original position
    /// in the eviction order; inserting past the bound evicts the single
    /// oldest-inserted entry first.
    pub fn put(&mut self, domain: &str, value: V) {
        if self.entries.contains_key(domain) {
            self.entries.insert(domain.to_string(), value);
            return;
        }
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(domain.to_string());
        self.entries.insert(domain.to_string(), value);
    }
}

impl<V> Default for DomainCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_domain() {
        assert_eq!(
            normalize_domain("https://www.SmithLaw.example.com/attorneys"),
            Some("smithlaw.example.com".to_string())
        );
        assert_eq!(
            normalize_domain("https://example.org/"),
            Some("example.org".to_string())
        );
        assert_eq!(normalize_domain("not a url"), None);
    }

    #[test]
    fn test_insert_past_capacity_evicts_oldest() {
        let mut cache = DomainCache::new(3);
        cache.put("a.com", 1);
        cache.put("b.com", 2);
        cache.put("c.com", 3);
        cache.put("d.com", 4);

        assert_eq!(cache.len(), 3);
        assert!(cache.get("a.com").is_none());
        assert_eq!(cache.get("b.com"), Some(&2));
        assert_eq!(cache.get("c.com"), Some(&3));
        assert_eq!(cache.get("d.com"), Some(&4));
    }

    #[test]
    fn test_eviction_is_insertion_order_not_access_order() {
        let mut cache = DomainCache::new(2);
        cache.put("a.com", 1);
        cache.put("b.com", 2);
        // Reading a.com must not rescue it from FIFO eviction.
        assert_eq!(cache.get("a.com"), Some(&1));
        cache.put("c.com", 3);

        assert!(cache.get("a.com").is_none());
        assert_eq!(cache.get("b.com"), Some(&2));
    }

    #[test]
    fn test_update_existing_key_does_not_evict() {
        let mut cache = DomainCache::new(2);
        cache.put("a.com", 1);
        cache.put("b.com", 2);
        cache.put("a.com", 10);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a.com"), Some(&10));
        assert_eq!(cache.get("b.com"), Some(&2));
    }
}
