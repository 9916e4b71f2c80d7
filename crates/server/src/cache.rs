//! Recommendation cache.
//!
//! Entries are keyed by user and request context and expire after a TTL.
//! A cached list may come from an older generation than the one serving;
//! that staleness is bounded by the TTL.

use data_loader::{ItemId, UserId};
use moka::Expiry;
use moka::sync::Cache;
use std::time::{Duration, Instant};

pub trait RecommendationCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<ItemId>>;

    fn put(&self, key: &str, items: Vec<ItemId>, ttl: Duration);
}

/// `recommendation:{user}:{exclude|none}:{n}`
pub fn cache_key(user_id: UserId, exclude_item: Option<ItemId>, n: usize) -> String {
    match exclude_item {
        Some(item_id) => format!("recommendation:{user_id}:{item_id}:{n}"),
        None => format!("recommendation:{user_id}:none:{n}"),
    }
}

#[derive(Clone)]
struct CachedList {
    items: Vec<ItemId>,
    ttl: Duration,
}

/// Each entry lives for the TTL it was written with; a rewrite restarts it
struct PerEntryTtl;

impl Expiry<String, CachedList> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedList,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedList,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Process-local cache bounded by entry count
#[derive(Clone)]
pub struct InMemoryCache {
    entries: Cache<String, CachedList>,
}

impl InMemoryCache {
    pub fn new(max_entries: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(PerEntryTtl)
            .build();
        Self { entries }
    }

    /// Number of live entries after pending evictions are applied
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecommendationCache for InMemoryCache {
    fn get(&self, key: &str) -> Option<Vec<ItemId>> {
        self.entries.get(key).map(|cached| cached.items)
    }

    fn put(&self, key: &str, items: Vec<ItemId>, ttl: Duration) {
        self.entries.insert(key.to_string(), CachedList { items, ttl });
    }
}
