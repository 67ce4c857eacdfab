//! Two-layer LRU+TTL entity cache sitting in front of `StorageEngine::store_entity`/`get_entity`.
//!
//! The cache is process-local and never a source of truth: any mutation that touches an entity
//! invalidates both layers for that key, and storage is always the fallback on a miss.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::models::EntityType;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    last_used: u64,
}

/// A single LRU+TTL map. `K` is the cache key, `V` the cached value (an entity id, or a full
/// entity depending on which layer this instance backs).
struct LruTtl<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    max_size: usize,
    ttl: Duration,
    clock: u64,
}

impl<K: std::hash::Hash + Eq + Clone, V: Clone> LruTtl<K, V> {
    fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            max_size,
            ttl,
            clock: 0,
        }
    }

    fn get(&mut self, key: &K) -> Option<V> {
        self.clock += 1;
        let clock = self.clock;
        let ttl = self.ttl;
        let expired = self
            .entries
            .get(key)
            .map(|e| e.inserted_at.elapsed() > ttl)
            .unwrap_or(false);
        if expired {
            self.entries.remove(key);
            return None;
        }
        if let Some(entry) = self.entries.get_mut(key) {
            entry.last_used = clock;
            Some(entry.value.clone())
        } else {
            None
        }
    }

    fn put(&mut self, key: K, value: V) {
        self.clock += 1;
        if self.entries.len() >= self.max_size && !self.entries.contains_key(&key) {
            self.evict_lru();
        }
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                last_used: self.clock,
            },
        );
    }

    fn invalidate(&mut self, key: &K) {
        self.entries.remove(key);
    }

    fn evict_lru(&mut self) {
        if let Some(oldest_key) = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone())
        {
            self.entries.remove(&oldest_key);
        }
    }

    /// Drops all expired entries. Called opportunistically when `auto_prune` is enabled.
    fn prune_expired(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.inserted_at.elapsed() <= ttl);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_size: usize,
    pub ttl: Duration,
    pub auto_prune: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl: Duration::from_secs(30 * 60),
            auto_prune: true,
        }
    }
}

/// The entity cache used by `StorageEngine`: one layer keyed by `(normalized_name, type)` for
/// dedup on insert, one keyed by `id` for read amplification.
pub struct EntityCache {
    by_key: LruTtl<(String, EntityType), String>,
    by_id: LruTtl<String, crate::models::Entity>,
    config: CacheConfig,
    ops_since_prune: u64,
}

impl EntityCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            by_key: LruTtl::new(config.max_size, config.ttl),
            by_id: LruTtl::new(config.max_size, config.ttl),
            config,
            ops_since_prune: 0,
        }
    }

    pub fn lookup_id(&mut self, normalized_name: &str, entity_type: EntityType) -> Option<String> {
        self.by_key.get(&(normalized_name.to_string(), entity_type))
    }

    pub fn lookup_entity(&mut self, id: &str) -> Option<crate::models::Entity> {
        self.by_id.get(&id.to_string())
    }

    pub fn insert(&mut self, entity: crate::models::Entity) {
        self.by_key
            .put((entity.normalized_name.clone(), entity.entity_type), entity.id.clone());
        self.by_id.put(entity.id.clone(), entity);
        self.maybe_prune();
    }

    pub fn invalidate(&mut self, id: &str, normalized_name: &str, entity_type: EntityType) {
        self.by_id.invalidate(&id.to_string());
        self.by_key.invalidate(&(normalized_name.to_string(), entity_type));
    }

    fn maybe_prune(&mut self) {
        if !self.config.auto_prune {
            return;
        }
        self.ops_since_prune += 1;
        if self.ops_since_prune >= 64 {
            self.ops_since_prune = 0;
            self.by_key.prune_expired();
            self.by_id.prune_expired();
        }
    }

    pub fn len(&self) -> (usize, usize) {
        (self.by_key.len(), self.by_id.len())
    }
}
