//! Shared cache of schema skeletons keyed by expression digest.
//!
//! Lookups move the entry to the back of the insertion order so the front
//! is always the least recently used. Builds run outside the lock; when two
//! threads build the same key, the first insert wins and the other result is
//! dropped so every caller sees the same `Arc`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::EngineConfig;
use crate::errors::EngineResult;
use crate::micheline::{encode, Node};
use crate::michelson::builder::SchemaBuilder;
use crate::michelson::types::TypeNode;
use crate::query::guards::clamp_cache_size;

/// Protocol version plus the digest of the binary-encoded type expression.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SchemaKey {
    version: String,
    digest: [u8; 32],
}

impl SchemaKey {
    pub fn new(version: &str, expr: &Node) -> EngineResult<Self> {
        let encoded = encode(expr)?;
        let digest: [u8; 32] = Sha256::digest(&encoded).into();
        Ok(Self {
            version: version.to_string(),
            digest,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub races_lost: u64,
}

pub struct SchemaCache {
    max_entries: usize,
    builder: SchemaBuilder,
    cache: Mutex<IndexMap<SchemaKey, Arc<TypeNode>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    races_lost: AtomicU64,
}

impl SchemaCache {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_entries: clamp_cache_size(config.schema_cache_size),
            builder: SchemaBuilder::new(config),
            cache: Mutex::new(IndexMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            races_lost: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &SchemaKey) -> Option<Arc<TypeNode>> {
        let mut cache = self.cache.lock();
        let entry = cache.shift_remove(key)?;
        cache.insert(key.clone(), Arc::clone(&entry));
        Some(entry)
    }

    /// Return the cached skeleton for `expr`, building it on a miss.
    ///
    /// Build errors are returned to the caller and never cached.
    pub fn get_or_build(&self, version: &str, expr: &Node) -> EngineResult<Arc<TypeNode>> {
        let key = SchemaKey::new(version, expr)?;
        if let Some(found) = self.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(found);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let built = Arc::new(self.builder.build(expr)?);

        let mut cache = self.cache.lock();
        if let Some(existing) = cache.get(&key) {
            self.races_lost.fetch_add(1, Ordering::Relaxed);
            debug!(digest = %key.digest_hex(), "schema build lost race, discarding");
            return Ok(Arc::clone(existing));
        }
        debug!(digest = %key.digest_hex(), version, "schema cached");
        cache.insert(key, Arc::clone(&built));
        while cache.len() > self.max_entries {
            cache.shift_remove_index(0);
        }
        Ok(built)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            max_entries: self.max_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            races_lost: self.races_lost.load(Ordering::Relaxed),
        }
    }
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::micheline::parse_expr;

    fn expr(src: &str) -> Node {
        parse_expr(src).unwrap()
    }

    #[test]
    fn second_lookup_hits() {
        let cache = SchemaCache::default();
        let ty = expr("pair (address %owner) (big_map %ledger address nat)");
        let first = cache.get_or_build("PtMumbai", &ty).unwrap();
        let second = cache.get_or_build("PtMumbai", &ty).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[test]
    fn version_is_part_of_the_key() {
        let cache = SchemaCache::default();
        let ty = expr("nat");
        let a = cache.get_or_build("v1", &ty).unwrap();
        let b = cache.get_or_build("v2", &ty).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = SchemaCache::new(&EngineConfig {
            schema_cache_size: 2,
            ..EngineConfig::default()
        });
        let (a, b, c) = (expr("nat"), expr("int"), expr("string"));
        cache.get_or_build("v", &a).unwrap();
        cache.get_or_build("v", &b).unwrap();
        cache.get_or_build("v", &a).unwrap();
        cache.get_or_build("v", &c).unwrap();
        assert!(cache.get(&SchemaKey::new("v", &a).unwrap()).is_some());
        assert!(cache.get(&SchemaKey::new("v", &b).unwrap()).is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn build_errors_are_not_cached() {
        let cache = SchemaCache::default();
        assert!(cache.get_or_build("v", &expr("Unit")).is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_builders_share_one_skeleton() {
        let cache = SchemaCache::default();
        let ty = expr("or (pair %transfer address nat) (map %batch string (list nat))");
        let results: Vec<Arc<TypeNode>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| cache.get_or_build("v", &ty).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for result in &results[1..] {
            assert!(Arc::ptr_eq(&results[0], result));
        }
        assert_eq!(cache.len(), 1);
        let stats = cache.stats();
        assert_eq!(stats.hits + stats.misses, 8);
    }
}
