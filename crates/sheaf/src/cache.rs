//! Cache coordinator
//!
//! Memoizes expensive per-class artifacts (parsed dependency facts,
//! compiled output) across variant sets and pipeline runs. Keys carry the
//! source content fingerprint and only the variant names the class actually
//! branches on, so unrelated variant changes never invalidate an entry.
//!
//! Writes are exclusive per key, not globally: concurrent resolutions of
//! unrelated classes do not serialize on each other. Readers observe a
//! complete entry or a miss, never a partial one.

use std::sync::{Arc, Mutex, RwLock};

use log::trace;
use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};

/// Cache key: class identity, content fingerprint, and the relevant variant
/// subset (sorted name/value pairs).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub class_id: String,
    pub fingerprint: String,
    pub variants: Vec<(String, String)>,
}

impl CacheKey {
    /// Build a key from an unsorted relevant-variant selection.
    pub fn new(
        class_id: impl Into<String>,
        fingerprint: impl Into<String>,
        mut variants: Vec<(String, String)>,
    ) -> Self {
        variants.sort();
        Self {
            class_id: class_id.into(),
            fingerprint: fingerprint.into(),
            variants,
        }
    }
}

/// Short fingerprint form for log lines; fingerprints shorter than the
/// prefix pass through whole.
fn fingerprint_prefix(key: &CacheKey) -> &str {
    key.fingerprint.get(..8).unwrap_or(&key.fingerprint)
}

/// Hex-encoded SHA-256 content fingerprint.
pub fn fingerprint(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// In-memory cache with per-key write exclusivity.
#[derive(Debug)]
pub struct Cache<V> {
    entries: RwLock<FxHashMap<CacheKey, Arc<V>>>,
    key_locks: Mutex<FxHashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl<V> Default for Cache<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
            key_locks: Mutex::new(FxHashMap::default()),
        }
    }
}

impl<V> Cache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a complete entry; `None` is a miss.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<V>> {
        self.entries
            .read()
            .expect("cache map poisoned")
            .get(key)
            .cloned()
    }

    /// Store a complete entry, replacing any previous value for the key.
    pub fn put(&self, key: CacheKey, value: V) -> Arc<V> {
        let value = Arc::new(value);
        self.entries
            .write()
            .expect("cache map poisoned")
            .insert(key, value.clone());
        value
    }

    /// Look up an entry, computing and storing it on a miss.
    ///
    /// The computation runs under a lock private to this key, so two callers
    /// racing on the same key compute once while callers on other keys
    /// proceed unblocked.
    pub fn get_or_insert_with<F>(&self, key: &CacheKey, compute: F) -> anyhow::Result<Arc<V>>
    where
        F: FnOnce() -> anyhow::Result<V>,
    {
        if let Some(value) = self.get(key) {
            trace!("Cache hit: {} ({})", key.class_id, fingerprint_prefix(key));
            return Ok(value);
        }

        let key_lock = self.lock_for(key);
        let _guard = key_lock.lock().expect("cache key lock poisoned");

        // Another writer may have completed while we waited.
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        trace!("Cache miss: {} ({})", key.class_id, fingerprint_prefix(key));
        let value = compute()?;
        Ok(self.put(key.clone(), value))
    }

    fn lock_for(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().expect("cache lock map poisoned");
        locks.entry(key.clone()).or_default().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("cache map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn key(class: &str, fp: &str) -> CacheKey {
        CacheKey::new(class, fp, vec![])
    }

    #[test]
    fn round_trip_returns_value_unchanged() {
        let cache = Cache::new();
        let k = key("app.Main", "abc");
        cache.put(k.clone(), "compiled".to_owned());
        assert_eq!(cache.get(&k).as_deref(), Some(&"compiled".to_owned()));
    }

    #[test]
    fn fingerprint_change_is_a_miss() {
        let cache = Cache::new();
        cache.put(key("app.Main", "old"), "stale".to_owned());
        assert!(cache.get(&key("app.Main", "new")).is_none());
    }

    #[test]
    fn key_includes_only_relevant_variants() {
        let k1 = CacheKey::new(
            "app.Main",
            "fp",
            vec![("engine.client".into(), "gecko".into())],
        );
        // Same relevant subset in a different declaration order.
        let k2 = CacheKey::new(
            "app.Main",
            "fp",
            vec![("engine.client".into(), "gecko".into())],
        );
        assert_eq!(k1, k2);

        let cache = Cache::new();
        cache.put(k1, 7u32);
        assert_eq!(cache.get(&k2).as_deref(), Some(&7));
    }

    #[test]
    fn variant_subset_is_order_insensitive() {
        let k1 = CacheKey::new(
            "c",
            "fp",
            vec![("b".into(), "2".into()), ("a".into(), "1".into())],
        );
        let k2 = CacheKey::new(
            "c",
            "fp",
            vec![("a".into(), "1".into()), ("b".into(), "2".into())],
        );
        assert_eq!(k1, k2);
    }

    #[test]
    fn get_or_insert_computes_once() {
        let cache = Cache::new();
        let calls = AtomicUsize::new(0);
        let k = key("app.Main", "fp");

        for _ in 0..3 {
            let value = cache
                .get_or_insert_with(&k, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42u32)
                })
                .unwrap();
            assert_eq!(*value, 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_computation_stores_nothing() {
        let cache: Cache<u32> = Cache::new();
        let k = key("app.Main", "fp");
        assert!(
            cache
                .get_or_insert_with(&k, || Err(anyhow::anyhow!("boom")))
                .is_err()
        );
        assert!(cache.get(&k).is_none());
        // A later computation succeeds normally.
        assert_eq!(*cache.get_or_insert_with(&k, || Ok(1)).unwrap(), 1);
    }

    #[test]
    fn short_fingerprint_keys_are_usable() {
        // Keys are public; callers are not obliged to hand in 64-char hex.
        let cache = Cache::new();
        let k = key("app.Main", "ab");
        assert_eq!(*cache.get_or_insert_with(&k, || Ok(5u32)).unwrap(), 5);
        assert_eq!(*cache.get_or_insert_with(&k, || Ok(9u32)).unwrap(), 5);
        assert_eq!(fingerprint_prefix(&k), "ab");
    }

    #[test]
    fn fingerprints_are_stable_and_content_sensitive() {
        assert_eq!(fingerprint(b"abc"), fingerprint(b"abc"));
        assert_ne!(fingerprint(b"abc"), fingerprint(b"abd"));
        assert_eq!(fingerprint(b"abc").len(), 64);
    }
}
