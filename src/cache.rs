use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::patterns;
use crate::types::Pattern;

/// Everything that determines the enumerated pattern set. Lengths keep the
/// caller's order: patterns are positional, so a permuted length list is a
/// different problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub stock: i64,
    pub lengths: Vec<i64>,
    pub kerf: i64,
    pub tolerance: f64,
    pub trim: i64,
}

impl Signature {
    pub fn key(&self) -> String {
        let params = format!(
            "{}-{:?}-{}-{}-{}",
            self.stock, self.lengths, self.kerf, self.tolerance, self.trim
        );
        let digest = format!("{:x}", Sha256::digest(params.as_bytes()));
        digest[..16].to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache io: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt cache entry: {0}")]
    Corrupt(String),
}

/// Content-addressed byte storage for pattern sets.
pub trait PatternStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError>;
}

/// Byte budget of a `MemoryStore` unless configured otherwise.
pub const DEFAULT_MEMORY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Default)]
struct MemoryEntries {
    entries: HashMap<String, Vec<u8>>,
    /// Least recently used first.
    order: VecDeque<String>,
    bytes: usize,
}

impl MemoryEntries {
    fn touch(&mut self, key: &str) {
        self.order.retain(|k| k != key);
        self.order.push_back(key.to_string());
    }

    fn remove(&mut self, key: &str) {
        if let Some(old) = self.entries.remove(key) {
            self.bytes -= old.len();
            self.order.retain(|k| k != key);
        }
    }
}

/// In-process store holding at most `max_bytes` of encoded pattern sets.
/// The least recently used entries are evicted first.
#[derive(Debug)]
pub struct MemoryStore {
    max_bytes: usize,
    inner: Mutex<MemoryEntries>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_max_bytes(DEFAULT_MEMORY_BYTES)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_bytes(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            inner: Mutex::new(MemoryEntries::default()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryEntries>, CacheError> {
        self.inner
            .lock()
            .map_err(|_| CacheError::Corrupt("memory store lock poisoned".to_string()))
    }
}

impl PatternStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut inner = self.lock()?;
        let found = inner.entries.get(key).cloned();
        if found.is_some() {
            inner.touch(key);
        }
        Ok(found)
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
        let mut inner = self.lock()?;
        inner.remove(key);
        if bytes.len() > self.max_bytes {
            tracing::debug!(
                key,
                bytes = bytes.len(),
                max_bytes = self.max_bytes,
                "pattern set too large for the memory cache"
            );
            return Ok(());
        }

        inner.entries.insert(key.to_string(), bytes.to_vec());
        inner.order.push_back(key.to_string());
        inner.bytes += bytes.len();

        while inner.bytes > self.max_bytes {
            let Some(oldest) = inner.order.front().cloned() else {
                break;
            };
            inner.remove(&oldest);
            tracing::debug!(key = %oldest, "evicted pattern set from the memory cache");
        }
        Ok(())
    }
}

/// One JSON file per signature. Writes go to a temporary file that is then
/// renamed over the target, so concurrent writers of the same signature
/// never leave a torn entry behind.
#[derive(Debug, Clone)]
pub struct DirStore {
    dir: PathBuf,
}

impl DirStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("patterns_{key}.json"))
    }
}

impl PatternStore for DirStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match std::fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let tmp = self
            .dir
            .join(format!(".patterns_{key}.{}.{nanos}.tmp", std::process::id()));
        std::fs::write(&tmp, bytes)?;
        if let Err(e) = std::fs::rename(&tmp, self.path_for(key)) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    signature: Signature,
    patterns: Vec<Pattern>,
}

pub struct PatternCache {
    store: Box<dyn PatternStore>,
    solution_limit: usize,
}

impl PatternCache {
    pub fn new(store: Box<dyn PatternStore>, solution_limit: usize) -> Self {
        Self {
            store,
            solution_limit,
        }
    }

    /// Cached patterns for `signature`, enumerating and storing them on a
    /// miss. Cache failures never surface; they only cost a recomputation.
    pub fn get_or_compute(&self, signature: &Signature) -> Vec<Pattern> {
        let key = signature.key();

        match self.lookup(&key, signature) {
            Ok(Some(found)) => {
                tracing::debug!(key = %key, patterns = found.len(), "pattern cache hit");
                return found;
            }
            Ok(None) => tracing::debug!(key = %key, "pattern cache miss"),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "discarding pattern cache entry")
            }
        }

        let computed = patterns::enumerate(
            signature.stock,
            &signature.lengths,
            signature.kerf,
            signature.trim,
            signature.tolerance,
            self.solution_limit,
        );

        if !computed.is_empty() {
            let entry = CacheEntry {
                signature: signature.clone(),
                patterns: computed,
            };
            match serde_json::to_vec(&entry) {
                Ok(bytes) => {
                    if let Err(e) = self.store.save(&key, &bytes) {
                        tracing::warn!(key = %key, error = %e, "failed to persist patterns");
                    }
                }
                Err(e) => tracing::warn!(key = %key, error = %e, "failed to encode patterns"),
            }
            return entry.patterns;
        }
        computed
    }

    fn lookup(
        &self,
        key: &str,
        signature: &Signature,
    ) -> Result<Option<Vec<Pattern>>, CacheError> {
        let Some(bytes) = self.store.load(key)? else {
            return Ok(None);
        };
        let entry: CacheEntry =
            serde_json::from_slice(&bytes).map_err(|e| CacheError::Corrupt(e.to_string()))?;

        if entry.signature != *signature {
            return Err(CacheError::Corrupt("signature mismatch".to_string()));
        }

        let n = signature.lengths.len();
        let mut valid = Vec::with_capacity(entry.patterns.len());
        for pattern in entry.patterns {
            if pattern.counts.len() != n {
                return Err(CacheError::Corrupt(format!(
                    "pattern has {} counts, expected {n}",
                    pattern.counts.len()
                )));
            }
            let material = Pattern::material_for(
                &pattern.counts,
                &signature.lengths,
                signature.kerf,
                signature.trim,
            );
            if material != pattern.material_used {
                return Err(CacheError::Corrupt("material does not match counts".to_string()));
            }
            if pattern.material_used <= signature.stock {
                valid.push(pattern);
            }
        }

        Ok(if valid.is_empty() { None } else { Some(valid) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn signature() -> Signature {
        Signature {
            stock: 60000,
            lengths: vec![4000, 2500, 1800],
            kerf: 10,
            tolerance: 0.05,
            trim: 100,
        }
    }

    /// Store wrapper that counts how often entries were written.
    struct CountingStore {
        inner: MemoryStore,
        saves: Arc<Mutex<u32>>,
    }

    impl PatternStore for CountingStore {
        fn load(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            self.inner.load(key)
        }

        fn save(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
            *self.saves.lock().unwrap() += 1;
            self.inner.save(key, bytes)
        }
    }

    fn sorted(mut patterns: Vec<Pattern>) -> Vec<Pattern> {
        patterns.sort_by(|a, b| a.counts.cmp(&b.counts));
        patterns
    }

    #[test]
    fn test_key_depends_on_length_order() {
        let sig = signature();
        let mut permuted = sig.clone();
        permuted.lengths.reverse();
        assert_ne!(sig.key(), permuted.key());
        assert_eq!(sig.key(), signature().key());
        assert_eq!(sig.key().len(), 16);
    }

    #[test]
    fn test_second_lookup_is_served_from_store() {
        let saves = Arc::new(Mutex::new(0));
        let cache = PatternCache::new(
            Box::new(CountingStore {
                inner: MemoryStore::new(),
                saves: saves.clone(),
            }),
            patterns::DEFAULT_SOLUTION_LIMIT,
        );

        let first = cache.get_or_compute(&signature());
        let second = cache.get_or_compute(&signature());

        assert!(!first.is_empty());
        assert_eq!(sorted(first), sorted(second));
        assert_eq!(*saves.lock().unwrap(), 1);
    }

    #[test]
    fn test_permuted_lengths_are_not_reused() {
        let cache = PatternCache::new(
            Box::new(MemoryStore::new()),
            patterns::DEFAULT_SOLUTION_LIMIT,
        );
        let forward = cache.get_or_compute(&signature());

        let mut permuted_sig = signature();
        permuted_sig.lengths.reverse();
        let permuted = cache.get_or_compute(&permuted_sig);

        // Same bars, but each count vector is mirrored to follow the new order.
        let mirrored: Vec<Pattern> = forward
            .iter()
            .map(|p| Pattern {
                counts: p.counts.iter().rev().copied().collect(),
                material_used: p.material_used,
            })
            .collect();
        assert_eq!(sorted(mirrored), sorted(permuted));
    }

    #[test]
    fn test_corrupt_entry_is_recomputed() {
        let store = MemoryStore::new();
        let sig = signature();
        store.save(&sig.key(), b"{not json").unwrap();

        let cache = PatternCache::new(Box::new(store), patterns::DEFAULT_SOLUTION_LIMIT);
        let found = cache.get_or_compute(&sig);
        let fresh = patterns::enumerate(
            60000,
            &[4000, 2500, 1800],
            10,
            100,
            0.05,
            patterns::DEFAULT_SOLUTION_LIMIT,
        );
        assert_eq!(sorted(found), sorted(fresh));
    }

    #[test]
    fn test_misaligned_entry_is_rejected() {
        let sig = signature();
        let entry = CacheEntry {
            signature: sig.clone(),
            patterns: vec![Pattern {
                counts: vec![15, 0],
                material_used: 60000,
            }],
        };
        let store = MemoryStore::new();
        store
            .save(&sig.key(), &serde_json::to_vec(&entry).unwrap())
            .unwrap();

        let cache = PatternCache::new(Box::new(store), patterns::DEFAULT_SOLUTION_LIMIT);
        let found = cache.get_or_compute(&sig);
        assert!(found.iter().all(|p| p.counts.len() == 3));
    }

    #[test]
    fn test_overlong_patterns_are_filtered_on_read() {
        let sig = Signature {
            stock: 10000,
            lengths: vec![3000],
            kerf: 0,
            tolerance: 0.5,
            trim: 0,
        };
        let entry = CacheEntry {
            signature: sig.clone(),
            patterns: vec![
                Pattern {
                    counts: vec![4],
                    material_used: 12000,
                },
                Pattern {
                    counts: vec![3],
                    material_used: 9000,
                },
            ],
        };
        let store = MemoryStore::new();
        store
            .save(&sig.key(), &serde_json::to_vec(&entry).unwrap())
            .unwrap();

        let cache = PatternCache::new(Box::new(store), patterns::DEFAULT_SOLUTION_LIMIT);
        let found = cache.get_or_compute(&sig);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].counts, vec![3]);
    }

    #[test]
    fn test_dir_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::new(dir.path().join("cache")).unwrap();
        assert!(store.load("abc").unwrap().is_none());

        store.save("abc", b"first").unwrap();
        store.save("abc", b"second").unwrap();
        assert_eq!(store.load("abc").unwrap().unwrap(), b"second");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("cache"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_empty_results_are_not_stored() {
        let saves = Arc::new(Mutex::new(0));
        let cache = PatternCache::new(
            Box::new(CountingStore {
                inner: MemoryStore::new(),
                saves: saves.clone(),
            }),
            100,
        );
        let sig = Signature {
            stock: 60000,
            lengths: vec![29000],
            kerf: 25,
            tolerance: 0.015,
            trim: 150,
        };
        assert!(cache.get_or_compute(&sig).is_empty());
        assert_eq!(*saves.lock().unwrap(), 0);
    }

    #[test]
    fn test_memory_store_evicts_least_recently_used() {
        let store = MemoryStore::with_max_bytes(10);
        store.save("a", b"aaaa").unwrap();
        store.save("b", b"bbbb").unwrap();
        // reading "a" makes "b" the oldest
        assert_eq!(store.load("a").unwrap().unwrap(), b"aaaa");
        store.save("c", b"cccc").unwrap();

        assert!(store.load("b").unwrap().is_none());
        assert_eq!(store.load("a").unwrap().unwrap(), b"aaaa");
        assert_eq!(store.load("c").unwrap().unwrap(), b"cccc");
    }

    #[test]
    fn test_memory_store_replacing_an_entry_frees_its_bytes() {
        let store = MemoryStore::with_max_bytes(10);
        store.save("a", b"aaaa").unwrap();
        store.save("a", b"aaaaaa").unwrap();
        store.save("b", b"bbbb").unwrap();

        assert_eq!(store.load("a").unwrap().unwrap(), b"aaaaaa");
        assert_eq!(store.load("b").unwrap().unwrap(), b"bbbb");
    }

    #[test]
    fn test_memory_store_skips_oversized_entries() {
        let store = MemoryStore::with_max_bytes(4);
        store.save("a", b"aaaa").unwrap();
        store.save("b", b"bbbbb").unwrap();

        assert!(store.load("b").unwrap().is_none());
        assert_eq!(store.load("a").unwrap().unwrap(), b"aaaa");
    }

    #[test]
    fn test_cache_keeps_working_past_its_memory_bound() {
        let cache = PatternCache::new(
            Box::new(MemoryStore::with_max_bytes(64)),
            patterns::DEFAULT_SOLUTION_LIMIT,
        );
        let first = cache.get_or_compute(&signature());
        let second = cache.get_or_compute(&signature());
        assert!(!first.is_empty());
        assert_eq!(sorted(first), sorted(second));
    }
}
