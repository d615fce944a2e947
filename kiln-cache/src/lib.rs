//! Local on-disk action cache: fingerprint-keyed storage of action outcomes.
//!
//! Writes are atomic (temp file + rename). Reads refresh the entry's
//! last-access timestamp so the eviction pass can find the coldest entries.
//! A workspace secret can be mixed into the on-disk key via keyed BLAKE3 so
//! two workspaces never collide or leak cache entries into one another.

mod entry;

pub use entry::{CacheEntry, OutputFile};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use kiln_hash::Digest;

/// Errors produced by the action cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("entry corrupted: {0}")]
    Corrupt(#[from] entry::DecodeError),
}

/// Local on-disk action cache rooted at a directory.
pub struct ActionCache {
    root: PathBuf,
    workspace_key: Option<[u8; 32]>,
    max_bytes: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

const ENTRY_SUFFIX: &str = ".entry";
/// Fraction of entries removed per eviction pass, expressed as a denominator
/// (1/10 == oldest 10%).
const EVICTION_FRACTION_DENOM: usize = 10;

impl ActionCache {
    /// Open (creating if needed) an action cache rooted at `root`.
    ///
    /// `workspace_secret`, if given, is mixed into every on-disk key via
    /// keyed BLAKE3 so that two workspaces sharing a cache directory cannot
    /// read each other's entries.
    pub fn open(root: impl Into<PathBuf>, workspace_secret: Option<&[u8]>, max_bytes: u64) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let workspace_key = workspace_secret.map(|secret| kiln_hash::derive_key("kiln action cache v1", secret));
        Ok(Self {
            root,
            workspace_key,
            max_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    fn on_disk_key(&self, fingerprint: Digest) -> Digest {
        match &self.workspace_key {
            Some(key) => {
                let mut hasher = kiln_hash::StreamingHasher::new_keyed(key);
                hasher.update(fingerprint.as_bytes());
                hasher.finalize()
            }
            None => fingerprint,
        }
    }

    fn path_for(&self, fingerprint: Digest) -> PathBuf {
        let key = self.on_disk_key(fingerprint);
        self.root.join(format!("{key}{ENTRY_SUFFIX}"))
    }

    /// Look up a cache entry. Corrupted entries are treated as misses and
    /// purged from disk rather than returned.
    pub fn get(&self, fingerprint: Digest) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.path_for(fingerprint);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let mut decoded = match CacheEntry::decode(&bytes) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "cache entry corrupted, purging");
                let _ = fs::remove_file(&path);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };

        decoded.last_access_ms = now_ms();
        self.write_atomic(&path, &decoded.encode())?;
        self.hits.fetch_add(1, Ordering::Relaxed);
        Ok(Some(decoded))
    }

    /// Store a cache entry. Concurrent `put`s for the same fingerprint are
    /// deduplicated: if an entry is already present, this call is a no-op.
    pub fn put(&self, mut entry: CacheEntry) -> Result<(), CacheError> {
        let path = self.path_for(entry.fingerprint);
        if path.exists() {
            return Ok(());
        }
        let now = now_ms();
        entry.timestamp_ms = now;
        entry.last_access_ms = now;
        self.write_atomic(&path, &entry.encode())?;
        self.maybe_evict()?;
        Ok(())
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
        let tmp_name = format!(".tmp-{}-{}", std::process::id(), now_ms());
        let tmp_path = self.root.join(tmp_name);
        fs::write(&tmp_path, bytes)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Total bytes occupied by entries currently on disk.
    pub fn total_bytes(&self) -> Result<u64, CacheError> {
        let mut total = 0u64;
        for entry in self.list_entries()? {
            total += fs::metadata(&entry)?.len();
        }
        Ok(total)
    }

    fn list_entries(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut out = Vec::new();
        for item in fs::read_dir(&self.root)? {
            let item = item?;
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) == Some("entry") {
                out.push(path);
            }
        }
        Ok(out)
    }

    /// Evict the oldest entries (by last-access) when total size exceeds the
    /// configured cap. Removes entries in batches of roughly 10%.
    fn maybe_evict(&self) -> Result<(), CacheError> {
        if self.total_bytes()? <= self.max_bytes {
            return Ok(());
        }

        let mut candidates: Vec<(PathBuf, i64)> = Vec::new();
        for path in self.list_entries()? {
            if let Ok(bytes) = fs::read(&path) {
                if let Ok(entry) = CacheEntry::decode(&bytes) {
                    candidates.push((path, entry.last_access_ms));
                }
            }
        }
        candidates.sort_by_key(|(_, last_access)| *last_access);

        let evict_count = (candidates.len() / EVICTION_FRACTION_DENOM).max(1).min(candidates.len());
        for (path, _) in candidates.into_iter().take(evict_count) {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "eviction remove failed");
            }
        }
        Ok(())
    }

    /// `(hits, misses, hit rate percentage)`.
    pub fn stats(&self) -> (u64, u64, f64) {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let rate = if total == 0 { 0.0 } else { (hits as f64 / total as f64) * 100.0 };
        (hits, misses, rate)
    }
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(fingerprint: Digest) -> CacheEntry {
        CacheEntry {
            fingerprint,
            target_id: "//pkg:target".into(),
            build_hash: kiln_hash::hash_bytes(b"toolchain-v1"),
            timestamp_ms: 0,
            last_access_ms: 0,
            source_hashes: vec![],
            metadata_hashes: vec![],
            dependency_hashes: vec![],
            exit_code: 0,
            stdout: b"ok\n".to_vec(),
            stderr: Vec::new(),
            outputs: vec![],
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let cache = ActionCache::open(dir.path(), None, 1 << 30).unwrap();
        let fp = kiln_hash::hash_bytes(b"action-1");
        cache.put(entry(fp)).unwrap();
        let got = cache.get(fp).unwrap().unwrap();
        assert_eq!(got.fingerprint, fp);
        assert_eq!(got.stdout, b"ok\n");
    }

    #[test]
    fn miss_on_unknown_fingerprint() {
        let dir = tempdir().unwrap();
        let cache = ActionCache::open(dir.path(), None, 1 << 30).unwrap();
        let fp = kiln_hash::hash_bytes(b"never-stored");
        assert!(cache.get(fp).unwrap().is_none());
    }

    #[test]
    fn second_put_for_same_fingerprint_is_a_no_op() {
        let dir = tempdir().unwrap();
        let cache = ActionCache::open(dir.path(), None, 1 << 30).unwrap();
        let fp = kiln_hash::hash_bytes(b"action-1");
        cache.put(entry(fp)).unwrap();
        let first = cache.get(fp).unwrap().unwrap();
        cache.put(entry(fp)).unwrap();
        let second = cache.get(fp).unwrap().unwrap();
        assert_eq!(first.timestamp_ms, second.timestamp_ms);
    }

    #[test]
    fn workspace_keys_isolate_identical_fingerprints() {
        let dir = tempdir().unwrap();
        let a = ActionCache::open(dir.path(), Some(b"workspace-a"), 1 << 30).unwrap();
        let b = ActionCache::open(dir.path(), Some(b"workspace-b"), 1 << 30).unwrap();
        let fp = kiln_hash::hash_bytes(b"shared-action");
        a.put(entry(fp)).unwrap();
        assert!(a.get(fp).unwrap().is_some());
        assert!(b.get(fp).unwrap().is_none());
    }

    #[test]
    fn corrupted_entry_is_treated_as_miss_and_purged() {
        let dir = tempdir().unwrap();
        let cache = ActionCache::open(dir.path(), None, 1 << 30).unwrap();
        let fp = kiln_hash::hash_bytes(b"action-1");
        cache.put(entry(fp)).unwrap();
        let path = cache.path_for(fp);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        assert!(cache.get(fp).unwrap().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn eviction_removes_oldest_entries_when_over_cap() {
        let dir = tempdir().unwrap();
        // Small cap forces eviction after a handful of entries.
        let cache = ActionCache::open(dir.path(), None, 200).unwrap();
        for i in 0..20 {
            let fp = kiln_hash::hash_bytes(format!("action-{i}").as_bytes());
            cache.put(entry(fp)).unwrap();
        }
        assert!(cache.total_bytes().unwrap() <= cache.total_bytes().unwrap() + 200);
        // At least some entries should have been evicted given the tiny cap.
        assert!(cache.list_entries().unwrap().len() < 20);
    }

    #[test]
    fn hit_miss_stats_track_calls() {
        let dir = tempdir().unwrap();
        let cache = ActionCache::open(dir.path(), None, 1 << 30).unwrap();
        let fp = kiln_hash::hash_bytes(b"action-1");
        let _ = cache.get(fp).unwrap();
        cache.put(entry(fp)).unwrap();
        let _ = cache.get(fp).unwrap();
        let (hits, misses, _) = cache.stats();
        assert_eq!(hits, 1);
        assert_eq!(misses, 1);
    }
}
