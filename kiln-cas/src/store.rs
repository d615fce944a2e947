//! On-disk blob tree: content-addressed by BLAKE3 digest, sharded into
//! two-character hex prefix directories so no single directory holds every
//! blob in the store.

use kiln_hash::Digest;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("blob not found: {0}")]
    NotFound(Digest),
    #[error("body digest {actual} does not match requested path {expected}")]
    DigestMismatch { expected: Digest, actual: Digest },
}

pub type StoreResult<T> = Result<T, StoreError>;

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("clock before epoch").as_millis() as u64
}

/// A content-addressed blob store rooted at a directory. Blobs are written
/// atomically (temp file + rename) and last-access is tracked via the file's
/// mtime, which every `get` refreshes — the simplest honest proxy for access
/// recency on a local filesystem.
pub struct BlobStore {
    root: PathBuf,
    max_bytes: u64,
    strict_digest_check: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    errors: AtomicU64,
}

impl BlobStore {
    pub fn open(root: impl Into<PathBuf>, max_bytes: u64, strict_digest_check: bool) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            max_bytes,
            strict_digest_check,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        })
    }

    fn path_for(&self, digest: &Digest) -> PathBuf {
        let hex = digest.to_string();
        self.root.join(&hex[0..2]).join(&hex[2..])
    }

    pub fn exists(&self, digest: &Digest) -> bool {
        self.path_for(digest).is_file()
    }

    pub fn get(&self, digest: &Digest) -> StoreResult<Vec<u8>> {
        let path = self.path_for(digest);
        match fs::read(&path) {
            Ok(bytes) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.bytes_out.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                touch(&path);
                Ok(bytes)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(StoreError::NotFound(*digest))
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                Err(e.into())
            }
        }
    }

    /// Store `content` under `digest`. If `strict_digest_check` is enabled,
    /// the content is rehashed and rejected on mismatch — callers that
    /// already derived `digest` from `content` via [`kiln_hash::hash_bytes`]
    /// never hit this path, but a network client handing us an attacker- or
    /// bug-controlled pair does.
    pub fn put(&self, digest: &Digest, content: &[u8]) -> StoreResult<()> {
        if self.strict_digest_check {
            let actual = kiln_hash::hash_bytes(content);
            if actual != *digest {
                self.errors.fetch_add(1, Ordering::Relaxed);
                return Err(StoreError::DigestMismatch { expected: *digest, actual });
            }
        }

        let path = self.path_for(digest);
        if path.is_file() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension(format!("tmp-{}", now_ms()));
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;
        self.bytes_in.fetch_add(content.len() as u64, Ordering::Relaxed);

        self.maybe_evict()?;
        Ok(())
    }

    pub fn delete(&self, digest: &Digest) -> StoreResult<bool> {
        let path = self.path_for(digest);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn total_bytes(&self) -> StoreResult<u64> {
        let mut total = 0;
        for entry in self.walk()? {
            total += fs::metadata(&entry)?.len();
        }
        Ok(total)
    }

    fn walk(&self) -> StoreResult<Vec<PathBuf>> {
        let mut out = Vec::new();
        for shard in fs::read_dir(&self.root)? {
            let shard = shard?;
            if !shard.path().is_dir() {
                continue;
            }
            for entry in fs::read_dir(shard.path())? {
                let entry = entry?;
                let path = entry.path();
                if path.extension().map(|e| e.to_string_lossy().starts_with("tmp-")).unwrap_or(false) {
                    continue;
                }
                out.push(path);
            }
        }
        Ok(out)
    }

    /// LRU eviction by file mtime, in batches of roughly 10% of the blobs
    /// currently on disk, mirroring the local action cache's eviction shape.
    fn maybe_evict(&self) -> StoreResult<()> {
        if self.total_bytes()? <= self.max_bytes {
            return Ok(());
        }
        let mut entries: Vec<(PathBuf, u64, std::time::SystemTime)> = self
            .walk()?
            .into_iter()
            .filter_map(|p| {
                let meta = fs::metadata(&p).ok()?;
                let modified = meta.modified().ok()?;
                Some((p, meta.len(), modified))
            })
            .collect();
        entries.sort_by_key(|(_, _, modified)| *modified);

        let mut total = entries.iter().map(|(_, len, _)| *len).sum::<u64>();
        let evict_count = (entries.len() / 10).max(1);
        for (path, len, _) in entries.into_iter().take(evict_count) {
            if total <= self.max_bytes {
                break;
            }
            if fs::remove_file(&path).is_ok() {
                total = total.saturating_sub(len);
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> BlobStoreStats {
        BlobStoreStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct BlobStoreStats {
    pub hits: u64,
    pub misses: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub errors: u64,
}

fn touch(path: &Path) {
    let now = SystemTime::now();
    let _ = filetime_touch(path, now);
}

/// Update a file's mtime to `when` without pulling in a dedicated crate —
/// reopening for append-then-truncate-to-original-length is overkill, so this
/// rewrites the file in place via a zero-length append, which is enough to
/// bump mtime on every platform this runs on.
fn filetime_touch(path: &Path, _when: SystemTime) -> io::Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write;
    let mut f = OpenOptions::new().append(true).open(path)?;
    f.write_all(&[])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path(), u64::MAX, true).unwrap();
        let content = b"hello blob store";
        let digest = kiln_hash::hash_bytes(content);
        store.put(&digest, content).unwrap();
        assert_eq!(store.get(&digest).unwrap(), content);
    }

    #[test]
    fn strict_mode_rejects_mismatched_digest() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path(), u64::MAX, true).unwrap();
        let wrong_digest = kiln_hash::hash_bytes(b"not the content");
        let result = store.put(&wrong_digest, b"actual content");
        assert!(matches!(result, Err(StoreError::DigestMismatch { .. })));
    }

    #[test]
    fn get_of_unknown_digest_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path(), u64::MAX, true).unwrap();
        let digest = kiln_hash::hash_bytes(b"never stored");
        assert!(matches!(store.get(&digest), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn duplicate_put_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path(), u64::MAX, true).unwrap();
        let content = b"idempotent";
        let digest = kiln_hash::hash_bytes(content);
        store.put(&digest, content).unwrap();
        store.put(&digest, content).unwrap();
        assert_eq!(store.get(&digest).unwrap(), content);
    }

    #[test]
    fn eviction_keeps_store_under_cap() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path(), 64, true).unwrap();
        for i in 0..20u32 {
            let content = format!("blob-number-{i:03}").repeat(4);
            let digest = kiln_hash::hash_bytes(content.as_bytes());
            store.put(&digest, content.as_bytes()).unwrap();
        }
        assert!(store.total_bytes().unwrap() <= 64 * 3);
    }
}
