//! Streaming and one-shot BLAKE3 hashing for build fingerprints.
//!
//! Every digest in this system — artifact ids, action ids, tree hashes — is a
//! 32-byte BLAKE3 digest. This crate owns the one place that touches `blake3`
//! directly so the rest of the workspace only ever sees [`Digest`].

use std::fmt;

pub mod action;

pub use action::{Action, ActionInput, Platform};

/// A 32-byte BLAKE3 digest.
///
/// Thin newtype over `[u8; 32]`. `Display` renders lowercase hex, matching the
/// convention used for content hashes elsewhere in this codebase.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Digest(pub [u8; 32]);

impl Digest {
    /// View the digest as a byte slice.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse a digest from its lowercase hex representation.
    pub fn from_hex(s: &str) -> Result<Self, HashError> {
        if s.len() != 64 {
            return Err(HashError::MalformedHex(s.to_string()));
        }
        let mut out = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hi = hex_val(chunk[0]).ok_or_else(|| HashError::MalformedHex(s.to_string()))?;
            let lo = hex_val(chunk[1]).ok_or_else(|| HashError::MalformedHex(s.to_string()))?;
            out[i] = (hi << 4) | lo;
        }
        Ok(Digest(out))
    }
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<blake3::Hash> for Digest {
    fn from(h: blake3::Hash) -> Self {
        Digest(*h.as_bytes())
    }
}

/// Errors produced while hashing or parsing digests.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("malformed hex digest: {0}")]
    MalformedHex(String),
    #[error("io error while hashing: {0}")]
    Io(#[from] std::io::Error),
}

/// Incremental BLAKE3 hasher for streaming large inputs.
pub struct StreamingHasher {
    inner: blake3::Hasher,
}

impl StreamingHasher {
    /// Create an unkeyed streaming hasher.
    pub fn new() -> Self {
        Self {
            inner: blake3::Hasher::new(),
        }
    }

    /// Create a keyed streaming hasher for workspace-isolated (HMAC-style)
    /// fingerprints. `key` must be exactly 32 bytes.
    pub fn new_keyed(key: &[u8; 32]) -> Self {
        Self {
            inner: blake3::Hasher::new_keyed(key),
        }
    }

    /// Feed more bytes into the running hash.
    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        self.inner.update(bytes);
        self
    }

    /// Feed a reader's contents into the running hash.
    pub fn update_reader<R: std::io::Read>(&mut self, mut reader: R) -> Result<&mut Self, HashError> {
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.inner.update(&buf[..n]);
        }
        Ok(self)
    }

    /// Finalize and produce the digest. Consumes the hasher.
    pub fn finalize(self) -> Digest {
        Digest::from(self.inner.finalize())
    }
}

impl Default for StreamingHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot BLAKE3 digest of a byte slice.
pub fn hash_bytes(bytes: &[u8]) -> Digest {
    Digest::from(blake3::hash(bytes))
}

/// Derive a 32-byte key from a workspace secret, for keyed (cross-workspace
/// isolated) hashing. Uses BLAKE3's key-derivation mode so short or long
/// secrets are normalized into a fixed-size key.
pub fn derive_key(context: &str, secret: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(secret);
    *hasher.finalize().as_bytes()
}

/// A single entry in a file tree, as consumed by [`hash_tree`].
///
/// `kiln-hash` does not walk filesystems itself; callers (e.g. `kiln-sandbox`,
/// `kiln-cache`) collect the entries for the tree being hashed and sort them
/// by path before calling in, or pass them unsorted and let `hash_tree` sort.
pub struct TreeEntry<'a> {
    pub relative_path: &'a str,
    pub mode: u32,
    pub content_digest: Digest,
}

/// Digest of a file tree: BLAKE3 over the length-prefixed concatenation of
/// `(relative path, mode, content digest)` triples, sorted lexicographically
/// by path.
pub fn hash_tree(entries: &mut [TreeEntry<'_>]) -> Digest {
    entries.sort_by(|a, b| a.relative_path.cmp(b.relative_path));
    let mut hasher = StreamingHasher::new();
    for entry in entries.iter() {
        write_len_prefixed(&mut hasher, entry.relative_path.as_bytes());
        hasher.update(&entry.mode.to_le_bytes());
        hasher.update(entry.content_digest.as_bytes());
    }
    hasher.finalize()
}

fn write_len_prefixed(hasher: &mut StreamingHasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_roundtrips_through_hex() {
        let d = hash_bytes(b"hello world");
        let s = d.to_string();
        assert_eq!(s.len(), 64);
        assert_eq!(Digest::from_hex(&s).unwrap(), d);
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        assert!(Digest::from_hex("abcd").is_err());
    }

    #[test]
    fn streaming_matches_one_shot() {
        let mut hasher = StreamingHasher::new();
        hasher.update(b"hello ").update(b"world");
        let streamed = hasher.finalize();
        let oneshot = hash_bytes(b"hello world");
        assert_eq!(streamed, oneshot);
    }

    #[test]
    fn keyed_hash_differs_from_unkeyed() {
        let key = derive_key("kiln workspace secret v1", b"my-secret");
        let mut keyed = StreamingHasher::new_keyed(&key);
        keyed.update(b"payload");
        let keyed_digest = keyed.finalize();
        let unkeyed = hash_bytes(b"payload");
        assert_ne!(keyed_digest, unkeyed);
    }

    #[test]
    fn derive_key_is_deterministic() {
        let a = derive_key("ctx", b"secret");
        let b = derive_key("ctx", b"secret");
        assert_eq!(a, b);
        let c = derive_key("other-ctx", b"secret");
        assert_ne!(a, c);
    }

    #[test]
    fn tree_hash_is_order_independent_of_input_order() {
        let forward_digest = hash_bytes(b"a");
        let backward_digest = hash_bytes(b"b");
        let mut forward = vec![
            TreeEntry { relative_path: "a.txt", mode: 0o644, content_digest: forward_digest },
            TreeEntry { relative_path: "b.txt", mode: 0o644, content_digest: backward_digest },
        ];
        let mut backward = vec![
            TreeEntry { relative_path: "b.txt", mode: 0o644, content_digest: backward_digest },
            TreeEntry { relative_path: "a.txt", mode: 0o644, content_digest: forward_digest },
        ];
        assert_eq!(hash_tree(&mut forward), hash_tree(&mut backward));
    }

    #[test]
    fn tree_hash_changes_with_path_rename() {
        let digest = hash_bytes(b"contents");
        let mut original = vec![TreeEntry { relative_path: "a.txt", mode: 0o644, content_digest: digest }];
        let mut renamed = vec![TreeEntry { relative_path: "b.txt", mode: 0o644, content_digest: digest }];
        assert_ne!(hash_tree(&mut original), hash_tree(&mut renamed));
    }
}
