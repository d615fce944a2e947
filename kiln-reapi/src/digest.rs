//! Digest conversion between the native [`kiln_hash::Digest`] and the
//! REAPI-shaped `{hash, size_bytes}` pair.
//!
//! The native digest function is BLAKE3, not SHA-256; this type exists so
//! that fact is visible at every call site that crosses the REAPI boundary
//! rather than buried in a comment.

use crate::error::ReapiError;
use kiln_hash::Digest;
use std::fmt;

/// An action or blob digest as carried on the REAPI wire: a hash plus the
/// size of the content it names. REAPI digests are always `(hash, size)`
/// pairs so that clients can preallocate buffers before fetching; the hash
/// alone (a bare [`Digest`]) is what the rest of this workspace uses
/// internally.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ReapiDigest {
    pub hash: Digest,
    pub size_bytes: u64,
}

impl ReapiDigest {
    pub fn new(hash: Digest, size_bytes: u64) -> Self {
        Self { hash, size_bytes }
    }

    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self { hash: kiln_hash::hash_bytes(bytes), size_bytes: bytes.len() as u64 }
    }

    /// Parse the `{hash}/{size}` path segment pair used by
    /// `GET/PUT /v2/actionResults/{hash}/{size}`.
    pub fn from_path_segments(hash: &str, size: &str) -> Result<Self, ReapiError> {
        let hash = Digest::from_hex(hash)?;
        let size_bytes = size.parse::<u64>().map_err(|_| ReapiError::ExecutionFailed(format!("malformed size segment: {size}")))?;
        Ok(Self { hash, size_bytes })
    }
}

impl fmt::Display for ReapiDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.hash, self.size_bytes)
    }
}

/// Capabilities digest function name advertised on `/v2/capabilities`: this
/// adapter never advertises SHA-256, the REAPI default, because the native
/// store is keyed by BLAKE3.
pub const DIGEST_FUNCTION: &str = "BLAKE3";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_path_segments() {
        let d = ReapiDigest::of_bytes(b"hello");
        let s = d.to_string();
        let (hash, size) = s.split_once('/').unwrap();
        let parsed = ReapiDigest::from_path_segments(hash, size).unwrap();
        assert_eq!(d, parsed);
    }

    #[test]
    fn rejects_non_numeric_size() {
        let hash = kiln_hash::hash_bytes(b"x").to_string();
        assert!(ReapiDigest::from_path_segments(&hash, "not-a-number").is_err());
    }
}
