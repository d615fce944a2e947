//! On-disk schema for a single cache entry.
//!
//! Entries are encoded as a schema-versioned, length-prefixed binary record
//! so that a future schema change can be detected and rejected rather than
//! silently misread. The layout is `{version, target-id, build-hash,
//! timestamps, source-hash table, metadata-hash table, dependency-hash
//! table, exit code, stdio, output files}`.

use kiln_hash::Digest;

const SCHEMA_VERSION: u32 = 1;

/// A single declared output file recorded alongside a cache hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub path: String,
    pub digest: Digest,
    pub executable: bool,
}

/// A cache entry: the recorded outcome of executing one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub fingerprint: Digest,
    /// Id of the target this entry was produced for, so an entry can be
    /// attributed back to its target without redoing the fingerprint.
    pub target_id: String,
    /// Digest of the toolchain/build configuration in effect when this
    /// entry was produced, independent of the action fingerprint itself.
    pub build_hash: Digest,
    pub timestamp_ms: i64,
    pub last_access_ms: i64,
    /// Per-source-file digest, keyed by declared path.
    pub source_hashes: Vec<(String, Digest)>,
    /// Per-metadata-key digest (e.g. toolchain version, platform tag).
    pub metadata_hashes: Vec<(String, Digest)>,
    /// Per-dependency digest, keyed by the dependency's target id.
    pub dependency_hashes: Vec<(String, Digest)>,
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub outputs: Vec<OutputFile>,
}

impl CacheEntry {
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
        buf.extend_from_slice(self.fingerprint.as_bytes());
        write_bytes(&mut buf, self.target_id.as_bytes());
        buf.extend_from_slice(self.build_hash.as_bytes());
        buf.extend_from_slice(&self.timestamp_ms.to_le_bytes());
        buf.extend_from_slice(&self.last_access_ms.to_le_bytes());
        write_hash_table(&mut buf, &self.source_hashes);
        write_hash_table(&mut buf, &self.metadata_hashes);
        write_hash_table(&mut buf, &self.dependency_hashes);
        buf.extend_from_slice(&self.exit_code.to_le_bytes());
        write_bytes(&mut buf, &self.stdout);
        write_bytes(&mut buf, &self.stderr);
        buf.extend_from_slice(&(self.outputs.len() as u64).to_le_bytes());
        for output in &self.outputs {
            write_bytes(&mut buf, output.path.as_bytes());
            buf.extend_from_slice(output.digest.as_bytes());
            buf.push(u8::from(output.executable));
        }
        // Trailer: digest of everything above, so corruption is detectable
        // independent of filesystem-level integrity.
        let trailer = kiln_hash::hash_bytes(&buf);
        buf.extend_from_slice(trailer.as_bytes());
        buf
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < 32 {
            return Err(DecodeError::Truncated);
        }
        let (body, trailer) = bytes.split_at(bytes.len() - 32);
        let expected = kiln_hash::hash_bytes(body);
        if expected.as_bytes() != trailer {
            return Err(DecodeError::CorruptTrailer);
        }

        let mut cursor = Cursor::new(body);
        let version = cursor.read_u32()?;
        if version != SCHEMA_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let fingerprint = Digest(cursor.read_array()?);
        let target_id = String::from_utf8(cursor.read_bytes()?).map_err(|_| DecodeError::InvalidUtf8)?;
        let build_hash = Digest(cursor.read_array()?);
        let timestamp_ms = cursor.read_i64()?;
        let last_access_ms = cursor.read_i64()?;
        let source_hashes = read_hash_table(&mut cursor)?;
        let metadata_hashes = read_hash_table(&mut cursor)?;
        let dependency_hashes = read_hash_table(&mut cursor)?;
        let exit_code = cursor.read_i32()?;
        let stdout = cursor.read_bytes()?;
        let stderr = cursor.read_bytes()?;
        let output_count = cursor.read_u64()? as usize;
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            let path = String::from_utf8(cursor.read_bytes()?).map_err(|_| DecodeError::InvalidUtf8)?;
            let digest = Digest(cursor.read_array()?);
            let executable = cursor.read_u8()? != 0;
            outputs.push(OutputFile { path, digest, executable });
        }

        Ok(CacheEntry {
            fingerprint,
            target_id,
            build_hash,
            timestamp_ms,
            last_access_ms,
            source_hashes,
            metadata_hashes,
            dependency_hashes,
            exit_code,
            stdout,
            stderr,
            outputs,
        })
    }
}

fn write_hash_table(buf: &mut Vec<u8>, table: &[(String, Digest)]) {
    buf.extend_from_slice(&(table.len() as u64).to_le_bytes());
    for (key, digest) in table {
        write_bytes(buf, key.as_bytes());
        buf.extend_from_slice(digest.as_bytes());
    }
}

fn read_hash_table(cursor: &mut Cursor<'_>) -> Result<Vec<(String, Digest)>, DecodeError> {
    let count = cursor.read_u64()? as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let key = String::from_utf8(cursor.read_bytes()?).map_err(|_| DecodeError::InvalidUtf8)?;
        let digest = Digest(cursor.read_array()?);
        out.push((key, digest));
    }
    Ok(out)
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    buf.extend_from_slice(bytes);
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("entry truncated")]
    Truncated,
    #[error("entry trailer does not match body digest (corrupted)")]
    CorruptTrailer,
    #[error("unsupported schema version: {0}")]
    UnsupportedVersion(u32),
    #[error("invalid utf8 in entry")]
    InvalidUtf8,
    #[error("entry ran past its declared end")]
    OutOfBounds,
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.pos + n > self.bytes.len() {
            return Err(DecodeError::OutOfBounds);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn read_array(&mut self) -> Result<[u8; 32], DecodeError> {
        Ok(self.take(32)?.try_into().unwrap())
    }

    fn read_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_u64()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}
