//! Compact binary wire format for the REAPI-shaped endpoints.
//!
//! Every message is schema-versioned and length-prefixed rather than
//! self-describing, matching the on-disk cache entry format: a reader
//! that sees an unexpected version rejects the message outright instead
//! of guessing at a layout.

use crate::capabilities::Capabilities;
use crate::error::ReapiError;
use kiln_hash::{Action, ActionInput, Digest, Platform};

const SCHEMA_VERSION: u32 = 1;

/// A single declared input on the wire: the native [`ActionInput`] plus an
/// executable bit, which `kiln_hash::ActionInput` does not itself carry
/// (fingerprinting never needs it — only the bytes at the declared path do).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireInput {
    pub artifact_id: Digest,
    pub declared_path: String,
    pub executable: bool,
}

/// A single declared output on the wire: a path plus whether it names a
/// directory tree rather than a single file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireOutput {
    pub declared_path: String,
    pub is_directory: bool,
}

/// The request body for `POST /v2/actions/execute`, per the action wire
/// format: action id, command, env, inputs, outputs, capabilities,
/// priority, timeout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionRequest {
    pub action_id: Digest,
    pub command: Vec<String>,
    pub env: Vec<(String, String)>,
    pub inputs: Vec<WireInput>,
    pub outputs: Vec<WireOutput>,
    pub capabilities: Capabilities,
    pub priority: u8,
    pub timeout_ms: u64,
}

impl ActionRequest {
    /// Build a request from a native action, computing its id as the
    /// action's fingerprint. Executable bits and directory flags are not
    /// tracked by the native type and default to `false`.
    pub fn from_action(action: &Action, capabilities: Capabilities, priority: u8) -> Self {
        Self {
            action_id: action.fingerprint(),
            command: action.command.clone(),
            env: action.env.clone(),
            inputs: action
                .inputs
                .iter()
                .map(|i| WireInput { artifact_id: i.digest, declared_path: i.declared_path.clone(), executable: false })
                .collect(),
            outputs: action.outputs.iter().map(|p| WireOutput { declared_path: p.clone(), is_directory: false }).collect(),
            capabilities,
            priority,
            timeout_ms: action.timeout_ms,
        }
    }

    /// Reconstruct the native action this request describes, discarding the
    /// wire-only executable/directory flags.
    pub fn to_action(&self, salt: Option<Vec<u8>>) -> Action {
        Action {
            command: self.command.clone(),
            env: self.env.clone(),
            inputs: self
                .inputs
                .iter()
                .map(|i| ActionInput { declared_path: i.declared_path.clone(), digest: i.artifact_id })
                .collect(),
            outputs: self.outputs.iter().map(|o| o.declared_path.clone()).collect(),
            platform: self.capabilities.to_platform(),
            timeout_ms: self.timeout_ms,
            salt,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
        buf.extend_from_slice(self.action_id.as_bytes());
        write_str_list(&mut buf, &self.command);

        buf.extend_from_slice(&(self.env.len() as u64).to_le_bytes());
        for (k, v) in &self.env {
            write_str(&mut buf, k);
            write_str(&mut buf, v);
        }

        buf.extend_from_slice(&(self.inputs.len() as u64).to_le_bytes());
        for input in &self.inputs {
            buf.extend_from_slice(input.artifact_id.as_bytes());
            write_str(&mut buf, &input.declared_path);
            buf.push(u8::from(input.executable));
        }

        buf.extend_from_slice(&(self.outputs.len() as u64).to_le_bytes());
        for output in &self.outputs {
            write_str(&mut buf, &output.declared_path);
            buf.push(u8::from(output.is_directory));
        }

        write_capabilities(&mut buf, &self.capabilities);
        buf.push(self.priority);
        buf.extend_from_slice(&self.timeout_ms.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ReapiError> {
        if bytes.len() < 4 {
            return Err(ReapiError::Truncated);
        }
        let mut cursor = Cursor::new(bytes);
        let version = cursor.read_u32()?;
        if version != SCHEMA_VERSION {
            return Err(ReapiError::UnsupportedVersion(version));
        }
        let action_id = Digest(cursor.read_array()?);
        let command = read_str_list(&mut cursor)?;

        let env_count = cursor.read_u64()? as usize;
        let mut env = Vec::with_capacity(env_count);
        for _ in 0..env_count {
            env.push((read_str(&mut cursor)?, read_str(&mut cursor)?));
        }

        let input_count = cursor.read_u64()? as usize;
        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            let artifact_id = Digest(cursor.read_array()?);
            let declared_path = read_str(&mut cursor)?;
            let executable = cursor.read_u8()? != 0;
            inputs.push(WireInput { artifact_id, declared_path, executable });
        }

        let output_count = cursor.read_u64()? as usize;
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            let declared_path = read_str(&mut cursor)?;
            let is_directory = cursor.read_u8()? != 0;
            outputs.push(WireOutput { declared_path, is_directory });
        }

        let capabilities = read_capabilities(&mut cursor)?;
        let priority = cursor.read_u8()?;
        let timeout_ms = cursor.read_u64()?;

        Ok(ActionRequest { action_id, command, env, inputs, outputs, capabilities, priority, timeout_ms })
    }
}

/// The stored or returned result of executing an action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionResult {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub output_files: Vec<(String, Digest, bool)>,
}

impl ActionResult {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.exit_code.to_le_bytes());
        write_bytes(&mut buf, &self.stdout);
        write_bytes(&mut buf, &self.stderr);
        buf.extend_from_slice(&(self.output_files.len() as u64).to_le_bytes());
        for (path, digest, executable) in &self.output_files {
            write_str(&mut buf, path);
            buf.extend_from_slice(digest.as_bytes());
            buf.push(u8::from(*executable));
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ReapiError> {
        if bytes.len() < 4 {
            return Err(ReapiError::Truncated);
        }
        let mut cursor = Cursor::new(bytes);
        let version = cursor.read_u32()?;
        if version != SCHEMA_VERSION {
            return Err(ReapiError::UnsupportedVersion(version));
        }
        let exit_code = cursor.read_i32()?;
        let stdout = cursor.read_bytes()?;
        let stderr = cursor.read_bytes()?;
        let count = cursor.read_u64()? as usize;
        let mut output_files = Vec::with_capacity(count);
        for _ in 0..count {
            let path = read_str(&mut cursor)?;
            let digest = Digest(cursor.read_array()?);
            let executable = cursor.read_u8()? != 0;
            output_files.push((path, digest, executable));
        }
        Ok(ActionResult { exit_code, stdout, stderr, output_files })
    }
}

/// A long-running operation as returned by `GET /v2/operations/{name}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Operation {
    pub name: String,
    pub action_id: Digest,
    pub done: bool,
    pub result: Option<ActionResult>,
    pub error: Option<String>,
}

impl Operation {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
        write_str(&mut buf, &self.name);
        buf.extend_from_slice(self.action_id.as_bytes());
        buf.push(u8::from(self.done));
        match &self.result {
            Some(result) => {
                buf.push(1);
                write_bytes(&mut buf, &result.encode());
            }
            None => buf.push(0),
        }
        write_opt_str(&mut buf, &self.error);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ReapiError> {
        if bytes.len() < 4 {
            return Err(ReapiError::Truncated);
        }
        let mut cursor = Cursor::new(bytes);
        let version = cursor.read_u32()?;
        if version != SCHEMA_VERSION {
            return Err(ReapiError::UnsupportedVersion(version));
        }
        let name = read_str(&mut cursor)?;
        let action_id = Digest(cursor.read_array()?);
        let done = cursor.read_u8()? != 0;
        let result = match cursor.read_u8()? {
            0 => None,
            _ => Some(ActionResult::decode(&cursor.read_bytes()?)?),
        };
        let error = read_opt_str(&mut cursor)?;
        Ok(Operation { name, action_id, done, result, error })
    }
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    write_bytes(buf, s.as_bytes());
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn write_str_list(buf: &mut Vec<u8>, items: &[String]) {
    buf.extend_from_slice(&(items.len() as u64).to_le_bytes());
    for item in items {
        write_str(buf, item);
    }
}

fn write_opt_str(buf: &mut Vec<u8>, opt: &Option<String>) {
    match opt {
        Some(s) => {
            buf.push(1);
            write_str(buf, s);
        }
        None => buf.push(0),
    }
}

fn write_capabilities(buf: &mut Vec<u8>, caps: &Capabilities) {
    write_opt_str(buf, &caps.os_family);
    write_opt_str(buf, &caps.container_image);
    write_opt_str(buf, &caps.pool);
    buf.extend_from_slice(&(caps.extra.len() as u64).to_le_bytes());
    for (k, v) in &caps.extra {
        write_str(buf, k);
        write_str(buf, v);
    }
}

fn read_capabilities(cursor: &mut Cursor<'_>) -> Result<Capabilities, ReapiError> {
    let os_family = read_opt_str(cursor)?;
    let container_image = read_opt_str(cursor)?;
    let pool = read_opt_str(cursor)?;
    let count = cursor.read_u64()? as usize;
    let mut extra = Vec::with_capacity(count);
    for _ in 0..count {
        extra.push((read_str(cursor)?, read_str(cursor)?));
    }
    Ok(Capabilities { os_family, container_image, pool, extra })
}

fn read_opt_str(cursor: &mut Cursor<'_>) -> Result<Option<String>, ReapiError> {
    match cursor.read_u8()? {
        0 => Ok(None),
        _ => Ok(Some(read_str(cursor)?)),
    }
}

fn read_str(cursor: &mut Cursor<'_>) -> Result<String, ReapiError> {
    String::from_utf8(cursor.read_bytes()?).map_err(|_| ReapiError::InvalidUtf8)
}

fn read_str_list(cursor: &mut Cursor<'_>) -> Result<Vec<String>, ReapiError> {
    let count = cursor.read_u64()? as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(read_str(cursor)?);
    }
    Ok(out)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ReapiError> {
        if self.pos + n > self.bytes.len() {
            return Err(ReapiError::OutOfBounds);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, ReapiError> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32, ReapiError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64, ReapiError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_i32(&mut self) -> Result<i32, ReapiError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_array(&mut self) -> Result<[u8; 32], ReapiError> {
        Ok(self.take(32)?.try_into().unwrap())
    }

    fn read_bytes(&mut self) -> Result<Vec<u8>, ReapiError> {
        let len = self.read_u64()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_hash::hash_bytes;

    fn sample_request() -> ActionRequest {
        let action = Action {
            command: vec!["cc".into(), "-c".into(), "a.c".into()],
            env: vec![("PATH".into(), "/usr/bin".into())],
            inputs: vec![ActionInput { declared_path: "a.c".into(), digest: hash_bytes(b"int main(){}") }],
            outputs: vec!["a.o".into()],
            platform: Platform(vec![("os-family".into(), "linux".into())]),
            timeout_ms: 60_000,
            salt: None,
        };
        let caps = Capabilities::from_platform(&action.platform);
        ActionRequest::from_action(&action, caps, 5)
    }

    #[test]
    fn action_request_roundtrips() {
        let request = sample_request();
        let encoded = request.encode();
        let decoded = ActionRequest::decode(&encoded).unwrap();
        assert_eq!(request, decoded);
    }

    #[test]
    fn decode_rejects_unsupported_version() {
        let mut encoded = sample_request().encode();
        encoded[0..4].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(ActionRequest::decode(&encoded), Err(ReapiError::UnsupportedVersion(99))));
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let encoded = sample_request().encode();
        assert!(matches!(ActionRequest::decode(&encoded[..encoded.len() - 1]), Err(ReapiError::OutOfBounds)));
    }

    #[test]
    fn to_action_recovers_the_same_fingerprint() {
        let request = sample_request();
        let action = request.to_action(None);
        assert_eq!(action.fingerprint(), request.action_id);
    }

    #[test]
    fn action_result_roundtrips() {
        let result = ActionResult {
            exit_code: 0,
            stdout: b"built ok\n".to_vec(),
            stderr: Vec::new(),
            output_files: vec![("a.o".into(), hash_bytes(b"object bytes"), false)],
        };
        let encoded = result.encode();
        let decoded = ActionResult::decode(&encoded).unwrap();
        assert_eq!(result, decoded);
    }

    #[test]
    fn operation_roundtrips_in_flight_and_completed() {
        let in_flight = Operation {
            name: "operations/1".into(),
            action_id: hash_bytes(b"action"),
            done: false,
            result: None,
            error: None,
        };
        assert_eq!(in_flight, Operation::decode(&in_flight.encode()).unwrap());

        let completed = Operation {
            name: "operations/1".into(),
            action_id: hash_bytes(b"action"),
            done: true,
            result: Some(ActionResult { exit_code: 1, stdout: Vec::new(), stderr: b"failed".to_vec(), output_files: Vec::new() }),
            error: Some("nonzero exit".into()),
        };
        assert_eq!(completed, Operation::decode(&completed.encode()).unwrap());
    }
}
