//! The `Action` descriptor and its fingerprint function.
//!
//! An action's fingerprint is the cache key for the entire build: two actions
//! with equal fingerprints are treated as interchangeable, so the encoding
//! below must capture every input that can affect observable behavior and
//! nothing that cannot.

use crate::{Digest, StreamingHasher};

/// A platform capability requirement, e.g. `("os-family", "linux")`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Platform(pub Vec<(String, String)>);

impl Platform {
    pub fn empty() -> Self {
        Platform(Vec::new())
    }
}

/// A declared input to an action: the path it is materialized at, and the
/// content digest of its bytes.
#[derive(Clone, Debug)]
pub struct ActionInput {
    pub declared_path: String,
    pub digest: Digest,
}

/// A fully-specified action: the unit that the scheduler dispatches and the
/// action cache keys on.
#[derive(Clone, Debug)]
pub struct Action {
    pub command: Vec<String>,
    pub env: Vec<(String, String)>,
    pub inputs: Vec<ActionInput>,
    pub outputs: Vec<String>,
    pub platform: Platform,
    pub timeout_ms: u64,
    pub salt: Option<Vec<u8>>,
}

impl Action {
    /// Compute this action's fingerprint.
    ///
    /// The encoding is: canonical command, sorted env `K=V` pairs (NUL
    /// separated), sorted-by-declared-path input digests, sorted declared
    /// output paths, sorted platform pairs, timeout, optional salt. Sorting
    /// env and platform pairs by key, and inputs by path, means that
    /// reordering any of those collections without changing their contents
    /// leaves the fingerprint unchanged — renaming an input path while
    /// keeping the same bytes does not change the fingerprint, since only
    /// digests (not paths) are fed into the hash for inputs.
    pub fn fingerprint(&self) -> Digest {
        let mut hasher = StreamingHasher::new();

        write_len_prefixed_str_list(&mut hasher, &self.command);

        let mut env = self.env.clone();
        env.sort_by(|a, b| a.0.cmp(&b.0));
        hasher.update(&(env.len() as u64).to_le_bytes());
        for (k, v) in &env {
            write_len_prefixed(&mut hasher, k.as_bytes());
            hasher.update(&[0u8]);
            write_len_prefixed(&mut hasher, v.as_bytes());
        }

        let mut inputs = self.inputs.clone();
        inputs.sort_by(|a, b| a.declared_path.cmp(&b.declared_path));
        hasher.update(&(inputs.len() as u64).to_le_bytes());
        for input in &inputs {
            hasher.update(input.digest.as_bytes());
        }

        let mut outputs = self.outputs.clone();
        outputs.sort();
        write_len_prefixed_str_list(&mut hasher, &outputs);

        let mut platform = self.platform.0.clone();
        platform.sort_by(|a, b| a.0.cmp(&b.0));
        hasher.update(&(platform.len() as u64).to_le_bytes());
        for (k, v) in &platform {
            write_len_prefixed(&mut hasher, k.as_bytes());
            hasher.update(&[0u8]);
            write_len_prefixed(&mut hasher, v.as_bytes());
        }

        hasher.update(&self.timeout_ms.to_le_bytes());

        match &self.salt {
            Some(salt) => {
                hasher.update(&[1u8]);
                write_len_prefixed(&mut hasher, salt);
            }
            None => {
                hasher.update(&[0u8]);
            }
        }

        hasher.finalize()
    }
}

fn write_len_prefixed(hasher: &mut StreamingHasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn write_len_prefixed_str_list(hasher: &mut StreamingHasher, items: &[String]) {
    hasher.update(&(items.len() as u64).to_le_bytes());
    for item in items {
        write_len_prefixed(hasher, item.as_bytes());
    }
}

/// Convenience alias: an action's id is the digest of its fingerprint.
pub fn hash_action(action: &Action) -> Digest {
    action.fingerprint()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash_bytes;

    fn base_action() -> Action {
        Action {
            command: vec!["cc".into(), "-c".into(), "a.c".into()],
            env: vec![("PATH".into(), "/usr/bin".into()), ("LANG".into(), "C".into())],
            inputs: vec![ActionInput {
                declared_path: "a.c".into(),
                digest: hash_bytes(b"int main() {}"),
            }],
            outputs: vec!["a.o".into()],
            platform: Platform(vec![("os-family".into(), "linux".into())]),
            timeout_ms: 60_000,
            salt: None,
        }
    }

    #[test]
    fn env_reorder_does_not_change_fingerprint() {
        let a = base_action();
        let mut b = base_action();
        b.env.reverse();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn input_rename_with_same_bytes_does_not_change_fingerprint() {
        let a = base_action();
        let mut b = base_action();
        b.inputs[0].declared_path = "renamed.c".into();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn command_byte_change_changes_fingerprint() {
        let a = base_action();
        let mut b = base_action();
        b.command[2] = "b.c".into();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn input_content_change_changes_fingerprint() {
        let a = base_action();
        let mut b = base_action();
        b.inputs[0].digest = hash_bytes(b"different contents");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn env_value_change_changes_fingerprint() {
        let a = base_action();
        let mut b = base_action();
        b.env[0].1 = "/opt/bin".into();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn output_path_change_changes_fingerprint() {
        let a = base_action();
        let mut b = base_action();
        b.outputs[0] = "b.o".into();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn timeout_change_changes_fingerprint() {
        let a = base_action();
        let mut b = base_action();
        b.timeout_ms = 30_000;
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn salt_changes_fingerprint() {
        let a = base_action();
        let mut b = base_action();
        b.salt = Some(vec![1, 2, 3]);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
