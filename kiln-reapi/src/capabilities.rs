//! Translation between the native [`Platform`] property list and the
//! REAPI-shaped capabilities a remote worker advertises: OS family,
//! container image, and a named worker pool, plus whatever other
//! platform properties a caller attached.

use kiln_hash::Platform;

const KEY_OS_FAMILY: &str = "os-family";
const KEY_CONTAINER_IMAGE: &str = "container-image";
const KEY_POOL: &str = "pool";

/// Capabilities as understood by the execute endpoint: a structured view of
/// the handful of properties every worker pool call cares about, plus the
/// rest passed through unchanged for worker-specific matching.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub os_family: Option<String>,
    pub container_image: Option<String>,
    pub pool: Option<String>,
    pub extra: Vec<(String, String)>,
}

impl Capabilities {
    pub fn digest_function(&self) -> &'static str {
        crate::digest::DIGEST_FUNCTION
    }

    pub fn from_platform(platform: &Platform) -> Self {
        let mut caps = Capabilities::default();
        for (key, value) in &platform.0 {
            match key.as_str() {
                KEY_OS_FAMILY => caps.os_family = Some(value.clone()),
                KEY_CONTAINER_IMAGE => caps.container_image = Some(value.clone()),
                KEY_POOL => caps.pool = Some(value.clone()),
                _ => caps.extra.push((key.clone(), value.clone())),
            }
        }
        caps
    }

    pub fn to_platform(&self) -> Platform {
        let mut pairs = Vec::new();
        if let Some(v) = &self.os_family {
            pairs.push((KEY_OS_FAMILY.to_string(), v.clone()));
        }
        if let Some(v) = &self.container_image {
            pairs.push((KEY_CONTAINER_IMAGE.to_string(), v.clone()));
        }
        if let Some(v) = &self.pool {
            pairs.push((KEY_POOL.to_string(), v.clone()));
        }
        pairs.extend(self.extra.iter().cloned());
        Platform(pairs)
    }

    /// A requesting platform's capabilities are satisfied by a worker's
    /// advertised capabilities iff every structured field the request sets
    /// is matched exactly and every extra property the request sets is
    /// present with the same value on the worker.
    pub fn satisfies(&self, worker: &Capabilities) -> bool {
        let field_ok = |want: &Option<String>, have: &Option<String>| match want {
            None => true,
            Some(w) => have.as_deref() == Some(w.as_str()),
        };
        if !field_ok(&self.os_family, &worker.os_family) {
            return false;
        }
        if !field_ok(&self.container_image, &worker.container_image) {
            return false;
        }
        if !field_ok(&self.pool, &worker.pool) {
            return false;
        }
        self.extra.iter().all(|(k, v)| worker.extra.iter().any(|(wk, wv)| wk == k && wv == v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_fields_round_trip_through_platform() {
        let platform = Platform(vec![
            ("os-family".into(), "linux".into()),
            ("container-image".into(), "builder:latest".into()),
            ("pool".into(), "large".into()),
            ("gpu".into(), "a100".into()),
        ]);
        let caps = Capabilities::from_platform(&platform);
        assert_eq!(caps.os_family.as_deref(), Some("linux"));
        assert_eq!(caps.container_image.as_deref(), Some("builder:latest"));
        assert_eq!(caps.pool.as_deref(), Some("large"));
        assert_eq!(caps.extra, vec![("gpu".to_string(), "a100".to_string())]);

        let mut round_tripped = caps.to_platform().0;
        round_tripped.sort();
        let mut original = platform.0;
        original.sort();
        assert_eq!(round_tripped, original);
    }

    #[test]
    fn unset_fields_are_wildcards_but_set_fields_must_match() {
        let request = Capabilities { os_family: Some("linux".into()), ..Default::default() };
        let matching_worker = Capabilities { os_family: Some("linux".into()), pool: Some("any".into()), ..Default::default() };
        let mismatched_worker = Capabilities { os_family: Some("macos".into()), ..Default::default() };
        assert!(request.satisfies(&matching_worker));
        assert!(!request.satisfies(&mismatched_worker));
    }

    #[test]
    fn extra_properties_must_be_present_on_the_worker() {
        let request = Capabilities { extra: vec![("gpu".into(), "a100".into())], ..Default::default() };
        let worker_without_gpu = Capabilities::default();
        assert!(!request.satisfies(&worker_without_gpu));
    }
}
