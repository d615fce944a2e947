//! Cross-platform resource accounting for a sandboxed action.

use crate::violation::{ResourceKind, ResourceViolation};
use crate::spec::ResourceLimits;
use std::sync::atomic::{AtomicU64, Ordering};

/// A point-in-time reading of an action's resource consumption.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceSnapshot {
    pub cpu_time_ms: u64,
    pub peak_memory_bytes: u64,
    pub disk_read_bytes: u64,
    pub disk_write_bytes: u64,
    pub net_rx_bytes: u64,
    pub net_tx_bytes: u64,
}

/// Accounts for one action's resource usage over its lifetime and checks it
/// against [`ResourceLimits`].
pub trait ResourceMonitor {
    /// Begin accounting. Called immediately before the action's process is
    /// spawned.
    fn start(&self) -> Result<(), std::io::Error>;

    /// Current cumulative usage.
    fn snapshot(&self) -> ResourceSnapshot;

    /// Stop accounting and return any limit violations observed.
    fn stop(&self, limits: &ResourceLimits) -> Vec<ResourceViolation>;
}

fn check_limits(snapshot: ResourceSnapshot, limits: &ResourceLimits) -> Vec<ResourceViolation> {
    let mut violations = Vec::new();
    if snapshot.peak_memory_bytes > limits.max_memory_bytes {
        violations.push(ResourceViolation {
            resource: ResourceKind::Memory,
            limit: limits.max_memory_bytes,
            actual: snapshot.peak_memory_bytes,
        });
    }
    if snapshot.cpu_time_ms > limits.max_cpu_time_ms {
        violations.push(ResourceViolation {
            resource: ResourceKind::CpuTime,
            limit: limits.max_cpu_time_ms,
            actual: snapshot.cpu_time_ms,
        });
    }
    let disk_total = snapshot.disk_read_bytes + snapshot.disk_write_bytes;
    if disk_total > limits.max_disk_io_bytes {
        violations.push(ResourceViolation {
            resource: ResourceKind::DiskIo,
            limit: limits.max_disk_io_bytes,
            actual: disk_total,
        });
    }
    let net_total = snapshot.net_rx_bytes + snapshot.net_tx_bytes;
    if limits.max_network_io_bytes > 0 && net_total > limits.max_network_io_bytes {
        violations.push(ResourceViolation {
            resource: ResourceKind::NetworkIo,
            limit: limits.max_network_io_bytes,
            actual: net_total,
        });
    }
    violations
}

/// A monitor that polls readings pushed in by the caller (the executor's
/// wait loop). Used on platforms without a kernel cgroup accounting
/// facility, and as the implementation backing tests.
pub struct PollingMonitor {
    cpu_time_ms: AtomicU64,
    peak_memory_bytes: AtomicU64,
    disk_read_bytes: AtomicU64,
    disk_write_bytes: AtomicU64,
    net_rx_bytes: AtomicU64,
    net_tx_bytes: AtomicU64,
}

impl PollingMonitor {
    pub fn new() -> Self {
        Self {
            cpu_time_ms: AtomicU64::new(0),
            peak_memory_bytes: AtomicU64::new(0),
            disk_read_bytes: AtomicU64::new(0),
            disk_write_bytes: AtomicU64::new(0),
            net_rx_bytes: AtomicU64::new(0),
            net_tx_bytes: AtomicU64::new(0),
        }
    }

    /// Record a poll reading. Memory is tracked as a running peak; the
    /// counters are treated as monotonically increasing cumulative totals.
    pub fn record(&self, reading: ResourceSnapshot) {
        self.cpu_time_ms.store(reading.cpu_time_ms, Ordering::Relaxed);
        self.peak_memory_bytes.fetch_max(reading.peak_memory_bytes, Ordering::Relaxed);
        self.disk_read_bytes.store(reading.disk_read_bytes, Ordering::Relaxed);
        self.disk_write_bytes.store(reading.disk_write_bytes, Ordering::Relaxed);
        self.net_rx_bytes.store(reading.net_rx_bytes, Ordering::Relaxed);
        self.net_tx_bytes.store(reading.net_tx_bytes, Ordering::Relaxed);
    }
}

impl Default for PollingMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceMonitor for PollingMonitor {
    fn start(&self) -> Result<(), std::io::Error> {
        Ok(())
    }

    fn snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            cpu_time_ms: self.cpu_time_ms.load(Ordering::Relaxed),
            peak_memory_bytes: self.peak_memory_bytes.load(Ordering::Relaxed),
            disk_read_bytes: self.disk_read_bytes.load(Ordering::Relaxed),
            disk_write_bytes: self.disk_write_bytes.load(Ordering::Relaxed),
            net_rx_bytes: self.net_rx_bytes.load(Ordering::Relaxed),
            net_tx_bytes: self.net_tx_bytes.load(Ordering::Relaxed),
        }
    }

    fn stop(&self, limits: &ResourceLimits) -> Vec<ResourceViolation> {
        check_limits(self.snapshot(), limits)
    }
}

/// cgroups v2 backed monitor, used on Linux hosts with a writable unified
/// hierarchy. Creates a fresh cgroup per action under `parent_path`, applies
/// `memory.max`/`cpu.weight`/`pids.max` from the action's limits, and reads
/// usage back from `memory.current`/`cpu.stat`/`io.stat`.
#[cfg(target_os = "linux")]
pub mod cgroups {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    pub struct CgroupMonitor {
        path: PathBuf,
    }

    impl CgroupMonitor {
        pub fn create(parent_path: &std::path::Path, action_id: &str, limits: &ResourceLimits) -> std::io::Result<Self> {
            let path = parent_path.join(action_id);
            fs::create_dir_all(&path)?;
            fs::write(path.join("memory.max"), limits.max_memory_bytes.to_string())?;
            fs::write(path.join("pids.max"), limits.max_processes.to_string())?;
            let weight = limits.cpu_shares.clamp(1, 10_000);
            fs::write(path.join("cpu.weight"), weight.to_string())?;
            Ok(Self { path })
        }

        pub fn add_process(&self, pid: u32) -> std::io::Result<()> {
            fs::write(self.path.join("cgroup.procs"), pid.to_string())
        }

        fn read_u64(&self, file: &str) -> u64 {
            fs::read_to_string(self.path.join(file))
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(0)
        }

        fn read_cpu_usage_ms(&self) -> u64 {
            let Ok(contents) = fs::read_to_string(self.path.join("cpu.stat")) else {
                return 0;
            };
            for line in contents.lines() {
                if let Some(value) = line.strip_prefix("usage_usec ") {
                    return value.trim().parse::<u64>().unwrap_or(0) / 1000;
                }
            }
            0
        }
    }

    impl ResourceMonitor for CgroupMonitor {
        fn start(&self) -> std::io::Result<()> {
            Ok(())
        }

        fn snapshot(&self) -> ResourceSnapshot {
            ResourceSnapshot {
                cpu_time_ms: self.read_cpu_usage_ms(),
                peak_memory_bytes: self.read_u64("memory.peak"),
                disk_read_bytes: 0,
                disk_write_bytes: 0,
                net_rx_bytes: 0,
                net_tx_bytes: 0,
            }
        }

        fn stop(&self, limits: &ResourceLimits) -> Vec<ResourceViolation> {
            let snapshot = self.snapshot();
            let _ = fs::remove_dir(&self.path);
            check_limits(snapshot, limits)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polling_monitor_reports_no_violations_under_limits() {
        let monitor = PollingMonitor::new();
        monitor.record(ResourceSnapshot { peak_memory_bytes: 100, cpu_time_ms: 10, ..Default::default() });
        let violations = monitor.stop(&ResourceLimits::default());
        assert!(violations.is_empty());
    }

    #[test]
    fn polling_monitor_reports_memory_violation() {
        let monitor = PollingMonitor::new();
        let mut limits = ResourceLimits::default();
        limits.max_memory_bytes = 10;
        monitor.record(ResourceSnapshot { peak_memory_bytes: 1000, ..Default::default() });
        let violations = monitor.stop(&limits);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].resource, ResourceKind::Memory);
    }

    #[test]
    fn peak_memory_tracks_maximum_across_polls() {
        let monitor = PollingMonitor::new();
        monitor.record(ResourceSnapshot { peak_memory_bytes: 100, ..Default::default() });
        monitor.record(ResourceSnapshot { peak_memory_bytes: 50, ..Default::default() });
        assert_eq!(monitor.snapshot().peak_memory_bytes, 100);
    }
}
