//! Process-resident memory probe for the adaptive worker pool.

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, System};

/// Samples this process's resident set size against a configured soft cap.
pub struct MemoryMonitor {
    system: Mutex<System>,
    pid: Pid,
    soft_cap_bytes: u64,
}

impl MemoryMonitor {
    pub fn new(soft_cap_mb: u64) -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().unwrap_or(Pid::from_u32(0)),
            soft_cap_bytes: soft_cap_mb * 1024 * 1024,
        }
    }

    pub fn soft_cap_bytes(&self) -> u64 {
        self.soft_cap_bytes
    }

    /// Current resident bytes, 0 when the probe is unavailable.
    pub fn resident_bytes(&self) -> u64 {
        let mut system = self.system.lock();
        system.refresh_process_specifics(self.pid, ProcessRefreshKind::new().with_memory());
        system.process(self.pid).map(|p| p.memory()).unwrap_or(0)
    }

    /// Resident memory as a fraction of the soft cap.
    pub fn utilization(&self) -> f64 {
        if self.soft_cap_bytes == 0 {
            return 0.0;
        }
        self.resident_bytes() as f64 / self.soft_cap_bytes as f64
    }
}

impl std::fmt::Debug for MemoryMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMonitor")
            .field("soft_cap_bytes", &self.soft_cap_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resident_bytes_nonzero_for_live_process() {
        let monitor = MemoryMonitor::new(4096);
        assert!(monitor.resident_bytes() > 0);
    }

    #[test]
    fn test_utilization_scales_with_cap() {
        let tight = MemoryMonitor::new(1);
        let loose = MemoryMonitor::new(1_000_000);
        assert!(tight.utilization() > loose.utilization());
    }

    #[test]
    fn test_zero_cap_reports_zero() {
        let monitor = MemoryMonitor::new(0);
        assert_eq!(monitor.utilization(), 0.0);
    }
}
