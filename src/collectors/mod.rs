pub mod disks;
pub mod hosts;
pub mod sensors;

use crate::state::{DiskRecord, SensorSnapshot};

/// Hardware sensor readings. `None` means the whole subsystem is unavailable.
pub trait SensorSource {
    async fn sample(&mut self) -> Option<SensorSnapshot>;
}

pub trait DiskSource {
    fn list(&mut self) -> Vec<DiskRecord>;
}

/// Single-endpoint liveness check. Errors and timeouts are reported as `false`.
pub trait ReachabilityProbe {
    async fn is_reachable(&self, name: &str, url: &str) -> bool;
}
