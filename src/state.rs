use crate::config::RefreshConfig;
use crate::scheduler::RefreshableSource;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Flat sensor mapping, e.g. `"CPU Total/Load" -> 12.5`.
pub type SensorSnapshot = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq)]
pub struct HostRecord {
    pub name: String,
    pub url: String,
    pub online: bool,
}

/// Capacity of one volume, in gigabytes.
#[derive(Debug, Clone, PartialEq)]
pub struct DiskRecord {
    pub device: String,
    pub free: f64,
    pub used: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmState {
    Running,
    Offline,
    Other(String),
}

impl VmState {
    pub fn from_field(raw: &str) -> Self {
        match raw {
            "Running" => VmState::Running,
            "Off" | "Offline" => VmState::Offline,
            other => VmState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmState::Running => f.write_str("Running"),
            VmState::Offline => f.write_str("Offline"),
            VmState::Other(s) if s.is_empty() => f.write_str("Unknown"),
            VmState::Other(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VmRecord {
    pub name: String,
    pub state: VmState,
    pub cpu_usage_percent: f64,
    pub memory_assigned_mb: f64,
    /// `None` when the uptime column could not be read.
    pub uptime: Option<String>,
}

/// Why the most recent refresh of a source produced no new value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("source unavailable")]
    Unavailable,
    #[error("Hyper-V not available. Ensure you're running as administrator.")]
    PermissionDenied,
    /// `head` keeps the first few raw lines for display.
    #[error("unrecognised inventory output ({lines} lines)")]
    MalformedOutput { lines: usize, head: Vec<String> },
    #[error("timed out after {}", humantime::format_duration(*.0))]
    Timeout(Duration),
    #[error("{0}")]
    Command(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Sensors,
    Hosts,
    Disks,
    Vms,
}

impl SourceKind {
    /// Refresh order within a tick.
    pub const ORDER: [SourceKind; 4] = [
        SourceKind::Sensors,
        SourceKind::Hosts,
        SourceKind::Disks,
        SourceKind::Vms,
    ];

    pub fn label(self) -> &'static str {
        match self {
            SourceKind::Sensors => "sensors",
            SourceKind::Hosts => "hosts",
            SourceKind::Disks => "disks",
            SourceKind::Vms => "vms",
        }
    }
}

/// Latest known value of every source, stale or not.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    pub sensors: RefreshableSource<SensorSnapshot>,
    pub hosts: RefreshableSource<Vec<HostRecord>>,
    pub disks: RefreshableSource<Vec<DiskRecord>>,
    pub vms: RefreshableSource<Vec<VmRecord>>,
}

impl SnapshotStore {
    pub fn new(refresh: &RefreshConfig) -> Self {
        Self {
            sensors: RefreshableSource::new(refresh.sensors),
            hosts: RefreshableSource::new(refresh.hosts),
            disks: RefreshableSource::new(refresh.disks),
            vms: RefreshableSource::new(refresh.vms),
        }
    }

    pub fn last_error(&self, kind: SourceKind) -> Option<&SourceError> {
        match kind {
            SourceKind::Sensors => self.sensors.last_error(),
            SourceKind::Hosts => self.hosts.last_error(),
            SourceKind::Disks => self.disks.last_error(),
            SourceKind::Vms => self.vms.last_error(),
        }
    }

    pub fn is_stale(&self, kind: SourceKind) -> bool {
        match kind {
            SourceKind::Sensors => self.sensors.is_stale(),
            SourceKind::Hosts => self.hosts.is_stale(),
            SourceKind::Disks => self.disks.is_stale(),
            SourceKind::Vms => self.vms.is_stale(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vm_state_maps_known_values() {
        assert_eq!(VmState::from_field("Running"), VmState::Running);
        assert_eq!(VmState::from_field("Off"), VmState::Offline);
        assert_eq!(
            VmState::from_field("Paused"),
            VmState::Other("Paused".to_string())
        );
        assert_eq!(VmState::Other(String::new()).to_string(), "Unknown");
    }

    #[test]
    fn timeout_message_is_human_readable() {
        let err = SourceError::Timeout(Duration::from_secs(15));
        assert_eq!(err.to_string(), "timed out after 15s");
    }

    #[test]
    fn store_starts_empty_with_configured_cadences() {
        let refresh = RefreshConfig {
            sensors: 0,
            hosts: 30,
            disks: 60,
            vms: 30,
        };
        let store = SnapshotStore::new(&refresh);
        assert!(store.sensors.get().is_none());
        assert!(store.vms.get().is_none());
        assert_eq!(store.disks.cadence().interval(), 60);
        assert!(store.last_error(SourceKind::Hosts).is_none());
    }
}
