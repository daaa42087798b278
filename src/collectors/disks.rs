use crate::collectors::DiskSource;
use crate::state::DiskRecord;
use sysinfo::{DiskExt, System, SystemExt};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

pub struct SysinfoDisks {
    system: System,
}

impl SysinfoDisks {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoDisks {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskSource for SysinfoDisks {
    fn list(&mut self) -> Vec<DiskRecord> {
        self.system.refresh_disks_list();
        self.system.refresh_disks();

        let mut records: Vec<DiskRecord> = self
            .system
            .disks()
            .iter()
            .filter_map(|d| {
                disk_record(
                    d.mount_point().to_string_lossy().to_string(),
                    d.total_space(),
                    d.available_space(),
                )
            })
            .collect();
        records.sort_by(|a, b| a.device.cmp(&b.device));
        records.dedup_by(|a, b| a.device == b.device);
        records
    }
}

/// Builds a record from raw byte counts; volumes without capacity are skipped.
fn disk_record(device: String, total_bytes: u64, available_bytes: u64) -> Option<DiskRecord> {
    if total_bytes == 0 {
        return None;
    }
    let free_bytes = available_bytes.min(total_bytes);
    let used_bytes = total_bytes - free_bytes;
    Some(DiskRecord {
        device,
        free: free_bytes as f64 / BYTES_PER_GB,
        used: used_bytes as f64 / BYTES_PER_GB,
        total: total_bytes as f64 / BYTES_PER_GB,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn record_is_in_gigabytes() {
        let record = disk_record("C:\\".to_string(), 500 * GB, 120 * GB).expect("non-empty disk");
        assert_eq!(record.total, 500.0);
        assert_eq!(record.free, 120.0);
        assert_eq!(record.used, 380.0);
        assert!((record.used + record.free - record.total).abs() < 1e-9);
    }

    #[test]
    fn zero_sized_volumes_are_skipped() {
        assert!(disk_record("/proc".to_string(), 0, 0).is_none());
    }

    #[test]
    fn free_never_exceeds_total() {
        let record = disk_record("/".to_string(), GB, 2 * GB).expect("non-empty disk");
        assert_eq!(record.free, 1.0);
        assert_eq!(record.used, 0.0);
    }

    #[test]
    fn live_listing_respects_invariants() {
        let mut disks = SysinfoDisks::new();
        for record in disks.list() {
            assert!(record.total > 0.0);
            assert!(record.used + record.free <= record.total + 1e-6);
        }
    }
}
