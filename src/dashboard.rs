use crate::collectors::hosts::probe_hosts;
use crate::collectors::{DiskSource, ReachabilityProbe, SensorSource};
use crate::config::{Config, HostConfig};
use crate::inventory::InventorySource;
use crate::state::{SnapshotStore, SourceError, SourceKind};
use std::time::Instant;
use tracing::{debug, warn};

/// Collaborators feeding the dashboard. Optional sources are disabled when `None`.
pub struct Sources<S, D, P, I> {
    pub sensors: S,
    pub disks: Option<D>,
    pub probe: P,
    pub inventory: Option<I>,
}

/// Owns every source and decides, once per tick, which of them to re-sample.
pub struct Dashboard<S, D, P, I> {
    sources: Sources<S, D, P, I>,
    hosts: Vec<HostConfig>,
    store: SnapshotStore,
    ticks: u64,
}

impl<S, D, P, I> Dashboard<S, D, P, I>
where
    S: SensorSource,
    D: DiskSource,
    P: ReachabilityProbe,
    I: InventorySource,
{
    pub fn new(cfg: &Config, sources: Sources<S, D, P, I>) -> Self {
        Self {
            sources,
            hosts: cfg.hosts.clone(),
            store: SnapshotStore::new(&cfg.refresh),
            ticks: 0,
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub async fn tick(&mut self) -> Vec<SourceKind> {
        self.tick_with(|_| {}).await
    }

    /// Runs one scheduler tick and returns the sources that were re-sampled.
    ///
    /// Due sources are refreshed one after another in [`SourceKind::ORDER`];
    /// `on_refresh` is called right before each of them starts.
    pub async fn tick_with(&mut self, mut on_refresh: impl FnMut(SourceKind)) -> Vec<SourceKind> {
        let mut refreshed = Vec::new();

        for kind in SourceKind::ORDER {
            if !self.is_enabled(kind) || !self.tick_source(kind) {
                continue;
            }
            on_refresh(kind);
            let start = Instant::now();
            self.refresh(kind).await;

            match self.store.last_error(kind) {
                Some(err) if self.store.is_stale(kind) => warn!(
                    source = kind.label(),
                    error = %err,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "refresh failed, keeping previous value"
                ),
                Some(err) => warn!(
                    source = kind.label(),
                    error = %err,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "refresh failed, no value yet"
                ),
                None => debug!(
                    source = kind.label(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "source refreshed"
                ),
            }
            refreshed.push(kind);
        }

        self.ticks += 1;
        refreshed
    }

    fn is_enabled(&self, kind: SourceKind) -> bool {
        match kind {
            SourceKind::Sensors => true,
            SourceKind::Hosts => !self.hosts.is_empty(),
            SourceKind::Disks => self.sources.disks.is_some(),
            SourceKind::Vms => self.sources.inventory.is_some(),
        }
    }

    fn tick_source(&mut self, kind: SourceKind) -> bool {
        match kind {
            SourceKind::Sensors => self.store.sensors.tick(),
            SourceKind::Hosts => self.store.hosts.tick(),
            SourceKind::Disks => self.store.disks.tick(),
            SourceKind::Vms => self.store.vms.tick(),
        }
    }

    async fn refresh(&mut self, kind: SourceKind) {
        match kind {
            SourceKind::Sensors => {
                let outcome = self
                    .sources
                    .sensors
                    .sample()
                    .await
                    .ok_or(SourceError::Unavailable);
                self.store.sensors.apply(outcome);
            }
            SourceKind::Hosts => {
                let records = probe_hosts(&self.sources.probe, &self.hosts).await;
                self.store.hosts.set(records);
            }
            SourceKind::Disks => {
                if let Some(disks) = self.sources.disks.as_mut() {
                    let records = disks.list();
                    if records.is_empty() {
                        self.store.disks.fail(SourceError::Unavailable);
                    } else {
                        self.store.disks.set(records);
                    }
                }
            }
            SourceKind::Vms => {
                if let Some(inventory) = self.sources.inventory.as_mut() {
                    let outcome = inventory.fetch().await.map_err(SourceError::from);
                    self.store.vms.apply(outcome);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::hyperv::ParseError;
    use crate::inventory::InventoryError;
    use crate::state::{DiskRecord, SensorSnapshot, VmRecord, VmState};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<&'static str>>>;

    struct FakeSensors {
        log: Log,
        available: bool,
    }

    impl SensorSource for FakeSensors {
        async fn sample(&mut self) -> Option<SensorSnapshot> {
            self.log.borrow_mut().push("sensors");
            self.available
                .then(|| SensorSnapshot::from([("CPU Total/Load".to_string(), 5.0)]))
        }
    }

    struct FakeDisks {
        log: Log,
    }

    impl DiskSource for FakeDisks {
        fn list(&mut self) -> Vec<DiskRecord> {
            self.log.borrow_mut().push("disks");
            vec![DiskRecord {
                device: "C:\\".to_string(),
                free: 10.0,
                used: 90.0,
                total: 100.0,
            }]
        }
    }

    struct FakeProbe {
        log: Log,
    }

    impl ReachabilityProbe for FakeProbe {
        async fn is_reachable(&self, _name: &str, _url: &str) -> bool {
            self.log.borrow_mut().push("hosts");
            true
        }
    }

    struct FakeInventory {
        log: Log,
        script: VecDeque<Result<Vec<VmRecord>, InventoryError>>,
    }

    impl InventorySource for FakeInventory {
        async fn fetch(&mut self) -> Result<Vec<VmRecord>, InventoryError> {
            self.log.borrow_mut().push("vms");
            self.script
                .pop_front()
                .unwrap_or(Err(InventoryError::Parse(ParseError::PermissionDenied)))
        }
    }

    fn vm(name: &str) -> VmRecord {
        VmRecord {
            name: name.to_string(),
            state: VmState::Running,
            cpu_usage_percent: 1.0,
            memory_assigned_mb: 512.0,
            uptime: Some("1:00:00".to_string()),
        }
    }

    fn config(interval: u32) -> Config {
        let mut cfg = Config::default();
        cfg.refresh.sensors = 0;
        cfg.refresh.hosts = interval;
        cfg.refresh.disks = interval;
        cfg.refresh.vms = interval;
        cfg.hosts = vec![HostConfig {
            name: "router".to_string(),
            url: "http://192.168.1.1".to_string(),
        }];
        cfg
    }

    type TestDashboard = Dashboard<FakeSensors, FakeDisks, FakeProbe, FakeInventory>;

    fn dashboard(
        cfg: &Config,
        log: &Log,
        script: Vec<Result<Vec<VmRecord>, InventoryError>>,
    ) -> TestDashboard {
        Dashboard::new(
            cfg,
            Sources {
                sensors: FakeSensors {
                    log: log.clone(),
                    available: true,
                },
                disks: Some(FakeDisks { log: log.clone() }),
                probe: FakeProbe { log: log.clone() },
                inventory: Some(FakeInventory {
                    log: log.clone(),
                    script: script.into(),
                }),
            },
        )
    }

    #[tokio::test]
    async fn first_tick_refreshes_everything_in_fixed_order() {
        let log = Log::default();
        let mut dash = dashboard(&config(30), &log, vec![Ok(vec![vm("web")])]);

        let mut announced = Vec::new();
        let refreshed = dash.tick_with(|kind| announced.push(kind)).await;

        assert_eq!(refreshed, SourceKind::ORDER.to_vec());
        assert_eq!(announced, SourceKind::ORDER.to_vec());
        assert_eq!(*log.borrow(), vec!["sensors", "hosts", "disks", "vms"]);
        assert_eq!(dash.store().vms.get().map(Vec::len), Some(1));
        assert_eq!(dash.ticks(), 1);
    }

    #[tokio::test]
    async fn slow_sources_wait_their_interval_while_sensors_refresh_every_tick() {
        let log = Log::default();
        let script = (0..4).map(|_| Ok(vec![vm("web")])).collect();
        let mut dash = dashboard(&config(30), &log, script);

        let mut vm_ticks = Vec::new();
        for tick in 0..70 {
            let refreshed = dash.tick().await;
            assert!(refreshed.contains(&SourceKind::Sensors));
            if refreshed.contains(&SourceKind::Vms) {
                vm_ticks.push(tick);
            }
        }
        assert_eq!(vm_ticks, vec![0, 31, 62]);
        let sensor_samples = log.borrow().iter().filter(|s| **s == "sensors").count();
        assert_eq!(sensor_samples, 70);
    }

    #[tokio::test]
    async fn failed_inventory_retries_at_the_same_cadence_and_keeps_last_value() {
        let log = Log::default();
        let script = vec![
            Ok(vec![vm("web"), vm("db")]),
            Err(InventoryError::Parse(ParseError::PermissionDenied)),
            Err(InventoryError::Parse(ParseError::MalformedOutput { lines: vec![] })),
            Ok(vec![vm("web")]),
        ];
        let mut dash = dashboard(&config(2), &log, script);

        let mut vm_ticks = Vec::new();
        for tick in 0..10 {
            if dash.tick().await.contains(&SourceKind::Vms) {
                vm_ticks.push(tick);
                match vm_ticks.len() {
                    1 => assert!(dash.store().vms.last_error().is_none()),
                    2 => {
                        assert_eq!(
                            dash.store().vms.last_error(),
                            Some(&SourceError::PermissionDenied)
                        );
                        assert_eq!(dash.store().vms.get().map(Vec::len), Some(2));
                    }
                    3 => assert!(dash.store().vms.is_stale()),
                    4 => {
                        assert!(!dash.store().vms.is_stale());
                        assert_eq!(dash.store().vms.get().map(Vec::len), Some(1));
                    }
                    _ => {}
                }
            }
        }
        assert_eq!(vm_ticks, vec![0, 3, 6, 9]);
    }

    #[tokio::test]
    async fn disabled_sources_are_never_sampled() {
        let log = Log::default();
        let mut cfg = config(0);
        cfg.hosts.clear();
        let mut dash: TestDashboard = Dashboard::new(
            &cfg,
            Sources {
                sensors: FakeSensors {
                    log: log.clone(),
                    available: false,
                },
                disks: None,
                probe: FakeProbe { log: log.clone() },
                inventory: None,
            },
        );

        for _ in 0..3 {
            assert_eq!(dash.tick().await, vec![SourceKind::Sensors]);
        }
        assert_eq!(*log.borrow(), vec!["sensors"; 3]);
        assert!(dash.store().sensors.get().is_none());
        assert_eq!(
            dash.store().sensors.last_error(),
            Some(&SourceError::Unavailable)
        );
        assert!(dash.store().hosts.get().is_none());
        assert!(dash.store().vms.get().is_none());
    }
}
