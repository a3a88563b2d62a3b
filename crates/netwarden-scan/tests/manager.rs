//! Integration tests for the scan manager: full sweeps against a
//! scripted prober and in-memory stores.
//!
//! Run with: cargo test --package netwarden-scan --test manager

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use netwarden_core::types::PortService;
use netwarden_core::{Device, DeviceId, Event, EventSink, NetworkId, ScanError, StoreError};

use netwarden_scan::config::ScanConfig;
use netwarden_scan::probe::{HostProber, ProbeOutcome, ProbeReport};
use netwarden_scan::store::{DeviceStore, MemoryDeviceStore, MemoryNetworkRegistry};
use netwarden_scan::ScanManager;

/// Prober answering from a scripted address table, with an optional
/// per-probe delay to keep sweeps in flight while tests poke at them.
struct ScriptedProber {
    reports: Mutex<HashMap<Ipv4Addr, ProbeReport>>,
    delay: Duration,
}

impl ScriptedProber {
    fn new(delay: Duration) -> Self {
        Self {
            reports: Mutex::new(HashMap::new()),
            delay,
        }
    }

    fn set_report(&self, ip: &str, report: ProbeReport) {
        self.reports
            .lock()
            .unwrap()
            .insert(ip.parse().unwrap(), report);
    }

    fn clear(&self) {
        self.reports.lock().unwrap().clear();
    }
}

#[async_trait]
impl HostProber for ScriptedProber {
    async fn probe(&self, ip: Ipv4Addr) -> ProbeOutcome {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.reports.lock().unwrap().get(&ip) {
            Some(report) => ProbeOutcome::Reachable(report.clone()),
            None => ProbeOutcome::Unreachable,
        }
    }
}

#[derive(Default)]
struct RecordingSink(Mutex<Vec<Event>>);

impl RecordingSink {
    fn kinds(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().iter().map(|e| e.payload.kind()).collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }
}

struct Harness {
    manager: ScanManager,
    devices: Arc<MemoryDeviceStore>,
    prober: Arc<ScriptedProber>,
    sink: Arc<RecordingSink>,
}

fn harness(delay: Duration) -> Harness {
    let registry = Arc::new(MemoryNetworkRegistry::new());
    let devices = Arc::new(MemoryDeviceStore::new());
    let prober = Arc::new(ScriptedProber::new(delay));
    let sink = Arc::new(RecordingSink::default());
    let config = ScanConfig {
        stop_grace_ms: 2000,
        ..ScanConfig::default()
    };
    let manager = ScanManager::new(
        registry,
        devices.clone(),
        prober.clone(),
        sink.clone(),
        config,
    );
    Harness {
        manager,
        devices,
        prober,
        sink,
    }
}

async fn wait_until_idle(manager: &ScanManager) {
    for _ in 0..400 {
        if !manager.is_running() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("sweep did not reach idle in time");
}

fn web_host() -> ProbeReport {
    ProbeReport {
        open_ports: vec![PortService {
            port: 80,
            banner: Some("nginx/1.24".to_string()),
        }],
        ..Default::default()
    }
}

#[tokio::test]
async fn completed_sweep_discovers_devices_in_event_order() {
    let h = harness(Duration::ZERO);
    let network = h.manager.create_network("10.1.0.0/30", "lab", "").await.unwrap();
    h.prober.set_report("10.1.0.1", web_host());

    h.manager.start_scan(network.id).await.unwrap();
    let state = h.manager.get_state();
    assert!(state.running);
    assert_eq!(state.current_network, Some(network.id));
    assert!(state.started_at.is_some());

    wait_until_idle(&h.manager).await;

    let state = h.manager.get_state();
    assert!(!state.running);
    assert_eq!(state.current_network, None);
    assert_eq!(state.error, None);

    let devices = h.devices.find_by_network(network.id).await.unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].ipv4.to_string(), "10.1.0.1");
    assert_eq!(devices[0].ports[0].port, 80);

    let kinds = h.sink.kinds();
    assert_eq!(kinds.first(), Some(&"network_created"));
    let started = kinds.iter().position(|&k| k == "scan_started").unwrap();
    let discovered = kinds.iter().position(|&k| k == "device_discovered").unwrap();
    let completed = kinds.iter().position(|&k| k == "scan_completed").unwrap();
    assert!(started < discovered && discovered < completed);
    assert!(!kinds.contains(&"scan_stopped"));
}

/// Device store that is entirely unreachable.
struct OfflineDeviceStore;

#[async_trait]
impl DeviceStore for OfflineDeviceStore {
    async fn upsert(&self, _device: Device) -> Result<Device, StoreError> {
        Err(StoreError::Unavailable("device store offline".into()))
    }
    async fn find_by_address(
        &self,
        _network_id: NetworkId,
        _ip: Ipv4Addr,
    ) -> Result<Option<Device>, StoreError> {
        Err(StoreError::Unavailable("device store offline".into()))
    }
    async fn find_by_network(&self, _network_id: NetworkId) -> Result<Vec<Device>, StoreError> {
        Err(StoreError::Unavailable("device store offline".into()))
    }
    async fn find_all(&self) -> Result<Vec<Device>, StoreError> {
        Err(StoreError::Unavailable("device store offline".into()))
    }
    async fn delete(&self, _id: DeviceId) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("device store offline".into()))
    }
    async fn delete_by_network(&self, _network_id: NetworkId) -> Result<u32, StoreError> {
        Err(StoreError::Unavailable("device store offline".into()))
    }
}

#[tokio::test]
async fn store_outage_aborts_sweep_without_wedging_state() {
    let registry = Arc::new(MemoryNetworkRegistry::new());
    let prober = Arc::new(ScriptedProber::new(Duration::ZERO));
    let sink = Arc::new(RecordingSink::default());
    let manager = ScanManager::new(
        registry,
        Arc::new(OfflineDeviceStore),
        prober.clone(),
        sink.clone(),
        ScanConfig::default(),
    );

    let network = manager.create_network("10.1.0.0/30", "lab", "").await.unwrap();
    prober.set_report("10.1.0.1", web_host());

    manager.start_scan(network.id).await.unwrap();
    wait_until_idle(&manager).await;

    let state = manager.get_state();
    assert!(!state.running);
    assert_eq!(state.current_network, None);
    assert!(state.error.as_deref().unwrap_or("").contains("offline"));

    let kinds = sink.kinds();
    assert!(kinds.contains(&"scan_failed"));
    assert!(!kinds.contains(&"scan_completed"));
}

#[tokio::test]
async fn start_scan_unknown_network_has_no_side_effects() {
    let h = harness(Duration::ZERO);
    let phantom = netwarden_core::NetworkId::new();

    let err = h.manager.start_scan(phantom).await.unwrap_err();
    assert!(matches!(err, ScanError::NetworkNotFound(id) if id == phantom));
    assert!(!h.manager.is_running());
    assert!(h.sink.kinds().is_empty());
}

#[tokio::test]
async fn second_start_is_rejected_while_first_runs() {
    let h = harness(Duration::from_millis(200));
    let a = h.manager.create_network("10.1.0.0/30", "a", "").await.unwrap();
    let b = h.manager.create_network("10.2.0.0/30", "b", "").await.unwrap();

    h.manager.start_scan(a.id).await.unwrap();
    let err = h.manager.start_scan(b.id).await.unwrap_err();
    assert!(matches!(err, ScanError::AlreadyRunning));

    // State still reflects only the first network.
    let state = h.manager.get_state();
    assert_eq!(state.current_network, Some(a.id));

    // Exactly one scan_started despite two calls.
    let starts = h.sink.kinds().iter().filter(|&&k| k == "scan_started").count();
    assert_eq!(starts, 1);

    wait_until_idle(&h.manager).await;
}

#[tokio::test]
async fn stop_when_idle_is_not_running() {
    let h = harness(Duration::ZERO);
    assert!(matches!(
        h.manager.stop_scan().await,
        Err(ScanError::NotRunning)
    ));
}

#[tokio::test]
async fn stop_scan_cancels_and_acknowledges() {
    let h = harness(Duration::from_millis(300));
    let network = h.manager.create_network("10.3.0.0/24", "big", "").await.unwrap();

    h.manager.start_scan(network.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.manager.stop_scan().await.unwrap();

    // Acknowledged: idle the moment stop_scan returns.
    let state = h.manager.get_state();
    assert!(!state.running);
    assert_eq!(state.current_network, None);

    let kinds = h.sink.kinds();
    assert!(kinds.contains(&"scan_stopped"));
    assert!(!kinds.contains(&"scan_completed"));

    // No merges trickle in after acknowledgement.
    let count = h.devices.find_by_network(network.id).await.unwrap().len();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(
        h.devices.find_by_network(network.id).await.unwrap().len(),
        count
    );
}

#[tokio::test]
async fn selection_is_independent_of_scanning() {
    let h = harness(Duration::from_millis(200));
    let a = h.manager.create_network("10.1.0.0/30", "a", "").await.unwrap();
    let b = h.manager.create_network("10.2.0.0/30", "b", "").await.unwrap();

    h.manager.start_scan(a.id).await.unwrap();
    h.manager.set_selected_network(b.id).await.unwrap();

    // The sweep target is unaffected by selection.
    let current = h.manager.current_network().await.unwrap().unwrap();
    assert_eq!(current.id, a.id);
    let shown = h.manager.selected_or_current_network().await.unwrap().unwrap();
    assert_eq!(shown.id, a.id);

    wait_until_idle(&h.manager).await;

    // Once idle, the selection wins.
    assert!(h.manager.current_network().await.unwrap().is_none());
    let shown = h.manager.selected_or_current_network().await.unwrap().unwrap();
    assert_eq!(shown.id, b.id);
}

#[tokio::test]
async fn reobservation_merges_additively_without_duplicate_events() {
    let h = harness(Duration::ZERO);
    let network = h.manager.create_network("10.1.0.0/30", "lab", "").await.unwrap();

    h.prober.set_report("10.1.0.1", web_host());
    h.manager.start_scan(network.id).await.unwrap();
    wait_until_idle(&h.manager).await;

    // Second sweep: port 80 transiently unresponsive, ssh now visible.
    h.prober.clear();
    h.prober.set_report(
        "10.1.0.1",
        ProbeReport {
            open_ports: vec![PortService {
                port: 22,
                banner: Some("SSH-2.0-OpenSSH_9.6".to_string()),
            }],
            ..Default::default()
        },
    );
    h.manager.start_scan(network.id).await.unwrap();
    wait_until_idle(&h.manager).await;

    let devices = h.devices.find_by_network(network.id).await.unwrap();
    let ports: Vec<u16> = devices[0].ports.iter().map(|p| p.port).collect();
    assert_eq!(ports, vec![22, 80]);

    let kinds = h.sink.kinds();
    // Seen, then seen again while still Online: one discovery, no
    // status-change noise.
    assert_eq!(kinds.iter().filter(|&&k| k == "device_discovered").count(), 1);
    assert_eq!(
        kinds.iter().filter(|&&k| k == "device_status_changed").count(),
        0
    );
}

#[tokio::test]
async fn user_overrides_survive_rescans() {
    let h = harness(Duration::ZERO);
    let network = h.manager.create_network("10.1.0.0/30", "lab", "").await.unwrap();
    h.prober.set_report("10.1.0.1", web_host());

    h.manager.start_scan(network.id).await.unwrap();
    wait_until_idle(&h.manager).await;

    let mut device = h
        .devices
        .find_by_address(network.id, "10.1.0.1".parse().unwrap())
        .await
        .unwrap()
        .unwrap();
    device.name = Some("Hallway camera".to_string());
    device.comment = Some("PoE port 3".to_string());
    h.devices.upsert(device).await.unwrap();

    h.manager.start_scan(network.id).await.unwrap();
    wait_until_idle(&h.manager).await;

    let device = h
        .devices
        .find_by_address(network.id, "10.1.0.1".parse().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(device.name.as_deref(), Some("Hallway camera"));
    assert_eq!(device.comment.as_deref(), Some("PoE port 3"));
}

#[tokio::test]
async fn delete_network_is_guarded() {
    let h = harness(Duration::ZERO);
    let network = h.manager.create_network("10.1.0.0/30", "lab", "").await.unwrap();
    h.prober.set_report("10.1.0.1", web_host());
    h.manager.start_scan(network.id).await.unwrap();
    wait_until_idle(&h.manager).await;

    // Devices attached: plain delete refused.
    let err = h.manager.delete_network(network.id, false).await.unwrap_err();
    assert!(matches!(err, ScanError::NetworkNotEmpty { devices: 1, .. }));

    // Force cascades.
    h.manager.delete_network(network.id, true).await.unwrap();
    assert!(h.devices.find_by_network(network.id).await.unwrap().is_empty());
    assert!(h.sink.kinds().contains(&"network_deleted"));
}

#[tokio::test]
async fn delete_refused_while_network_is_being_swept() {
    let h = harness(Duration::from_millis(200));
    let network = h.manager.create_network("10.1.0.0/30", "lab", "").await.unwrap();

    h.manager.start_scan(network.id).await.unwrap();
    let err = h.manager.delete_network(network.id, true).await.unwrap_err();
    assert!(matches!(err, ScanError::AlreadyRunning));

    wait_until_idle(&h.manager).await;
    h.manager.delete_network(network.id, true).await.unwrap();
}

#[tokio::test]
async fn create_network_rejects_bad_cidr() {
    let h = harness(Duration::ZERO);
    for bad in ["10.0.0.0/33", "wat", "fe80::/64", "10.0.0.0"] {
        let err = h.manager.create_network(bad, "x", "").await.unwrap_err();
        assert!(matches!(err, ScanError::InvalidNetwork(_)), "{bad}");
    }
    assert!(h.sink.kinds().is_empty());
}

#[tokio::test]
async fn list_networks_carries_device_counts() {
    let h = harness(Duration::ZERO);
    let a = h.manager.create_network("10.1.0.0/30", "a", "").await.unwrap();
    h.manager.create_network("10.2.0.0/30", "b", "").await.unwrap();
    h.prober.set_report("10.1.0.1", web_host());
    h.prober.set_report("10.1.0.2", ProbeReport::default());

    h.manager.start_scan(a.id).await.unwrap();
    wait_until_idle(&h.manager).await;

    let networks = h.manager.list_networks().await.unwrap();
    assert_eq!(networks.len(), 2);
    let by_name = |n: &str| networks.iter().find(|x| x.name == n).unwrap().device_count;
    assert_eq!(by_name("a"), 2);
    assert_eq!(by_name("b"), 0);

    let summary = h.manager.status_summary(a.id).await.unwrap();
    assert_eq!(summary.online, 2);
}
