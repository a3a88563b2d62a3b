//! Scan orchestration: the single source of truth for "is a sweep
//! active," which network it targets, and which network the user has
//! selected for viewing.
//!
//! All mutation of the shared [`ScanState`] goes through one mutex held
//! only for non-blocking sections. The sweep itself runs as a spawned,
//! cancellable background task; `start_scan` never blocks on sweep
//! completion. Registry and device store are re-queried for every
//! decision that depends on them; the scan state alone is authoritative
//! in memory.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use netwarden_core::{
    Event, EventPayload, EventSink, Network, NetworkId, ScanError, ScanState,
    types::StatusSummary,
};

use crate::config::ScanConfig;
use crate::liveness::LivenessEvaluator;
use crate::probe::HostProber;
use crate::store::{DeviceStore, NetworkRegistry};
use crate::sweep::SweepExecutor;

pub struct ScanManager {
    registry: Arc<dyn NetworkRegistry>,
    devices: Arc<dyn DeviceStore>,
    prober: Arc<dyn HostProber>,
    events: Arc<dyn EventSink>,
    config: ScanConfig,
    state: Arc<Mutex<ManagerState>>,
}

#[derive(Default)]
struct ManagerState {
    snapshot: ScanState,
    /// Identifies the active sweep so a stale task cannot finalize a
    /// newer run's state.
    run_id: Option<Uuid>,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

fn lock(state: &Mutex<ManagerState>) -> MutexGuard<'_, ManagerState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl ScanManager {
    pub fn new(
        registry: Arc<dyn NetworkRegistry>,
        devices: Arc<dyn DeviceStore>,
        prober: Arc<dyn HostProber>,
        events: Arc<dyn EventSink>,
        config: ScanConfig,
    ) -> Self {
        Self {
            registry,
            devices,
            prober,
            events,
            config,
            state: Arc::new(Mutex::new(ManagerState::default())),
        }
    }

    // ── Scan lifecycle ────────────────────────────────────────

    /// Begin sweeping `network_id` on a background task.
    ///
    /// Fails with `NetworkNotFound`, `InvalidNetwork`, or
    /// `AlreadyRunning` without side effects; on success the state is
    /// Running and a `ScanStarted` event has been emitted before this
    /// returns.
    pub async fn start_scan(&self, network_id: NetworkId) -> Result<(), ScanError> {
        let network = self
            .registry
            .find_by_id(network_id)
            .await?
            .ok_or(ScanError::NetworkNotFound(network_id))?;
        network.ipv4_net()?;

        let cancel = CancellationToken::new();
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        let executor = SweepExecutor::new(
            self.devices.clone(),
            self.prober.clone(),
            self.events.clone(),
            &self.config,
        );

        let mut state = lock(&self.state);
        if state.snapshot.running {
            return Err(ScanError::AlreadyRunning);
        }
        state.snapshot.running = true;
        state.snapshot.current_network = Some(network_id);
        state.snapshot.started_at = Some(started_at);
        state.snapshot.error = None;
        state.run_id = Some(run_id);
        state.cancel = Some(cancel.clone());

        // Emit before the task can produce any device events, still
        // inside the critical section so ordering is fixed.
        self.events.emit(Event::new(EventPayload::ScanStarted {
            network_id,
            cidr: network.cidr.clone(),
        }));

        let handle = tokio::spawn(run_sweep(
            executor,
            network,
            cancel,
            run_id,
            started_at,
            self.state.clone(),
            self.events.clone(),
        ));
        state.handle = Some(handle);

        Ok(())
    }

    /// Cancel the active sweep and wait for it to acknowledge, up to
    /// the configured grace period.
    pub async fn stop_scan(&self) -> Result<(), ScanError> {
        let (cancel, handle, network_id) = {
            let mut state = lock(&self.state);
            if !state.snapshot.running {
                return Err(ScanError::NotRunning);
            }
            (
                state.cancel.take(),
                state.handle.take(),
                state.snapshot.current_network,
            )
        };

        let Some(cancel) = cancel else {
            // A concurrent stop already took the handle; nothing to do.
            return Ok(());
        };
        cancel.cancel();

        let Some(mut handle) = handle else {
            return Ok(());
        };

        let grace = Duration::from_millis(self.config.stop_grace_ms);
        tokio::select! {
            _ = &mut handle => {
                // The sweep task finalized state and emitted ScanStopped.
            }
            _ = tokio::time::sleep(grace) => {
                handle.abort();
                tracing::warn!("Sweep did not acknowledge stop within grace period; aborted");
                let mut state = lock(&self.state);
                if state.run_id.is_some() {
                    state.run_id = None;
                    state.cancel = None;
                    state.handle = None;
                    set_idle(&mut state.snapshot, None);
                    if let Some(network_id) = network_id {
                        self.events
                            .emit(Event::new(EventPayload::ScanStopped { network_id }));
                    }
                }
            }
        }

        Ok(())
    }

    /// Consistent snapshot of the scan state.
    pub fn get_state(&self) -> ScanState {
        lock(&self.state).snapshot.clone()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).snapshot.running
    }

    /// Designate the network to display, independent of scanning.
    pub async fn set_selected_network(&self, network_id: NetworkId) -> Result<(), ScanError> {
        self.registry
            .find_by_id(network_id)
            .await?
            .ok_or(ScanError::NetworkNotFound(network_id))?;
        lock(&self.state).snapshot.selected_network = Some(network_id);
        Ok(())
    }

    /// The network actively being swept, or `None` when idle.
    pub async fn current_network(&self) -> Result<Option<Network>, ScanError> {
        let id = lock(&self.state).snapshot.current_network;
        self.resolve(id).await
    }

    /// The network a consumer should display: the one being swept if a
    /// sweep is active, else the selected one, else none.
    pub async fn selected_or_current_network(&self) -> Result<Option<Network>, ScanError> {
        let id = {
            let state = lock(&self.state);
            state
                .snapshot
                .current_network
                .or(state.snapshot.selected_network)
        };
        self.resolve(id).await
    }

    async fn resolve(&self, id: Option<NetworkId>) -> Result<Option<Network>, ScanError> {
        match id {
            Some(id) => Ok(self.registry.find_by_id(id).await?),
            None => Ok(None),
        }
    }

    // ── Network registry operations ───────────────────────────

    /// Create a scan target network; the CIDR is validated here and
    /// never silently defaulted.
    pub async fn create_network(
        &self,
        cidr: &str,
        name: &str,
        description: &str,
    ) -> Result<Network, ScanError> {
        let network = Network::new(cidr, name, description)?;
        let network = self.registry.create(network).await?;
        self.events.emit(Event::new(EventPayload::NetworkCreated {
            network_id: network.id,
            cidr: network.cidr.clone(),
        }));
        Ok(network)
    }

    /// Update a network's CIDR or metadata. Identity is immutable.
    pub async fn update_network(
        &self,
        network_id: NetworkId,
        cidr: &str,
        name: &str,
        description: &str,
    ) -> Result<Network, ScanError> {
        let mut network = self
            .registry
            .find_by_id(network_id)
            .await?
            .ok_or(ScanError::NetworkNotFound(network_id))?;
        let parsed = netwarden_core::types::parse_cidr(cidr)?;
        network.cidr = parsed.to_string();
        network.name = name.to_string();
        network.description = description.to_string();
        let network = self.registry.update(network).await?;
        self.events.emit(Event::new(EventPayload::NetworkUpdated {
            network_id: network.id,
        }));
        Ok(network)
    }

    /// Delete a network. Refused while a sweep targets it. Without
    /// `force`, refused when devices are still attached; with `force`,
    /// its devices are removed too.
    pub async fn delete_network(&self, network_id: NetworkId, force: bool) -> Result<(), ScanError> {
        {
            let state = lock(&self.state);
            if state.snapshot.running && state.snapshot.current_network == Some(network_id) {
                return Err(ScanError::AlreadyRunning);
            }
        }

        self.registry
            .find_by_id(network_id)
            .await?
            .ok_or(ScanError::NetworkNotFound(network_id))?;

        let attached = self.devices.find_by_network(network_id).await?.len() as u32;
        if attached > 0 && !force {
            return Err(ScanError::NetworkNotEmpty {
                network_id,
                devices: attached,
            });
        }

        let devices_removed = if attached > 0 {
            self.devices.delete_by_network(network_id).await?
        } else {
            0
        };
        self.registry.delete(network_id).await?;

        {
            let mut state = lock(&self.state);
            if state.snapshot.selected_network == Some(network_id) {
                state.snapshot.selected_network = None;
            }
        }

        self.events.emit(Event::new(EventPayload::NetworkDeleted {
            network_id,
            devices_removed,
        }));
        Ok(())
    }

    /// All networks with their derived device counts.
    pub async fn list_networks(&self) -> Result<Vec<Network>, ScanError> {
        let mut networks = self.registry.find_all().await?;
        for network in &mut networks {
            network.device_count = self.devices.find_by_network(network.id).await?.len() as u32;
        }
        Ok(networks)
    }

    /// Online/idle/offline tallies for one network.
    pub async fn status_summary(&self, network_id: NetworkId) -> Result<StatusSummary, ScanError> {
        let devices = self.devices.find_by_network(network_id).await?;
        Ok(StatusSummary::tally(devices.iter()))
    }

    // ── Liveness ──────────────────────────────────────────────

    /// Age every device of every network from the passage of time.
    /// Returns the number of status transitions.
    pub async fn evaluate_liveness(&self) -> Result<u32, ScanError> {
        let evaluator = LivenessEvaluator::new(
            self.devices.clone(),
            self.events.clone(),
            self.config.liveness,
        );
        let now = Utc::now();
        let mut transitions = 0;
        for network in self.registry.find_all().await? {
            transitions += evaluator.evaluate_network(network.id, now).await?;
        }
        Ok(transitions)
    }
}

fn set_idle(snapshot: &mut ScanState, error: Option<String>) {
    snapshot.running = false;
    snapshot.current_network = None;
    snapshot.started_at = None;
    snapshot.error = error;
}

/// Background task wrapping one sweep: runs it, then finalizes state
/// and emits exactly one terminal event for its path.
async fn run_sweep(
    executor: SweepExecutor,
    network: Network,
    cancel: CancellationToken,
    run_id: Uuid,
    started_at: DateTime<Utc>,
    state: Arc<Mutex<ManagerState>>,
    events: Arc<dyn EventSink>,
) {
    let summary = executor.run(&network, &cancel).await;

    let network_id = network.id;
    let payload = if let Some(error) = summary.fatal.clone() {
        tracing::error!(cidr = %network.cidr, %error, "Sweep aborted");
        EventPayload::ScanFailed { network_id, error }
    } else if summary.cancelled {
        EventPayload::ScanStopped { network_id }
    } else {
        let duration_ms = Utc::now()
            .signed_duration_since(started_at)
            .num_milliseconds()
            .max(0) as u64;
        EventPayload::ScanCompleted {
            network_id,
            devices_seen: summary.reachable,
            duration_ms,
        }
    };

    // Flip to idle and emit the terminal event inside one critical
    // section: a state poller that sees idle can rely on the terminal
    // event already existing.
    let mut state = lock(&state);
    if state.run_id != Some(run_id) {
        // A stop already force-finalized this run.
        return;
    }
    state.run_id = None;
    state.cancel = None;
    state.handle = None;
    set_idle(&mut state.snapshot, summary.fatal);
    events.emit(Event::new(payload));
}
