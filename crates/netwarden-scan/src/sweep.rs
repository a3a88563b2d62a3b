//! Sweep execution: expand a CIDR into candidate hosts, fan probes out
//! under a bounded worker pool, and merge results into the device store.
//!
//! Probes run concurrently but results are merged sequentially by the
//! drain loop, so two results can never race on the same record. The
//! sweep is cooperatively cancellable between dispatches; in-flight
//! probes finish within their own timeouts.

use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use netwarden_core::{
    Device, Event, EventPayload, EventSink, LivenessThresholds, Network, NetworkId, StoreError,
};

use crate::config::ScanConfig;
use crate::liveness::LivenessEvaluator;
use crate::probe::{HostProber, ProbeOutcome, ProbeReport};
use crate::store::DeviceStore;

/// Executes one sweep of one network.
pub struct SweepExecutor {
    devices: Arc<dyn DeviceStore>,
    prober: Arc<dyn HostProber>,
    events: Arc<dyn EventSink>,
    evaluator: LivenessEvaluator,
    thresholds: LivenessThresholds,
    max_concurrent: usize,
    max_hosts: usize,
}

/// What one sweep did.
#[derive(Debug, Default)]
pub struct SweepSummary {
    pub probed: u32,
    pub reachable: u32,
    pub discovered: u32,
    pub cancelled: bool,
    /// Message of the fatal failure that aborted the sweep, if any.
    pub fatal: Option<String>,
}

struct MergeOutcome {
    discovered: bool,
}

impl SweepExecutor {
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        prober: Arc<dyn HostProber>,
        events: Arc<dyn EventSink>,
        config: &ScanConfig,
    ) -> Self {
        Self {
            evaluator: LivenessEvaluator::new(devices.clone(), events.clone(), config.liveness),
            devices,
            prober,
            events,
            thresholds: config.liveness,
            max_concurrent: config.max_concurrent_probes.max(1),
            max_hosts: config.max_hosts_per_sweep.max(1),
        }
    }

    /// Run the sweep to exhaustion or cancellation.
    pub async fn run(&self, network: &Network, cancel: &CancellationToken) -> SweepSummary {
        let mut summary = SweepSummary::default();

        let net = match network.ipv4_net() {
            Ok(net) => net,
            Err(e) => {
                summary.fatal = Some(e.to_string());
                return summary;
            }
        };

        let (addrs, usable) = candidate_hosts(&net, self.max_hosts);
        if usable > addrs.len() as u64 {
            tracing::warn!(
                cidr = %network.cidr,
                usable,
                capped = addrs.len(),
                "Range exceeds sweep cap; probing the first addresses only"
            );
        }

        tracing::info!(
            cidr = %network.cidr,
            hosts = addrs.len(),
            workers = self.max_concurrent,
            "Sweep starting"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut join: JoinSet<(Ipv4Addr, ProbeOutcome)> = JoinSet::new();

        for ip in addrs {
            let permit = tokio::select! {
                _ = cancel.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let prober = self.prober.clone();
            join.spawn(async move {
                let outcome = prober.probe(ip).await;
                drop(permit);
                (ip, outcome)
            });
            summary.probed += 1;
        }

        // Drain in-flight probes; each result merges sequentially here.
        while let Some(result) = join.join_next().await {
            let (ip, outcome) = match result {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "Probe task failed");
                    continue;
                }
            };
            let report = match outcome {
                ProbeOutcome::Unreachable => continue,
                ProbeOutcome::Reachable(report) => report,
            };
            summary.reachable += 1;

            match self.merge_sighting(network.id, ip, report).await {
                Ok(outcome) => {
                    if outcome.discovered {
                        summary.discovered += 1;
                    }
                }
                Err(e) if e.is_fatal() => {
                    summary.fatal = Some(e.to_string());
                    join.abort_all();
                    break;
                }
                Err(e) => {
                    tracing::warn!(ip = %ip, error = %e, "Device merge failed; skipping");
                }
            }
        }

        summary.cancelled = summary.cancelled || cancel.is_cancelled();

        // Terminal pass: age devices not seen by this sweep.
        if summary.fatal.is_none() {
            if let Err(e) = self.evaluator.evaluate_network(network.id, Utc::now()).await {
                summary.fatal = Some(e.to_string());
            }
        }

        tracing::info!(
            cidr = %network.cidr,
            probed = summary.probed,
            reachable = summary.reachable,
            discovered = summary.discovered,
            cancelled = summary.cancelled,
            "Sweep finished"
        );
        summary
    }

    /// Merge one reachable probe into the store and re-derive liveness.
    async fn merge_sighting(
        &self,
        network_id: NetworkId,
        ip: Ipv4Addr,
        report: ProbeReport,
    ) -> Result<MergeOutcome, StoreError> {
        let now = Utc::now();
        let existing = self.devices.find_by_address(network_id, ip).await?;
        let discovered = existing.is_none();
        let previous_status = existing.as_ref().map(|d| d.status);

        let merged = merge_report(network_id, ip, existing, &report, now, &self.thresholds);
        let saved = self.devices.upsert(merged).await?;

        if discovered {
            self.events.emit(Event::new(EventPayload::DeviceDiscovered {
                device_id: saved.id,
                network_id,
                ip,
            }));
        } else if let Some(previous) = previous_status {
            if previous != saved.status {
                self.events.emit(Event::new(EventPayload::DeviceStatusChanged {
                    device_id: saved.id,
                    ip,
                    from: previous,
                    to: saved.status,
                }));
            }
        }

        Ok(MergeOutcome { discovered })
    }
}

/// Candidate addresses for `net`, capped at `max_hosts`, plus the full
/// usable host count of the range (`2^(32-p) - 2`, with /31 and /32
/// covering every address).
pub fn candidate_hosts(net: &Ipv4Net, max_hosts: usize) -> (Vec<Ipv4Addr>, u64) {
    let prefix = net.prefix_len() as u32;
    let usable = if prefix >= 31 {
        1u64 << (32 - prefix)
    } else {
        (1u64 << (32 - prefix)) - 2
    };
    let addrs = net.hosts().take(max_hosts).collect();
    (addrs, usable)
}

/// Merge a probe report into the existing record, additively.
///
/// Previously known ports and attributes are never discarded just
/// because this pass did not re-observe them; user-set name and comment
/// are untouched. `first_seen` is set only for a brand-new record.
fn merge_report(
    network_id: NetworkId,
    ip: Ipv4Addr,
    existing: Option<Device>,
    report: &ProbeReport,
    now: DateTime<Utc>,
    thresholds: &LivenessThresholds,
) -> Device {
    let mut device =
        existing.unwrap_or_else(|| Device::first_sighting(network_id, ip, now));
    device.last_seen = now;

    if report.mac.is_some() {
        device.mac = report.mac.clone();
    }
    if report.hostname.is_some() {
        device.hostname = report.hostname.clone();
    }

    for seen in &report.open_ports {
        match device.ports.iter_mut().find(|p| p.port == seen.port) {
            Some(known) => {
                if seen.banner.is_some() {
                    known.banner = seen.banner.clone();
                }
            }
            None => device.ports.push(seen.clone()),
        }
    }
    device.ports.sort_by_key(|p| p.port);

    for addr in &report.ipv6_addresses {
        if !device.ipv6_addresses.contains(addr) {
            device.ipv6_addresses.push(*addr);
        }
    }

    device.status = thresholds.status_for(now, device.last_seen);
    device
}
