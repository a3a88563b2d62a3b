//! Periodic liveness evaluation over stored devices.
//!
//! Sighting-time merges classify a device the moment it answers; this
//! evaluator is the other trigger, aging devices into Idle/Offline from
//! the pure passage of time. It runs at the end of every sweep and on
//! the daemon's liveness ticker, so a device goes Offline even when no
//! scan is active.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use netwarden_core::{Event, EventPayload, EventSink, LivenessThresholds, NetworkId, StoreError};

use crate::store::DeviceStore;

pub struct LivenessEvaluator {
    devices: Arc<dyn DeviceStore>,
    events: Arc<dyn EventSink>,
    thresholds: LivenessThresholds,
}

impl LivenessEvaluator {
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        events: Arc<dyn EventSink>,
        thresholds: LivenessThresholds,
    ) -> Self {
        Self {
            devices,
            events,
            thresholds,
        }
    }

    /// Re-derive the status of every device in `network_id` from `now`.
    ///
    /// Persists and emits `DeviceStatusChanged` only for devices whose
    /// stored status actually differs; re-evaluation is idempotent.
    /// Returns the number of transitions. Per-device store failures are
    /// skipped; a whole-store outage propagates.
    pub async fn evaluate_network(
        &self,
        network_id: NetworkId,
        now: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        let devices = self.devices.find_by_network(network_id).await?;
        let mut transitions = 0u32;

        for mut device in devices {
            let next = self.thresholds.status_for(now, device.last_seen);
            if next == device.status {
                continue;
            }
            let previous = device.status;
            device.status = next;

            match self.devices.upsert(device.clone()).await {
                Ok(saved) => {
                    transitions += 1;
                    self.events.emit(Event::new(EventPayload::DeviceStatusChanged {
                        device_id: saved.id,
                        ip: saved.ipv4,
                        from: previous,
                        to: next,
                    }));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(ip = %device.ipv4, error = %e, "Status update failed; skipping device");
                }
            }
        }

        if transitions > 0 {
            tracing::debug!(network_id = %network_id, transitions, "Liveness pass complete");
        }
        Ok(transitions)
    }
}
