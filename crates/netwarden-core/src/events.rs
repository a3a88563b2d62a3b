//! Event types for the scan lifecycle and inventory changes.
//!
//! The core emits discrete notifications through the [`EventSink`]
//! boundary; how they are stored or displayed is a collaborator
//! concern. Emission is fire-and-forget: a sink must never fail a
//! sweep.

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{DeviceId, DeviceStatus, NetworkId};

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// An event emitted by the scan core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// The event payload, tagged by type.
///
/// Terminal sweep events are mutually exclusive: a sweep ends with
/// exactly one of `ScanCompleted` (exhausted its range), `ScanStopped`
/// (user cancellation), or `ScanFailed` (fatal store outage).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum EventPayload {
    // ── Scan lifecycle ────────────────────────────────────────
    ScanStarted {
        network_id: NetworkId,
        cidr: String,
    },
    ScanCompleted {
        network_id: NetworkId,
        devices_seen: u32,
        duration_ms: u64,
    },
    ScanStopped {
        network_id: NetworkId,
    },
    ScanFailed {
        network_id: NetworkId,
        error: String,
    },

    // ── Inventory changes ─────────────────────────────────────
    /// A device was seen for the first time.
    DeviceDiscovered {
        device_id: DeviceId,
        network_id: NetworkId,
        ip: Ipv4Addr,
    },
    /// A device's liveness status actually changed (never emitted for
    /// a re-evaluation that lands on the same value).
    DeviceStatusChanged {
        device_id: DeviceId,
        ip: Ipv4Addr,
        from: DeviceStatus,
        to: DeviceStatus,
    },

    // ── Network registry ──────────────────────────────────────
    NetworkCreated {
        network_id: NetworkId,
        cidr: String,
    },
    NetworkUpdated {
        network_id: NetworkId,
    },
    NetworkDeleted {
        network_id: NetworkId,
        devices_removed: u32,
    },
}

impl EventPayload {
    /// Short kind label used by log-style sinks.
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::ScanStarted { .. } => "scan_started",
            EventPayload::ScanCompleted { .. } => "scan_completed",
            EventPayload::ScanStopped { .. } => "scan_stopped",
            EventPayload::ScanFailed { .. } => "scan_failed",
            EventPayload::DeviceDiscovered { .. } => "device_discovered",
            EventPayload::DeviceStatusChanged { .. } => "device_status_changed",
            EventPayload::NetworkCreated { .. } => "network_created",
            EventPayload::NetworkUpdated { .. } => "network_updated",
            EventPayload::NetworkDeleted { .. } => "network_deleted",
        }
    }
}

/// Fire-and-forget consumer of scan events.
///
/// Implementations must not block and must not propagate failures back
/// into the scan core.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Sink that writes events to the tracing subscriber.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: Event) {
        match serde_json::to_string(&event.payload) {
            Ok(detail) => {
                tracing::info!(
                    target: "netwarden::events",
                    kind = event.payload.kind(),
                    %detail,
                    "event"
                );
            }
            Err(e) => {
                tracing::warn!(target: "netwarden::events", error = %e, "unserializable event");
            }
        }
    }
}
