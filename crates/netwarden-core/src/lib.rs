//! netwarden-core: Shared types, events, and error handling for netwarden.
//!
//! This crate provides the foundational types used across the netwarden
//! LAN reconnaissance platform:
//! - Domain types (Network, Device, ScanState) for the device inventory
//! - Liveness policy (Online/Idle/Offline derivation from sighting times)
//! - Event types and the event sink boundary
//! - Common error types

pub mod error;
pub mod events;
pub mod liveness;
pub mod types;

pub use error::{ScanError, StoreError};
pub use events::{Event, EventId, EventPayload, EventSink};
pub use liveness::LivenessThresholds;
pub use types::{Device, DeviceId, DeviceStatus, Network, NetworkId, PortService, ScanState};
