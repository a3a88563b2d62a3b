//! Core domain types for the netwarden device inventory.
//!
//! These types are shared between the scan core and any presentation or
//! storage layer built on top of it.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ScanError;

/// DNS namespace UUID for deterministic device IDs.
const NETWARDEN_NS: Uuid = Uuid::from_bytes([
    0x6b, 0xa7, 0xb8, 0x10, 0x9d, 0xad, 0x11, 0xd1, 0x80, 0xb4, 0x00, 0xc0, 0x4f, 0xd4, 0x30, 0xc8,
]);

// ── Networks ──────────────────────────────────────────────────────

/// Unique identifier for a scan target network.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NetworkId(pub Uuid);

impl NetworkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NetworkId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A configured scan target: an IPv4 CIDR range with metadata.
///
/// Identity is immutable once created; the CIDR is validated at
/// construction and never silently defaulted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: NetworkId,
    pub cidr: String,
    pub name: String,
    pub description: String,
    /// Derived from the device store when listing; not authoritative.
    #[serde(default)]
    pub device_count: u32,
}

impl Network {
    /// Create a network, rejecting anything that is not a valid IPv4 CIDR.
    pub fn new(cidr: &str, name: &str, description: &str) -> Result<Self, ScanError> {
        let net = parse_cidr(cidr)?;
        Ok(Self {
            id: NetworkId::new(),
            cidr: net.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            device_count: 0,
        })
    }

    /// The parsed CIDR. Stored networks always parse; a hand-built
    /// `Network` with a bad CIDR surfaces `InvalidNetwork` here.
    pub fn ipv4_net(&self) -> Result<Ipv4Net, ScanError> {
        parse_cidr(&self.cidr)
    }
}

/// Parse a dotted-quad IPv4 CIDR (`192.168.1.0/24`).
///
/// IPv6 and malformed input are rejected synchronously.
pub fn parse_cidr(s: &str) -> Result<Ipv4Net, ScanError> {
    s.trim()
        .parse::<Ipv4Net>()
        .map_err(|_| ScanError::InvalidNetwork(s.to_string()))
}

// ── Devices ───────────────────────────────────────────────────────

/// Unique identifier for a discovered device.
///
/// Deterministic: derived from the owning network and the device's
/// primary IPv4 address, so repeated sightings upsert the same record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DeviceId(pub Uuid);

impl DeviceId {
    /// Derive the identity for a device at `ip` within `network_id`.
    pub fn for_address(network_id: NetworkId, ip: Ipv4Addr) -> Self {
        Self(Uuid::new_v5(
            &NETWARDEN_NS,
            format!("{}:device:{}", network_id.0, ip).as_bytes(),
        ))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Liveness classification derived from the time since last sighting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Idle,
    Offline,
}

/// An open TCP port with an optional service banner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortService {
    pub port: u16,
    pub banner: Option<String>,
}

/// A device in the inventory.
///
/// Keyed by primary IPv4 address within its network. MAC and IPv6
/// addresses are advisory secondary identities, discovered
/// opportunistically. `name` and `comment` are user overrides that a
/// scan must never clobber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub network_id: NetworkId,
    pub ipv4: Ipv4Addr,
    #[serde(default)]
    pub ipv6_addresses: Vec<Ipv6Addr>,
    pub mac: Option<String>,
    pub hostname: Option<String>,
    pub vendor: Option<String>,
    /// Discovered open ports, ordered by port number.
    #[serde(default)]
    pub ports: Vec<PortService>,
    pub status: DeviceStatus,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub name: Option<String>,
    pub comment: Option<String>,
}

impl Device {
    /// A fresh record for a first sighting at `now`.
    pub fn first_sighting(network_id: NetworkId, ipv4: Ipv4Addr, now: DateTime<Utc>) -> Self {
        Self {
            id: DeviceId::for_address(network_id, ipv4),
            network_id,
            ipv4,
            ipv6_addresses: Vec::new(),
            mac: None,
            hostname: None,
            vendor: None,
            ports: Vec::new(),
            status: DeviceStatus::Online,
            first_seen: now,
            last_seen: now,
            name: None,
            comment: None,
        }
    }

    /// The label shown for this device: user override, else hostname,
    /// else the address.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.hostname.clone())
            .unwrap_or_else(|| self.ipv4.to_string())
    }
}

// ── Scan state ────────────────────────────────────────────────────

/// Snapshot of the global scan state.
///
/// Invariant: `current_network.is_some()` implies `running`. At most
/// one sweep is running system-wide.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanState {
    pub running: bool,
    /// Network actively being swept; `None` when idle.
    pub current_network: Option<NetworkId>,
    /// Network the user has designated for viewing, independent of
    /// whether a sweep is active.
    pub selected_network: Option<NetworkId>,
    pub started_at: Option<DateTime<Utc>>,
    /// Last fatal sweep error, if any.
    pub error: Option<String>,
}

/// Online/idle/offline tallies for one network's devices.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusSummary {
    pub online: u32,
    pub idle: u32,
    pub offline: u32,
}

impl StatusSummary {
    pub fn tally<'a>(devices: impl IntoIterator<Item = &'a Device>) -> Self {
        let mut summary = Self::default();
        for device in devices {
            match device.status {
                DeviceStatus::Online => summary.online += 1,
                DeviceStatus::Idle => summary.idle += 1,
                DeviceStatus::Offline => summary.offline += 1,
            }
        }
        summary
    }
}
