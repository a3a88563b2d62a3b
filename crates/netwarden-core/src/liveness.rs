//! Liveness policy: pure derivation of device status from sighting times.
//!
//! Status is always a function of `now - last_seen` against the
//! configured thresholds; it is never set directly from a probe result.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::types::DeviceStatus;

/// Thresholds separating Online/Idle/Offline, in seconds since the
/// last sighting.
///
/// Defaults: Online within 5 minutes, Idle within 30 minutes, Offline
/// beyond that.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct LivenessThresholds {
    /// Seen within this many seconds: Online.
    #[serde(default = "default_online_secs")]
    pub online_secs: u64,
    /// Seen within this many seconds (but past `online_secs`): Idle.
    #[serde(default = "default_idle_secs")]
    pub idle_secs: u64,
}

fn default_online_secs() -> u64 {
    300
}

fn default_idle_secs() -> u64 {
    1800
}

impl Default for LivenessThresholds {
    fn default() -> Self {
        Self {
            online_secs: default_online_secs(),
            idle_secs: default_idle_secs(),
        }
    }
}

impl LivenessThresholds {
    /// Classify a device from its last sighting. Idempotent; callers
    /// compare against the stored status to detect real transitions.
    pub fn status_for(&self, now: DateTime<Utc>, last_seen: DateTime<Utc>) -> DeviceStatus {
        let elapsed = now.signed_duration_since(last_seen).num_seconds().max(0) as u64;
        if elapsed <= self.online_secs {
            DeviceStatus::Online
        } else if elapsed <= self.idle_secs {
            DeviceStatus::Idle
        } else {
            DeviceStatus::Offline
        }
    }
}
