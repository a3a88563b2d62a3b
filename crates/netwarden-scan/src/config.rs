//! Configuration for the netwarden scan core.

use netwarden_core::LivenessThresholds;
use serde::Deserialize;

/// Top-level scan configuration.
///
/// Loaded from `netwarden.toml` `[scan]` section or
/// `NETWARDEN_SCAN__` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// TCP ports probed on every candidate host.
    #[serde(default = "default_probe_ports")]
    pub probe_ports: Vec<u16>,

    /// Per-port connect timeout in milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// How long to wait for a service greeting after connect.
    #[serde(default = "default_banner_timeout_ms")]
    pub banner_timeout_ms: u64,

    /// Hosts probed concurrently within one sweep.
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,

    /// Upper bound on addresses probed in a single sweep. Ranges wider
    /// than this (prefixes shorter than /24) are truncated, with a log
    /// line recording how much of the range was covered.
    #[serde(default = "default_max_hosts_per_sweep")]
    pub max_hosts_per_sweep: usize,

    /// How long `stop_scan` waits for the sweep task to acknowledge
    /// cancellation before aborting it.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,

    /// Online/idle/offline thresholds.
    #[serde(default)]
    pub liveness: LivenessThresholds,

    /// Interval of the daemon's periodic liveness pass.
    #[serde(default = "default_liveness_tick_secs")]
    pub liveness_tick_secs: u64,

    /// Networks scanned on a schedule in daemon mode.
    #[serde(default)]
    pub networks: Vec<NetworkSchedule>,
}

/// A network with its daemon-mode sweep schedule.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkSchedule {
    /// CIDR target (e.g., "192.168.1.0/24").
    pub cidr: String,

    /// Human-readable name for this network.
    pub name: Option<String>,

    /// Sweep interval in seconds.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Whether this network is enabled for scanning.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_probe_ports() -> Vec<u16> {
    vec![
        21, 22, 23, 25, 53, 80, 110, 139, 143, 443, 445, 515, 631, 3306, 3389, 5432, 8080, 8443,
        9100,
    ]
}

fn default_probe_timeout_ms() -> u64 {
    1500
}

fn default_banner_timeout_ms() -> u64 {
    500
}

fn default_max_concurrent_probes() -> usize {
    16
}

fn default_max_hosts_per_sweep() -> usize {
    512
}

fn default_stop_grace_ms() -> u64 {
    5000
}

fn default_liveness_tick_secs() -> u64 {
    60
}

fn default_interval() -> u64 {
    1800
}

fn default_true() -> bool {
    true
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            probe_ports: default_probe_ports(),
            probe_timeout_ms: default_probe_timeout_ms(),
            banner_timeout_ms: default_banner_timeout_ms(),
            max_concurrent_probes: default_max_concurrent_probes(),
            max_hosts_per_sweep: default_max_hosts_per_sweep(),
            stop_grace_ms: default_stop_grace_ms(),
            liveness: LivenessThresholds::default(),
            liveness_tick_secs: default_liveness_tick_secs(),
            networks: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ScanConfig::default();
        assert_eq!(config.probe_timeout_ms, 1500);
        assert_eq!(config.max_concurrent_probes, 16);
        assert_eq!(config.max_hosts_per_sweep, 512);
        assert_eq!(config.liveness.online_secs, 300);
        assert!(config.probe_ports.contains(&22));
        assert!(config.networks.is_empty());
    }

    #[test]
    fn test_schedule_deserialization() {
        let schedule: NetworkSchedule =
            serde_json::from_str(r#"{"cidr": "10.0.0.0/24"}"#).unwrap();
        assert_eq!(schedule.cidr, "10.0.0.0/24");
        assert_eq!(schedule.interval_secs, 1800);
        assert!(schedule.enabled);
    }
}
