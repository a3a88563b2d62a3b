//! Host probing: per-address reachability and service checks.
//!
//! The TCP prober connects to a configured port list. An accepted
//! connection marks the host reachable and records the open port (with
//! a short banner read); a connection refused still proves the host is
//! up. Every stage carries its own timeout, so one unresponsive host
//! can never stall a sweep beyond its bounded probe time.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::task::JoinSet;

use netwarden_core::types::PortService;

use crate::config::ScanConfig;
use crate::neigh;

/// Ports probed simultaneously per host; keeps the socket footprint of
/// a full sweep bounded by `max_concurrent_probes * PORT_BATCH`.
const PORT_BATCH: usize = 8;

/// Budget for the reverse hostname lookup.
#[cfg(unix)]
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

const BANNER_MAX: usize = 256;

/// The outcome of probing a single address.
#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    /// No response of any kind within the probe timeouts. Not proof of
    /// absence, only of non-response during this sweep.
    Unreachable,
    Reachable(ProbeReport),
}

/// What a reachable host revealed about itself.
#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    pub mac: Option<String>,
    pub hostname: Option<String>,
    /// Open ports ordered by number.
    pub open_ports: Vec<PortService>,
    pub ipv6_addresses: Vec<Ipv6Addr>,
}

/// A single-address liveness and service probe.
#[async_trait]
pub trait HostProber: Send + Sync {
    async fn probe(&self, ip: Ipv4Addr) -> ProbeOutcome;
}

/// TCP connect prober with ARP/NDP and reverse-DNS side lookups.
pub struct TcpProber {
    ports: Vec<u16>,
    connect_timeout: Duration,
    banner_timeout: Duration,
}

impl TcpProber {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            ports: config.probe_ports.clone(),
            connect_timeout: Duration::from_millis(config.probe_timeout_ms),
            banner_timeout: Duration::from_millis(config.banner_timeout_ms),
        }
    }
}

#[async_trait]
impl HostProber for TcpProber {
    async fn probe(&self, ip: Ipv4Addr) -> ProbeOutcome {
        let mut alive = false;
        let mut open_ports = Vec::new();

        for chunk in self.ports.chunks(PORT_BATCH) {
            let mut join = JoinSet::new();
            for &port in chunk {
                join.spawn(probe_port(
                    ip,
                    port,
                    self.connect_timeout,
                    self.banner_timeout,
                ));
            }
            while let Some(result) = join.join_next().await {
                match result {
                    Ok(PortProbe::Open { port, banner }) => {
                        alive = true;
                        open_ports.push(PortService { port, banner });
                    }
                    Ok(PortProbe::Refused) => alive = true,
                    Ok(PortProbe::Silent) | Err(_) => {}
                }
            }
        }

        if !alive {
            return ProbeOutcome::Unreachable;
        }

        open_ports.sort_by_key(|p| p.port);

        let mac = neigh::arp_mac(ip).await;
        let hostname = reverse_hostname(ip).await;
        let ipv6_addresses = match &mac {
            Some(mac) => neigh::ipv6_neighbors(mac).await,
            None => Vec::new(),
        };

        tracing::debug!(
            ip = %ip,
            open_ports = open_ports.len(),
            mac = mac.as_deref().unwrap_or("-"),
            "Host reachable"
        );

        ProbeOutcome::Reachable(ProbeReport {
            mac,
            hostname,
            open_ports,
            ipv6_addresses,
        })
    }
}

enum PortProbe {
    Open { port: u16, banner: Option<String> },
    Refused,
    Silent,
}

async fn probe_port(
    ip: Ipv4Addr,
    port: u16,
    connect_timeout: Duration,
    banner_timeout: Duration,
) -> PortProbe {
    let addr = SocketAddr::from((ip, port));
    match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(mut stream)) => {
            let banner = read_banner(&mut stream, banner_timeout).await;
            PortProbe::Open { port, banner }
        }
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => PortProbe::Refused,
        _ => PortProbe::Silent,
    }
}

/// Read whatever greeting the service volunteers after connect.
async fn read_banner(stream: &mut TcpStream, timeout: Duration) -> Option<String> {
    let mut buf = [0u8; BANNER_MAX];
    match tokio::time::timeout(timeout, stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => first_printable_line(&buf[..n]),
        _ => None,
    }
}

/// First line of a banner, stripped of control characters.
fn first_printable_line(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let line: String = text
        .lines()
        .next()?
        .chars()
        .filter(|c| !c.is_control())
        .collect();
    let line = line.trim().to_string();
    if line.is_empty() {
        None
    } else {
        Some(line)
    }
}

/// Best-effort reverse lookup through the system resolver.
#[cfg(unix)]
async fn reverse_hostname(ip: Ipv4Addr) -> Option<String> {
    let output = tokio::time::timeout(
        LOOKUP_TIMEOUT,
        tokio::process::Command::new("getent")
            .args(["hosts", &ip.to_string()])
            .output(),
    )
    .await
    .ok()?
    .ok()?;

    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .split_whitespace()
        .nth(1)
        .filter(|name| !name.is_empty())
        .map(|name| name.trim_end_matches('.').to_string())
}

#[cfg(not(unix))]
async fn reverse_hostname(_ip: Ipv4Addr) -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banner_keeps_first_line_only() {
        assert_eq!(
            first_printable_line(b"SSH-2.0-OpenSSH_9.6\r\nsome continuation"),
            Some("SSH-2.0-OpenSSH_9.6".to_string())
        );
        assert_eq!(
            first_printable_line(b"220 mail.lan ESMTP Postfix\r\n"),
            Some("220 mail.lan ESMTP Postfix".to_string())
        );
    }

    #[test]
    fn banner_rejects_empty_or_control_noise() {
        assert_eq!(first_printable_line(b"\r\n"), None);
        assert_eq!(first_printable_line(b"\x00\x01\x02"), None);
        assert_eq!(first_printable_line(b""), None);
    }

    #[tokio::test]
    async fn closed_loopback_port_counts_as_refused() {
        // Port 1 on loopback is essentially never listening; the RST
        // still proves the host is alive.
        let probe = probe_port(
            Ipv4Addr::LOCALHOST,
            1,
            Duration::from_millis(500),
            Duration::from_millis(100),
        )
        .await;
        assert!(matches!(probe, PortProbe::Refused | PortProbe::Open { .. }));
    }
}
