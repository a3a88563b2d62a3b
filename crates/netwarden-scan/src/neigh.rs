//! System neighbor table lookups: ARP cache for MAC addresses, NDP
//! cache for IPv6 addresses sharing a MAC.
//!
//! Both are best-effort side lookups after a host has answered a TCP
//! probe; a miss leaves the corresponding device field untouched.

use std::net::{Ipv4Addr, Ipv6Addr};

const ZERO_MAC: &str = "00:00:00:00:00:00";

/// Look up the MAC address for `ip` in the kernel ARP cache.
#[cfg(target_os = "linux")]
pub async fn arp_mac(ip: Ipv4Addr) -> Option<String> {
    let table = tokio::fs::read_to_string("/proc/net/arp").await.ok()?;
    parse_arp_table(&table)
        .into_iter()
        .find(|(addr, _)| *addr == ip)
        .map(|(_, mac)| mac)
}

#[cfg(not(target_os = "linux"))]
pub async fn arp_mac(_ip: Ipv4Addr) -> Option<String> {
    None
}

/// IPv6 addresses the NDP cache associates with `mac`.
#[cfg(target_os = "linux")]
pub async fn ipv6_neighbors(mac: &str) -> Vec<Ipv6Addr> {
    let output = match tokio::process::Command::new("ip")
        .args(["-6", "neigh", "show"])
        .output()
        .await
    {
        Ok(out) if out.status.success() => out,
        _ => return Vec::new(),
    };
    parse_ndp_table(&String::from_utf8_lossy(&output.stdout), mac)
}

#[cfg(not(target_os = "linux"))]
pub async fn ipv6_neighbors(_mac: &str) -> Vec<Ipv6Addr> {
    Vec::new()
}

/// Parse `/proc/net/arp` into (ip, mac) pairs.
///
/// Columns: IP address, HW type, Flags, HW address, Mask, Device.
/// Incomplete entries (flags 0x0 or an all-zero MAC) are skipped.
pub fn parse_arp_table(table: &str) -> Vec<(Ipv4Addr, String)> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                return None;
            }
            let ip: Ipv4Addr = parts[0].parse().ok()?;
            let flags = parts[2];
            let mac = parts[3];
            if flags == "0x0" || mac == ZERO_MAC || mac.len() != 17 {
                return None;
            }
            Some((ip, mac.to_ascii_lowercase()))
        })
        .collect()
}

/// Parse `ip -6 neigh show` output, keeping addresses whose `lladdr`
/// matches `mac` and whose entry has not FAILED.
pub fn parse_ndp_table(output: &str, mac: &str) -> Vec<Ipv6Addr> {
    let mac = mac.to_ascii_lowercase();
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let addr: Ipv6Addr = parts.first()?.parse().ok()?;
            let lladdr = parts
                .iter()
                .position(|&p| p == "lladdr")
                .and_then(|i| parts.get(i + 1))?;
            if lladdr.to_ascii_lowercase() != mac {
                return None;
            }
            if parts.last().is_some_and(|&state| state == "FAILED") {
                return None;
            }
            Some(addr)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARP_SAMPLE: &str = "\
IP address       HW type     Flags       HW address            Mask     Device
192.168.1.1      0x1         0x2         a4:91:b1:5e:00:1c     *        eth0
192.168.1.50     0x1         0x0         00:00:00:00:00:00     *        eth0
192.168.1.77     0x1         0x2         DC:A6:32:01:9B:F2     *        eth0
";

    #[test]
    fn arp_parse_skips_incomplete_entries() {
        let entries = parse_arp_table(ARP_SAMPLE);
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0],
            ("192.168.1.1".parse().unwrap(), "a4:91:b1:5e:00:1c".into())
        );
        // MACs are normalized to lowercase.
        assert_eq!(entries[1].1, "dc:a6:32:01:9b:f2");
    }

    #[test]
    fn ndp_parse_matches_mac_and_skips_failed() {
        let output = "\
fe80::de6:32ff:fe01:9bf2 dev eth0 lladdr dc:a6:32:01:9b:f2 STALE
2001:db8::42 dev eth0 lladdr dc:a6:32:01:9b:f2 REACHABLE
fe80::1 dev eth0 lladdr a4:91:b1:5e:00:1c DELAY
2001:db8::99 dev eth0 lladdr dc:a6:32:01:9b:f2 FAILED
";
        let addrs = parse_ndp_table(output, "DC:A6:32:01:9B:F2");
        assert_eq!(addrs.len(), 2);
        assert!(addrs.contains(&"2001:db8::42".parse().unwrap()));
        assert!(!addrs.contains(&"2001:db8::99".parse().unwrap()));
    }
}
