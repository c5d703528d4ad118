//! Destination scope filter
//!
//! Traffic to local-scope destinations (private ranges, link-local,
//! multicast, broadcast) that reaches the virtual interface is a routing
//! leak and is closed instead of forwarded.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// SSDP multicast group
const SSDP_V4: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// Check if a destination must not be forwarded
///
/// IPv4-mapped IPv6 addresses are checked as IPv4.
#[must_use]
pub fn is_filtered(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_filtered_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_filtered_v4(v4),
            None => is_filtered_v6(v6),
        },
    }
}

fn is_filtered_v4(ip: Ipv4Addr) -> bool {
    ip.is_multicast()
        || ip.is_broadcast()
        || ip == SSDP_V4
        || ip.is_private()
        || ip.is_link_local()
}

fn is_filtered_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    // fe80::/10 link-local unicast, ff02::/16 link-local multicast
    (first & 0xffc0) == 0xfe80 || first == 0xff02
}
