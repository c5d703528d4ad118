//! Fake address pools
//!
//! A pool maps a 16-bit allocation sequence onto an address inside a
//! reserved network. Pools with more than 65536 host addresses only ever
//! use the lowest 65536 of them; smaller pools wrap the sequence around
//! their size.

use std::net::{Ipv4Addr, Ipv6Addr};

use ipnet::{Ipv4Net, Ipv6Net};

/// Number of distinct sequences the allocation counter can produce
pub const SEQUENCE_SPACE: u32 = 1 << 16;

/// Number of usable slots for a network with `host_bits` free bits
fn slots_for(host_bits: u32) -> u32 {
    if host_bits >= 16 {
        SEQUENCE_SPACE
    } else {
        1 << host_bits
    }
}

/// IPv4 fake address pool
#[derive(Debug, Clone)]
pub struct Ipv4Pool {
    /// The network range for membership testing
    network: Ipv4Net,
    /// Number of addresses sequences are spread over
    slots: u32,
}

impl Ipv4Pool {
    /// Create a new IPv4 pool from a network range
    #[must_use]
    pub fn new(network: Ipv4Net) -> Self {
        let network = network.trunc();
        let host_bits = 32 - u32::from(network.prefix_len());
        Self {
            network,
            slots: slots_for(host_bits),
        }
    }

    /// Address issued for the given sequence
    #[must_use]
    pub fn address_at(&self, sequence: u16) -> Ipv4Addr {
        let base = u32::from(self.network.network());
        Ipv4Addr::from(base | (u32::from(sequence) % self.slots))
    }

    /// Check if an IPv4 address is within this pool's range
    #[must_use]
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.network.contains(&addr)
    }

    /// Number of distinct addresses this pool hands out
    #[must_use]
    pub fn slots(&self) -> u32 {
        self.slots
    }
}

/// IPv6 fake address pool
#[derive(Debug, Clone)]
pub struct Ipv6Pool {
    network: Ipv6Net,
    slots: u32,
}

impl Ipv6Pool {
    /// Create a new IPv6 pool from a network range
    #[must_use]
    pub fn new(network: Ipv6Net) -> Self {
        let network = network.trunc();
        let host_bits = 128 - u32::from(network.prefix_len());
        Self {
            network,
            slots: slots_for(host_bits),
        }
    }

    /// Address issued for the given sequence
    #[must_use]
    pub fn address_at(&self, sequence: u16) -> Ipv6Addr {
        let base = u128::from(self.network.network());
        Ipv6Addr::from(base | u128::from(u32::from(sequence) % self.slots))
    }

    /// Check if an IPv6 address is within this pool's range
    #[must_use]
    pub fn contains(&self, addr: Ipv6Addr) -> bool {
        self.network.contains(&addr)
    }

    /// Number of distinct addresses this pool hands out
    #[must_use]
    pub fn slots(&self) -> u32 {
        self.slots
    }
}
