//! FakeDNS - fake address translation for domain-based routing
//!
//! DNS answers for proxied names carry synthetic addresses drawn from a
//! reserved pool. When a flow later arrives at one of those addresses the
//! queried name is recovered from the table, so the flow can be routed by
//! domain instead of by whatever the real resolver would have returned.
//!
//! ## Features
//!
//! - **Bidirectional mapping**: Domain -> address and address -> domain
//! - **Thread-safe**: `DashMap` for reads, one lock on the issuing path
//! - **Bounded**: a 16-bit counter drives allocation, addresses recycle on wraparound
//! - **IPv4 and IPv6 support**: Optional IPv6 pool configuration
//!
//! ## Example
//!
//! ```
//! use netstack_dispatch::fakedns::{FakeAddressTable, FakeDnsConfig, FakeLookup};
//! use std::net::IpAddr;
//!
//! let config = FakeDnsConfig::new()
//!     .with_ipv4_pool("198.18.0.0/16".parse().unwrap())
//!     .with_counter_seed(0);
//! let table = FakeAddressTable::new(&config);
//!
//! let entry = table.assign("example.com");
//! assert_eq!(
//!     table.lookup(IpAddr::V4(entry.ipv4)),
//!     FakeLookup::Resolved("example.com".into())
//! );
//! ```

pub mod config;
pub mod pool;
pub mod processor;
pub mod table;

pub use config::{FakeDnsConfig, RecyclePolicy};
pub use pool::{Ipv4Pool, Ipv6Pool};
pub use processor::{handle_message, Decision};
pub use table::{
    normalize_domain, FakeAddressTable, FakeEntry, FakeLookup, FakeTableStats,
    FakeTableStatsSnapshot,
};
