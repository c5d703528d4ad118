//! Fake address table
//!
//! Bidirectional domain <-> fake address mapping shared by every flow task.
//!
//! - Domain -> entry (for synthesising DNS answers)
//! - Address -> entry (for resolving the target of a flow that arrives at a
//!   fake address)
//!
//! Reads go straight to the `DashMap`s. Issuing a new entry takes the
//! counter lock, which serialises allocation so that racing `assign` calls
//! for the same domain all converge on one entry.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::config::{FakeDnsConfig, RecyclePolicy};
use super::pool::{Ipv4Pool, Ipv6Pool};

/// A domain and the fake addresses issued for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeEntry {
    /// Normalised domain name (lowercase, no trailing dot)
    pub domain: String,
    /// Counter value the entry was issued at
    pub sequence: u16,
    /// Fake IPv4 address
    pub ipv4: Ipv4Addr,
    /// Fake IPv6 address, if an IPv6 pool is configured
    pub ipv6: Option<Ipv6Addr>,
    /// When the entry was issued
    pub issued_at: Instant,
}

impl FakeEntry {
    /// All addresses carried by this entry
    pub fn addresses(&self) -> impl Iterator<Item = IpAddr> {
        std::iter::once(IpAddr::V4(self.ipv4)).chain(self.ipv6.map(IpAddr::V6))
    }
}

/// Outcome of classifying an address against the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeLookup {
    /// The address is a live fake address issued for this domain
    Resolved(String),
    /// The address is outside every fake pool
    NotFake,
    /// The address is inside a fake pool but nothing is mapped to it
    NotFound,
}

impl FakeLookup {
    /// The resolved domain, if any
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        match self {
            Self::Resolved(domain) => Some(domain),
            _ => None,
        }
    }
}

/// Statistics for the fake address table
#[derive(Debug, Default)]
pub struct FakeTableStats {
    /// Entries issued
    pub assignments: AtomicU64,
    /// `assign` calls answered from an existing entry
    pub hits: AtomicU64,
    /// Address lookups
    pub lookups: AtomicU64,
    /// Addresses taken over from a different domain
    pub collisions: AtomicU64,
    /// Forward entries dropped because their address was recycled
    pub evictions: AtomicU64,
}

impl FakeTableStats {
    /// Get a snapshot of current stats
    #[must_use]
    pub fn snapshot(&self) -> FakeTableStatsSnapshot {
        FakeTableStatsSnapshot {
            assignments: self.assignments.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            lookups: self.lookups.load(Ordering::Relaxed),
            collisions: self.collisions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of table statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeTableStatsSnapshot {
    pub assignments: u64,
    pub hits: u64,
    pub lookups: u64,
    pub collisions: u64,
    pub evictions: u64,
}

/// Normalise a domain name for use as a table key
#[must_use]
pub fn normalize_domain(domain: &str) -> String {
    domain.trim_end_matches('.').to_ascii_lowercase()
}

/// Shared domain <-> fake address table
#[derive(Debug)]
pub struct FakeAddressTable {
    ipv4_pool: Ipv4Pool,
    ipv6_pool: Option<Ipv6Pool>,
    /// Allocation counter; also serialises the issuing path
    counter: Mutex<u16>,
    by_domain: DashMap<String, Arc<FakeEntry>>,
    by_addr: DashMap<IpAddr, Arc<FakeEntry>>,
    recycle: RecyclePolicy,
    stats: FakeTableStats,
}

impl FakeAddressTable {
    /// Create a table from configuration
    #[must_use]
    pub fn new(config: &FakeDnsConfig) -> Self {
        let seed = config.counter_seed.unwrap_or_else(clock_seed);
        Self {
            ipv4_pool: Ipv4Pool::new(config.ipv4_pool),
            ipv6_pool: config.ipv6_pool.map(Ipv6Pool::new),
            counter: Mutex::new(seed),
            by_domain: DashMap::new(),
            by_addr: DashMap::new(),
            recycle: config.recycle,
            stats: FakeTableStats::default(),
        }
    }

    /// Classify an address
    ///
    /// IPv4-mapped IPv6 addresses are classified as the IPv4 address they carry.
    #[must_use]
    pub fn lookup(&self, ip: IpAddr) -> FakeLookup {
        self.stats.lookups.fetch_add(1, Ordering::Relaxed);
        let ip = canonical(ip);
        if !self.contains(ip) {
            return FakeLookup::NotFake;
        }
        match self.by_addr.get(&ip) {
            Some(entry) => FakeLookup::Resolved(entry.domain.clone()),
            None => FakeLookup::NotFound,
        }
    }

    /// Get the fake entry for a domain, issuing one if needed
    ///
    /// Repeated calls for the same domain return the same entry until the
    /// entry is displaced by counter wraparound.
    pub fn assign(&self, domain: &str) -> Arc<FakeEntry> {
        let domain = normalize_domain(domain);
        if let Some(entry) = self.get(&domain) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return entry;
        }

        let mut counter = self.counter.lock();
        // Another task may have issued it while we waited for the lock
        if let Some(entry) = self.get(&domain) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return entry;
        }

        *counter = counter.wrapping_add(1);
        let sequence = *counter;
        let entry = Arc::new(FakeEntry {
            domain: domain.clone(),
            sequence,
            ipv4: self.ipv4_pool.address_at(sequence),
            ipv6: self.ipv6_pool.as_ref().map(|pool| pool.address_at(sequence)),
            issued_at: Instant::now(),
        });

        for addr in entry.addresses() {
            if let Some(previous) = self.by_addr.insert(addr, Arc::clone(&entry)) {
                self.recycled(&previous, &entry, addr);
            }
        }
        self.by_domain.insert(domain, Arc::clone(&entry));
        self.stats.assignments.fetch_add(1, Ordering::Relaxed);
        drop(counter);

        trace!(domain = %entry.domain, ipv4 = %entry.ipv4, seq = sequence, "fake address issued");
        entry
    }

    /// Get the live entry for a domain without issuing one
    #[must_use]
    pub fn get(&self, domain: &str) -> Option<Arc<FakeEntry>> {
        self.by_domain.get(domain).map(|entry| Arc::clone(entry.value()))
    }

    /// Check if an address falls inside a fake pool
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        match canonical(ip) {
            IpAddr::V4(v4) => self.ipv4_pool.contains(v4),
            IpAddr::V6(v6) => self.ipv6_pool.as_ref().is_some_and(|p| p.contains(v6)),
        }
    }

    /// Whether fake AAAA answers can be produced
    #[must_use]
    pub fn ipv6_enabled(&self) -> bool {
        self.ipv6_pool.is_some()
    }

    /// Number of domains with a live entry
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_domain.len()
    }

    /// Check if the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_domain.is_empty()
    }

    /// Get statistics
    #[must_use]
    pub fn stats(&self) -> &FakeTableStats {
        &self.stats
    }

    /// Handle an address that was taken over by a new entry
    fn recycled(&self, previous: &FakeEntry, current: &FakeEntry, addr: IpAddr) {
        if previous.domain == current.domain {
            return;
        }
        self.stats.collisions.fetch_add(1, Ordering::Relaxed);
        debug!(
            addr = %addr,
            old = %previous.domain,
            new = %current.domain,
            old_seq = previous.sequence,
            "fake address recycled"
        );

        if self.recycle == RecyclePolicy::Evict {
            // Only the forward entry goes; addresses the displaced domain still
            // holds in the other family keep resolving to it
            let removed = self
                .by_domain
                .remove_if(&previous.domain, |_, entry| entry.sequence == previous.sequence);
            if removed.is_some() {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Unmap IPv4-mapped IPv6 addresses
fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        IpAddr::V4(_) => ip,
    }
}

/// Low 16 bits of the current Unix time
fn clock_seed() -> u16 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    (secs & 0xffff) as u16
}
