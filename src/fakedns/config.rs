//! Fake address table configuration
//!
//! This module provides configuration for the fake address pools and the
//! table that issues addresses from them.

use ipnet::{Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// What happens to a domain whose address gets recycled by another domain
///
/// The allocation counter is 16 bits wide, so after 65536 issuances an
/// address is handed out again. The reverse mapping always follows the
/// newest owner; this policy decides what happens to the old owner's
/// forward entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecyclePolicy {
    /// Drop the displaced domain's forward entry so its next query gets a
    /// fresh address
    #[default]
    Evict,
    /// Leave the displaced domain's forward entry alone
    Keep,
}

/// Configuration for the fake address table
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FakeDnsConfig {
    /// IPv4 address pool for fake addresses
    ///
    /// Default: 198.18.0.0/16 (RFC 2544 benchmarking range), which holds
    /// exactly one address per counter value
    #[serde(default = "default_ipv4_pool")]
    pub ipv4_pool: Ipv4Net,

    /// Optional IPv6 address pool for fake addresses
    ///
    /// Default: None (AAAA questions for proxied names get an empty answer)
    #[serde(default)]
    pub ipv6_pool: Option<Ipv6Net>,

    /// Policy for domains displaced by counter wraparound
    #[serde(default)]
    pub recycle: RecyclePolicy,

    /// Initial counter value
    ///
    /// Default: None (low 16 bits of the current Unix time)
    #[serde(default)]
    pub counter_seed: Option<u16>,
}

fn default_ipv4_pool() -> Ipv4Net {
    "198.18.0.0/16".parse().expect("valid IPv4 CIDR")
}

impl Default for FakeDnsConfig {
    fn default() -> Self {
        Self {
            ipv4_pool: default_ipv4_pool(),
            ipv6_pool: None,
            recycle: RecyclePolicy::default(),
            counter_seed: None,
        }
    }
}

impl FakeDnsConfig {
    /// Create a new FakeDnsConfig with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the IPv4 address pool
    #[must_use]
    pub fn with_ipv4_pool(mut self, pool: Ipv4Net) -> Self {
        self.ipv4_pool = pool;
        self
    }

    /// Set the IPv6 address pool (enables fake AAAA answers)
    #[must_use]
    pub fn with_ipv6_pool(mut self, pool: Ipv6Net) -> Self {
        self.ipv6_pool = Some(pool);
        self
    }

    /// Disable the IPv6 pool
    #[must_use]
    pub fn without_ipv6(mut self) -> Self {
        self.ipv6_pool = None;
        self
    }

    /// Set the recycle policy
    #[must_use]
    pub fn with_recycle(mut self, recycle: RecyclePolicy) -> Self {
        self.recycle = recycle;
        self
    }

    /// Pin the initial counter value
    #[must_use]
    pub fn with_counter_seed(mut self, seed: u16) -> Self {
        self.counter_seed = Some(seed);
        self
    }

    /// Check if IPv6 is enabled
    #[must_use]
    pub fn ipv6_enabled(&self) -> bool {
        self.ipv6_pool.is_some()
    }

    /// Validate the pools
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if a pool cannot hold at least
    /// two addresses.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ipv4_pool.prefix_len() > 31 {
            return Err(ConfigError::validation(format!(
                "fakedns.ipv4_pool {} is too small (prefix must be /31 or shorter)",
                self.ipv4_pool
            )));
        }
        if let Some(pool) = self.ipv6_pool {
            if pool.prefix_len() > 127 {
                return Err(ConfigError::validation(format!(
                    "fakedns.ipv6_pool {pool} is too small (prefix must be /127 or shorter)"
                )));
            }
        }
        Ok(())
    }
}
