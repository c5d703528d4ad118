//! Domain matching for fake addressing
//!
//! The DNS interceptor asks a [`DomainMatcher`] which policy applies to a
//! queried name. [`DomainRules`] is a small exact/suffix rule set that
//! covers the common configuration; anything smarter plugs in through the
//! trait.
//!
//! # Example
//!
//! ```
//! use netstack_dispatch::matcher::{DomainMatcher, DomainRules, FakePolicy};
//!
//! let rules = DomainRules::builder()
//!     .add_suffix("google.com", FakePolicy::Proxy)
//!     .add_exact("dl.google.com", FakePolicy::Direct)
//!     .build();
//!
//! assert_eq!(rules.match_domain("mail.google.com"), Some(FakePolicy::Proxy));
//! assert_eq!(rules.match_domain("dl.google.com"), Some(FakePolicy::Direct));
//! assert_eq!(rules.match_domain("example.org"), None);
//! ```

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How a matched domain is treated by the DNS interceptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FakePolicy {
    /// Answer with a fake address so the flow can be routed by name
    Proxy,
    /// Forward the query to the real resolver
    Direct,
    /// Answer NXDOMAIN
    Blocked,
}

impl fmt::Display for FakePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proxy => write!(f, "proxy"),
            Self::Direct => write!(f, "direct"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// Policy lookup for hostnames
pub trait DomainMatcher: Send + Sync {
    /// Policy for `domain` (no trailing dot), or `None` if no rule applies
    fn match_domain(&self, domain: &str) -> Option<FakePolicy>;
}

/// Exact and suffix domain rules
///
/// Exact rules win over suffix rules; among suffix rules the longest
/// (most specific) one wins.
#[derive(Debug, Default, Clone)]
pub struct DomainRules {
    exact: HashMap<String, FakePolicy>,
    suffix: HashMap<String, FakePolicy>,
}

impl DomainRules {
    /// Create a new builder
    #[must_use]
    pub fn builder() -> DomainRulesBuilder {
        DomainRulesBuilder::default()
    }

    /// Build rules from configuration lists
    ///
    /// Entries are suffix rules unless prefixed with `full:`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` on an empty entry.
    pub fn from_config(config: &DomainRulesConfig) -> Result<Self, ConfigError> {
        let mut builder = Self::builder();
        for (list, policy) in [
            (&config.proxy, FakePolicy::Proxy),
            (&config.direct, FakePolicy::Direct),
            (&config.blocked, FakePolicy::Blocked),
        ] {
            for entry in list {
                builder = builder.add_rule(entry, policy)?;
            }
        }
        Ok(builder.build())
    }

    /// Total number of rules
    #[must_use]
    pub fn len(&self) -> usize {
        self.exact.len() + self.suffix.len()
    }

    /// Check if there are no rules
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DomainMatcher for DomainRules {
    fn match_domain(&self, domain: &str) -> Option<FakePolicy> {
        if domain.is_empty() {
            return None;
        }
        let domain = domain.trim_end_matches('.').to_ascii_lowercase();

        if let Some(policy) = self.exact.get(&domain) {
            return Some(*policy);
        }

        // Walk label boundaries from the full name down to the TLD
        let mut candidate = domain.as_str();
        loop {
            if let Some(policy) = self.suffix.get(candidate) {
                return Some(*policy);
            }
            match candidate.split_once('.') {
                Some((_, rest)) => candidate = rest,
                None => return None,
            }
        }
    }
}

/// Builder for [`DomainRules`]
#[derive(Debug, Default)]
pub struct DomainRulesBuilder {
    rules: DomainRules,
}

impl DomainRulesBuilder {
    /// Match `domain` exactly
    #[must_use]
    pub fn add_exact(mut self, domain: &str, policy: FakePolicy) -> Self {
        self.rules.exact.insert(normalize(domain), policy);
        self
    }

    /// Match `domain` and every subdomain of it
    #[must_use]
    pub fn add_suffix(mut self, domain: &str, policy: FakePolicy) -> Self {
        let domain = normalize(domain);
        self.rules
            .suffix
            .insert(domain.trim_start_matches('.').to_string(), policy);
        self
    }

    /// Add a rule in configuration syntax (`full:` prefix for exact)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the domain is empty.
    pub fn add_rule(self, entry: &str, policy: FakePolicy) -> Result<Self, ConfigError> {
        let (exact, domain) = match entry.strip_prefix("full:") {
            Some(domain) => (true, domain),
            None => (false, entry),
        };
        if normalize(domain).trim_start_matches('.').is_empty() {
            return Err(ConfigError::validation(format!(
                "empty domain rule '{entry}' for policy {policy}"
            )));
        }
        Ok(if exact {
            self.add_exact(domain, policy)
        } else {
            self.add_suffix(domain, policy)
        })
    }

    /// Finish building
    #[must_use]
    pub fn build(self) -> DomainRules {
        self.rules
    }
}

fn normalize(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Domain lists from configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DomainRulesConfig {
    /// Domains answered with fake addresses
    #[serde(default)]
    pub proxy: Vec<String>,
    /// Domains forwarded to the real resolver
    #[serde(default)]
    pub direct: Vec<String>,
    /// Domains answered with NXDOMAIN
    #[serde(default)]
    pub blocked: Vec<String>,
}
