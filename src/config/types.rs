//! Configuration types for netstack-dispatch
//!
//! This module defines all configuration structures used by the stack.
//! Configuration is loaded from JSON files and can be validated at startup.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::fakedns::FakeDnsConfig;
use crate::matcher::{DomainRules, DomainRulesConfig};

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Fake address pools
    #[serde(default)]
    pub fakedns: FakeDnsConfig,

    /// DNS hijacking and upstream forwarding
    #[serde(default)]
    pub dns: DnsConfig,

    /// Domain policy lists
    #[serde(default)]
    pub domains: DomainRulesConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fakedns.validate()?;
        self.dns.validate()?;
        self.log.validate()?;

        // Building the rule set rejects empty entries
        DomainRules::from_config(&self.domains)?;

        Ok(())
    }

    /// Create a minimal default configuration
    #[must_use]
    pub fn default_config() -> Self {
        Self::default()
    }
}

/// DNS hijacking configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DnsConfig {
    /// Intercept UDP flows to port 53 of non-fake addresses
    #[serde(default = "default_true")]
    pub hijack: bool,

    /// Upstream resolver for forwarded queries
    #[serde(default = "default_upstream")]
    pub upstream: SocketAddr,

    /// Upstream query timeout in seconds
    #[serde(default = "default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,

    /// Idle timeout for a hijacked flow in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// TTL of fake answers in seconds
    #[serde(default = "default_answer_ttl_secs")]
    pub answer_ttl_secs: u64,
}

impl DnsConfig {
    /// Validate DNS configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "dns.upstream_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "dns.idle_timeout_secs must be greater than 0".into(),
            ));
        }

        if u32::try_from(self.answer_ttl_secs).is_err() {
            return Err(ConfigError::ValidationError(format!(
                "dns.answer_ttl_secs {} does not fit a DNS TTL",
                self.answer_ttl_secs
            )));
        }

        Ok(())
    }

    /// Get upstream timeout as Duration
    #[must_use]
    pub const fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    /// Get idle timeout as Duration
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Get answer TTL as Duration
    #[must_use]
    pub const fn answer_ttl(&self) -> Duration {
        Duration::from_secs(self.answer_ttl_secs)
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            hijack: true,
            upstream: default_upstream(),
            upstream_timeout_secs: default_upstream_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            answer_ttl_secs: default_answer_ttl_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl LogConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(
            self.level.to_ascii_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level: {}",
                self.level
            )));
        }

        if !matches!(self.format.as_str(), "text" | "json") {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log format: {} (expected text or json)",
                self.format
            )));
        }

        Ok(())
    }

    /// Whether JSON output is selected
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format == "json"
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: true,
        }
    }
}

const fn default_true() -> bool {
    true
}

fn default_upstream() -> SocketAddr {
    SocketAddr::from(([8, 8, 8, 8], 53))
}

const fn default_upstream_timeout_secs() -> u64 {
    5
}

const fn default_idle_timeout_secs() -> u64 {
    3
}

const fn default_answer_ttl_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}
