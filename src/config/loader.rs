//! Configuration loading and management
//!
//! This module handles loading configuration from files and environment variables.

use std::path::Path;

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Environment variable overriding `log.level`
const ENV_LOG_LEVEL: &str = "NETSTACK_LOG_LEVEL";
/// Environment variable overriding `dns.hijack`
const ENV_HIJACK_DNS: &str = "NETSTACK_HIJACK_DNS";
/// Environment variable overriding `dns.upstream`
const ENV_DNS_UPSTREAM: &str = "NETSTACK_DNS_UPSTREAM";

/// Load configuration from a JSON file
///
/// # Arguments
///
/// * `path` - Path to the configuration file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!(path = %path.display(), "loading configuration");

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| {
        ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}"))
    })?;

    config.validate()?;

    info!(
        pool = %config.fakedns.ipv4_pool,
        hijack = config.dns.hijack,
        proxy = config.domains.proxy.len(),
        direct = config.domains.direct.len(),
        blocked = config.domains.blocked.len(),
        "configuration loaded"
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// Environment variables:
/// - `NETSTACK_LOG_LEVEL`: Override log level
/// - `NETSTACK_HIJACK_DNS`: Enable or disable DNS hijacking (`true`/`false`/`1`/`0`)
/// - `NETSTACK_DNS_UPSTREAM`: Override the upstream resolver address
///
/// # Errors
///
/// Returns `ConfigError` if loading or parsing fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    Ok(config)
}

/// Apply overrides looked up through `var`, then re-validate
fn apply_env_overrides(
    config: &mut Config,
    var: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(level) = var(ENV_LOG_LEVEL) {
        config.log.level = level;
        debug!(level = %config.log.level, "log level overridden");
    }

    if let Some(hijack) = var(ENV_HIJACK_DNS) {
        config.dns.hijack = parse_bool(&hijack).ok_or_else(|| ConfigError::EnvError {
            name: ENV_HIJACK_DNS.into(),
            reason: format!("Invalid boolean: {hijack}"),
        })?;
        debug!(hijack = config.dns.hijack, "DNS hijacking overridden");
    }

    if let Some(addr) = var(ENV_DNS_UPSTREAM) {
        config.dns.upstream = addr.parse().map_err(|_| ConfigError::EnvError {
            name: ENV_DNS_UPSTREAM.into(),
            reason: format!("Invalid socket address: {addr}"),
        })?;
        debug!(upstream = %config.dns.upstream, "DNS upstream overridden");
    }

    // Re-validate after overrides
    config.validate()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Create a default configuration file at the given path
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {e}")))?;

    std::fs::write(path, json)?;
    Ok(())
}
