//! Configuration module for netstack-dispatch
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use netstack_dispatch::config::load_config;
//!
//! let config = load_config("/etc/netstack/config.json").unwrap();
//! println!("Fake pool: {}", config.fakedns.ipv4_pool);
//! ```

mod loader;
mod types;

pub use loader::{create_default_config, load_config, load_config_str, load_config_with_env};
pub use types::{Config, DnsConfig, LogConfig};
