//! netstack-dispatch: fake-address dispatch core for a user-space network stack
//!
//! This crate sits behind a virtual network interface. A packet engine
//! turns raw packets into TCP connections and UDP flows; this crate decides
//! where each of them is going and hands them to an upstream handler.
//!
//! # Features
//!
//! - **Fake DNS**: Proxied names resolve to addresses from a reserved pool
//! - **Routing by name**: Flows to a fake address reach the handler as `domain:port`
//! - **DNS hijacking**: UDP port 53 traffic is answered or relayed in-process
//! - **Scope filtering**: Private, link-local and multicast destinations are dropped
//!
//! # Architecture
//!
//! ```text
//! App → TUN → packet engine → Stack ─┬→ DnsInterceptor → FakeAddressTable / Resolver
//!                                    └→ Handler (TargetAddr::Domain | TargetAddr::Ip)
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use netstack_dispatch::config::load_config;
//! use netstack_dispatch::{Handler, PacketEngine, StackBuilder};
//!
//! # async fn example(
//! #     handler: Arc<dyn Handler>,
//! #     engine: &mut dyn PacketEngine,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("/etc/netstack/config.json")?;
//! netstack_dispatch::logging::init_logging(&config.log)?;
//!
//! let stack = StackBuilder::from_config(&config)?.handler(handler).build()?;
//! stack.start(engine)?.await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration types and loading
//! - [`dispatch`]: The flow dispatcher and scope filter
//! - [`error`]: Error types
//! - [`fakedns`]: Fake address table and DNS answer synthesis
//! - [`flow`]: Flow traits and address-translating wrappers
//! - [`handler`]: Upstream handler trait
//! - [`hijack`]: DNS interceptor
//! - [`logging`]: Log subscriber setup
//! - [`matcher`]: Domain policy matching
//! - [`resolver`]: Upstream DNS and host resolution

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod fakedns;
pub mod flow;
pub mod handler;
pub mod hijack;
pub mod logging;
pub mod matcher;
pub mod resolver;

// Re-export commonly used types at the crate root
pub use config::Config;
pub use dispatch::{Stack, StackBuilder};
pub use error::{ConfigError, ResolverError};
pub use fakedns::{FakeAddressTable, FakeEntry, FakeLookup};
pub use flow::{AcceptedFlow, PacketConn, PacketEngine, PacketFlow, TargetAddr, TcpFlow};
pub use handler::Handler;
pub use hijack::{DnsInterceptor, SessionEnd};
pub use matcher::{DomainMatcher, DomainRules, FakePolicy};
pub use resolver::{HostResolver, Resolver, SystemHostResolver, UdpResolver};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
