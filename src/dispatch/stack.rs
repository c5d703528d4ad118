//! Connection dispatcher
//!
//! Every flow accepted by the packet engine ends up in [`Stack`]. The
//! destination is classified against the fake address table:
//!
//! | Destination                 | TCP                        | UDP                              |
//! |-----------------------------|----------------------------|----------------------------------|
//! | fake, mapped                | handler gets `domain:port` | handler gets a fixed conn        |
//! | fake, unmapped              | closed                     | closed                           |
//! | real, port 53, hijack on    | -                          | served by the DNS interceptor    |
//! | real, local scope           | closed                     | closed                           |
//! | real                        | handler gets `ip:port`     | handler gets a translating conn  |
//!
//! UDP flows without a bound destination always get a translating conn.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::scope::is_filtered;
use crate::config::{Config, DnsConfig};
use crate::error::ConfigError;
use crate::fakedns::{FakeAddressTable, FakeDnsConfig, FakeLookup};
use crate::flow::{
    AcceptedFlow, FixedPacketConn, PacketConn, PacketEngine, PacketFlow, TargetAddr, TcpFlow,
    TranslatingPacketConn,
};
use crate::handler::Handler;
use crate::hijack::{DnsInterceptor, DEFAULT_ANSWER_TTL, DEFAULT_IDLE_TIMEOUT};
use crate::matcher::{DomainMatcher, DomainRules};
use crate::resolver::{HostResolver, Resolver, SystemHostResolver, UdpResolver};

/// Well-known DNS port
const DNS_PORT: u16 = 53;

/// Flow dispatcher
///
/// Cheap to clone; every clone shares the same table and handler.
#[derive(Clone)]
pub struct Stack {
    handler: Arc<dyn Handler>,
    table: Arc<FakeAddressTable>,
    host_resolver: Arc<dyn HostResolver>,
    /// `None` when DNS hijacking is disabled
    interceptor: Option<Arc<DnsInterceptor>>,
}

impl Stack {
    /// Create a new builder
    #[must_use]
    pub fn builder() -> StackBuilder {
        StackBuilder::default()
    }

    /// The shared fake address table
    #[must_use]
    pub fn table(&self) -> &Arc<FakeAddressTable> {
        &self.table
    }

    /// Whether UDP flows to port 53 are hijacked
    #[must_use]
    pub fn hijack_enabled(&self) -> bool {
        self.interceptor.is_some()
    }

    /// Start the packet engine and dispatch every flow it accepts
    ///
    /// Each flow is handled on its own task. The returned handle completes
    /// once the engine closes its flow channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails to start.
    pub fn start(&self, engine: &mut dyn PacketEngine) -> io::Result<JoinHandle<()>> {
        let mut flows = engine.start()?;
        let stack = self.clone();

        info!(
            hijack = stack.hijack_enabled(),
            ipv6 = stack.table.ipv6_enabled(),
            "netstack started"
        );

        Ok(tokio::spawn(async move {
            while let Some(flow) = flows.recv().await {
                stack.spawn_flow(flow);
            }
            info!("packet engine stopped, accept loop exiting");
        }))
    }

    /// Spawn a task to handle an accepted flow with proper instrumentation
    fn spawn_flow(&self, flow: AcceptedFlow) -> JoinHandle<()> {
        let stack = self.clone();
        match flow {
            AcceptedFlow::Tcp { conn, target } => {
                let span = info_span!("tcp_flow", peer = %conn.peer_addr(), dst = %target);
                tokio::spawn(
                    async move { stack.handle_connection(conn, target).await }.instrument(span),
                )
            }
            AcceptedFlow::Udp { conn, target } => {
                let span = info_span!("udp_flow", peer = %conn.peer_addr(), dst = ?target);
                tokio::spawn(async move { stack.handle_flow(conn, target).await }.instrument(span))
            }
        }
    }

    /// Dispatch a TCP connection addressed to `target`
    pub async fn handle_connection(&self, conn: Box<dyn TcpFlow>, target: SocketAddr) {
        let peer = conn.peer_addr();

        match self.table.lookup(target.ip()) {
            FakeLookup::Resolved(domain) => {
                let dest = TargetAddr::Domain(domain, target.port());
                info!(peer = %peer, fake = %target, dest = %dest, "TCP flow to fake address");
                self.forward_tcp(conn, dest).await;
            }
            FakeLookup::NotFound => {
                error!(peer = %peer, dst = %target, "TCP flow to unmapped fake address, closing");
                close_tcp(conn).await;
            }
            FakeLookup::NotFake if is_filtered(target.ip()) => {
                warn!(peer = %peer, dst = %target, "TCP flow to local scope filtered");
                close_tcp(conn).await;
            }
            FakeLookup::NotFake => {
                info!(peer = %peer, dest = %target, "TCP flow");
                self.forward_tcp(conn, TargetAddr::Ip(target)).await;
            }
        }
    }

    /// Dispatch a UDP flow, bound to `target` if the engine knows one
    pub async fn handle_flow(&self, conn: Box<dyn PacketFlow>, target: Option<SocketAddr>) {
        let peer = conn.peer_addr();

        let Some(target) = target else {
            info!(peer = %peer, "unbound UDP flow");
            self.forward_translating(conn).await;
            return;
        };

        match self.table.lookup(target.ip()) {
            FakeLookup::Resolved(domain) => {
                let dest = TargetAddr::Domain(domain, target.port());
                info!(peer = %peer, fake = %target, dest = %dest, "UDP flow to fake address");
                self.forward_packet(Box::new(FixedPacketConn::new(conn, target, dest)))
                    .await;
            }
            FakeLookup::NotFound => {
                error!(peer = %peer, dst = %target, "UDP flow to unmapped fake address, closing");
                conn.close().await;
            }
            FakeLookup::NotFake => {
                if target.port() == DNS_PORT {
                    if let Some(interceptor) = &self.interceptor {
                        info!(peer = %peer, dst = %target, "hijacking DNS flow");
                        interceptor.serve(conn).await;
                        return;
                    }
                }
                if is_filtered(target.ip()) {
                    warn!(peer = %peer, dst = %target, "UDP flow to local scope filtered");
                    conn.close().await;
                    return;
                }
                info!(peer = %peer, dest = %target, "UDP flow");
                self.forward_translating(conn).await;
            }
        }
    }

    async fn forward_tcp(&self, conn: Box<dyn TcpFlow>, dest: TargetAddr) {
        if let Err(e) = self.handler.handle(conn, dest.clone()).await {
            error!(dest = %dest, error = %e, "TCP handler failed");
        }
    }

    async fn forward_translating(&self, conn: Box<dyn PacketFlow>) {
        let conn = TranslatingPacketConn::new(
            conn,
            Arc::clone(&self.table),
            Arc::clone(&self.host_resolver),
        );
        self.forward_packet(Box::new(conn)).await;
    }

    async fn forward_packet(&self, conn: Box<dyn PacketConn>) {
        let local = conn.local_addr();
        if let Err(e) = self.handler.handle_packet(conn).await {
            error!(local = %local, error = %e, "UDP handler failed");
        }
    }
}

/// Shut a rejected TCP flow down; the flow is closed when dropped
async fn close_tcp(mut conn: Box<dyn TcpFlow>) {
    if let Err(e) = conn.shutdown().await {
        debug!(peer = %conn.peer_addr(), error = %e, "TCP shutdown failed");
    }
}

/// Builder for [`Stack`]
///
/// Only the handler is required. Anything not supplied falls back to the
/// configuration passed to [`StackBuilder::from_config`], or to built-in
/// defaults.
pub struct StackBuilder {
    handler: Option<Arc<dyn Handler>>,
    table: Option<Arc<FakeAddressTable>>,
    matcher: Option<Arc<dyn DomainMatcher>>,
    resolver: Option<Arc<dyn Resolver>>,
    host_resolver: Option<Arc<dyn HostResolver>>,
    fakedns: FakeDnsConfig,
    dns: DnsConfig,
    hijack_dns: bool,
    idle_timeout: Duration,
    answer_ttl: Duration,
}

impl Default for StackBuilder {
    fn default() -> Self {
        Self {
            handler: None,
            table: None,
            matcher: None,
            resolver: None,
            host_resolver: None,
            fakedns: FakeDnsConfig::default(),
            dns: DnsConfig::default(),
            hijack_dns: true,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            answer_ttl: DEFAULT_ANSWER_TTL,
        }
    }
}

impl StackBuilder {
    /// Create a builder seeded from configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let rules = DomainRules::from_config(&config.domains)?;
        debug!(rules = rules.len(), "domain rules loaded");

        Ok(Self {
            matcher: Some(Arc::new(rules)),
            fakedns: config.fakedns.clone(),
            dns: config.dns.clone(),
            hijack_dns: config.dns.hijack,
            idle_timeout: config.dns.idle_timeout(),
            answer_ttl: config.dns.answer_ttl(),
            ..Self::default()
        })
    }

    /// Set the upstream handler
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Share an existing fake address table
    #[must_use]
    pub fn table(mut self, table: Arc<FakeAddressTable>) -> Self {
        self.table = Some(table);
        self
    }

    /// Set the domain matcher
    #[must_use]
    pub fn matcher(mut self, matcher: Arc<dyn DomainMatcher>) -> Self {
        self.matcher = Some(matcher);
        self
    }

    /// Set the upstream DNS resolver
    #[must_use]
    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set the host resolver used by translating connections
    #[must_use]
    pub fn host_resolver(mut self, host_resolver: Arc<dyn HostResolver>) -> Self {
        self.host_resolver = Some(host_resolver);
        self
    }

    /// Enable or disable DNS hijacking
    #[must_use]
    pub fn hijack_dns(mut self, enabled: bool) -> Self {
        self.hijack_dns = enabled;
        self
    }

    /// Set the idle timeout of hijacked DNS flows
    #[must_use]
    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Set the TTL of fake answers
    #[must_use]
    pub fn answer_ttl(mut self, answer_ttl: Duration) -> Self {
        self.answer_ttl = answer_ttl;
        self
    }

    /// Build the stack
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if no handler was set.
    pub fn build(self) -> Result<Stack, ConfigError> {
        let handler = self
            .handler
            .ok_or_else(|| ConfigError::validation("a connection handler is required"))?;

        let table = self
            .table
            .unwrap_or_else(|| Arc::new(FakeAddressTable::new(&self.fakedns)));

        let interceptor = self.hijack_dns.then(|| {
            let matcher = self
                .matcher
                .unwrap_or_else(|| Arc::new(DomainRules::default()));
            let resolver = self
                .resolver
                .unwrap_or_else(|| Arc::new(UdpResolver::from_config(&self.dns)));
            Arc::new(
                DnsInterceptor::new(Arc::clone(&table), matcher, resolver)
                    .with_idle_timeout(self.idle_timeout)
                    .with_answer_ttl(self.answer_ttl),
            )
        });

        Ok(Stack {
            handler,
            table,
            host_resolver: self
                .host_resolver
                .unwrap_or_else(|| Arc::new(SystemHostResolver)),
            interceptor,
        })
    }
}
