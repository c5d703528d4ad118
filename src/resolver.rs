//! Upstream resolution
//!
//! Two seams live here:
//!
//! - [`Resolver`] exchanges raw DNS messages with a real resolver on behalf
//!   of the DNS interceptor. [`UdpResolver`] is the plain RFC 1035 version.
//! - [`HostResolver`] turns a domain target into a socket address when a
//!   handler writes a datagram "from" a domain.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::trace;

use crate::config::DnsConfig;
use crate::error::{ResolverError, ResolverResult};

/// Maximum UDP response buffer size
///
/// Large enough for EDNS0 responses.
const UDP_RECV_BUFFER_SIZE: usize = 4096;

/// Raw DNS exchange with a real resolver
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Send `query` upstream and return the raw response
    ///
    /// # Errors
    ///
    /// Returns [`ResolverError::Timeout`] when the upstream does not answer
    /// in time, and other variants for socket or upstream failures.
    async fn resolve(&self, query: &[u8]) -> ResolverResult<Vec<u8>>;
}

/// Stateless UDP forwarder
///
/// Each query creates a new UDP socket, sends the query, and waits for a
/// single response from the configured upstream.
#[derive(Debug, Clone)]
pub struct UdpResolver {
    upstream: SocketAddr,
    timeout: Duration,
}

impl UdpResolver {
    /// Create a forwarder for `upstream`
    #[must_use]
    pub const fn new(upstream: SocketAddr, timeout: Duration) -> Self {
        Self { upstream, timeout }
    }

    /// Create a forwarder from DNS configuration
    #[must_use]
    pub fn from_config(config: &DnsConfig) -> Self {
        Self::new(config.upstream, config.upstream_timeout())
    }

    /// Upstream server address
    #[must_use]
    pub const fn upstream(&self) -> SocketAddr {
        self.upstream
    }

    fn bind_addr(&self) -> SocketAddr {
        if self.upstream.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        }
    }
}

#[async_trait]
impl Resolver for UdpResolver {
    async fn resolve(&self, query: &[u8]) -> ResolverResult<Vec<u8>> {
        let socket = UdpSocket::bind(self.bind_addr())
            .await
            .map_err(|e| ResolverError::network("failed to bind UDP socket", e))?;

        socket.send_to(query, self.upstream).await.map_err(|e| {
            ResolverError::network(format!("failed to send UDP query to {}", self.upstream), e)
        })?;

        let mut buf = vec![0u8; UDP_RECV_BUFFER_SIZE];
        match timeout(self.timeout, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, src))) => {
                if src != self.upstream {
                    return Err(ResolverError::upstream(
                        self.upstream.to_string(),
                        format!("response from unexpected source: {src}"),
                    ));
                }
                trace!(upstream = %self.upstream, len, "upstream answered");
                buf.truncate(len);
                Ok(buf)
            }
            Ok(Err(e)) => Err(ResolverError::network(
                format!("failed to receive UDP response from {}", self.upstream),
                e,
            )),
            Err(_) => Err(ResolverError::timeout(self.upstream.to_string(), self.timeout)),
        }
    }
}

/// Domain name to socket address resolution
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Resolve `domain:port` to a single socket address
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the name cannot be resolved.
    async fn resolve_host(&self, domain: &str, port: u16) -> io::Result<SocketAddr>;
}

/// [`HostResolver`] backed by the system resolver
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHostResolver;

#[async_trait]
impl HostResolver for SystemHostResolver {
    async fn resolve_host(&self, domain: &str, port: u16) -> io::Result<SocketAddr> {
        tokio::net::lookup_host((domain, port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no addresses found for {domain}"),
                )
            })
    }
}
