//! Address-translating datagram connections
//!
//! - [`FixedPacketConn`] serves a flow bound to a single fake destination:
//!   every datagram is reported as going to the real target, and every
//!   reply is sent back from the fake address the application used.
//! - [`TranslatingPacketConn`] serves an unbound flow: each datagram's
//!   destination is classified on the fly.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use super::{PacketConn, PacketFlow, TargetAddr};
use crate::fakedns::{FakeAddressTable, FakeLookup};
use crate::resolver::HostResolver;

/// Datagram connection pinned to one fake destination
pub struct FixedPacketConn {
    flow: Box<dyn PacketFlow>,
    fake: SocketAddr,
    real: TargetAddr,
}

impl FixedPacketConn {
    /// Wrap `flow`, presenting `fake` to the application as `real`
    #[must_use]
    pub fn new(flow: Box<dyn PacketFlow>, fake: SocketAddr, real: TargetAddr) -> Self {
        Self { flow, fake, real }
    }
}

#[async_trait]
impl PacketConn for FixedPacketConn {
    async fn read_to(&self, buf: &mut [u8]) -> io::Result<(usize, TargetAddr)> {
        let (n, _) = self.flow.recv_to(buf).await?;
        Ok((n, self.real.clone()))
    }

    async fn write_from(&self, buf: &[u8], _from: &TargetAddr) -> io::Result<usize> {
        self.flow.send_from(buf, self.fake).await
    }

    fn local_addr(&self) -> TargetAddr {
        self.real.clone()
    }

    async fn close(&self) {
        self.flow.close().await;
    }
}

/// Datagram connection translating each destination through the table
pub struct TranslatingPacketConn {
    flow: Box<dyn PacketFlow>,
    table: Arc<FakeAddressTable>,
    host_resolver: Arc<dyn HostResolver>,
}

impl TranslatingPacketConn {
    /// Wrap `flow`
    #[must_use]
    pub fn new(
        flow: Box<dyn PacketFlow>,
        table: Arc<FakeAddressTable>,
        host_resolver: Arc<dyn HostResolver>,
    ) -> Self {
        Self {
            flow,
            table,
            host_resolver,
        }
    }
}

#[async_trait]
impl PacketConn for TranslatingPacketConn {
    /// Read the next datagram with a routable destination
    ///
    /// Datagrams addressed to a fake address nothing is mapped to are
    /// dropped. Only an error from the underlying flow ends the loop.
    async fn read_to(&self, buf: &mut [u8]) -> io::Result<(usize, TargetAddr)> {
        loop {
            let (n, dst) = self.flow.recv_to(buf).await?;
            match self.table.lookup(dst.ip()) {
                FakeLookup::Resolved(domain) => return Ok((n, TargetAddr::Domain(domain, dst.port()))),
                FakeLookup::NotFake => return Ok((n, TargetAddr::Ip(dst))),
                FakeLookup::NotFound => {
                    trace!(dst = %dst, len = n, "dropping datagram to unmapped fake address");
                }
            }
        }
    }

    async fn write_from(&self, buf: &[u8], from: &TargetAddr) -> io::Result<usize> {
        let from = match from {
            TargetAddr::Ip(addr) => *addr,
            TargetAddr::Domain(domain, port) => self
                .host_resolver
                .resolve_host(domain, *port)
                .await
                .map_err(|e| {
                    io::Error::new(e.kind(), format!("failed to resolve {domain}:{port}: {e}"))
                })?,
        };
        self.flow.send_from(buf, from).await
    }

    fn local_addr(&self) -> TargetAddr {
        TargetAddr::Ip(self.flow.peer_addr())
    }

    async fn close(&self) {
        self.flow.close().await;
    }
}
