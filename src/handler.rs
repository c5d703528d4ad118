//! Upstream connection handler seam
//!
//! The dispatcher decides *where* a flow is going; the handler decides what
//! to do about it (dial directly, hand it to a proxy, drop it). Errors are
//! only logged by the dispatcher.

use async_trait::async_trait;

use crate::flow::{PacketConn, TargetAddr, TcpFlow};

/// Consumer of dispatched flows
#[async_trait]
pub trait Handler: Send + Sync {
    /// Take ownership of a TCP connection bound for `target`
    async fn handle(&self, conn: Box<dyn TcpFlow>, target: TargetAddr) -> anyhow::Result<()>;

    /// Take ownership of a datagram connection
    async fn handle_packet(&self, conn: Box<dyn PacketConn>) -> anyhow::Result<()>;
}
