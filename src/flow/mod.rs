//! Flow abstractions
//!
//! Two sides meet here:
//!
//! - The packet engine hands over accepted flows as [`TcpFlow`] byte
//!   streams and [`PacketFlow`] datagram sockets. Addresses on this side
//!   are always literal socket addresses as seen on the virtual interface.
//! - The upstream handler consumes [`PacketConn`]s, whose addresses are
//!   [`TargetAddr`]s and may carry a domain instead of a fake IP.
//!
//! The wrappers in [`packet`] translate between the two.
//!
//! ```text
//! packet engine --PacketFlow--> FixedPacketConn / TranslatingPacketConn --PacketConn--> handler
//! ```

pub mod packet;

use std::fmt;
use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

pub use packet::{FixedPacketConn, TranslatingPacketConn};

/// Destination handed to the upstream handler
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetAddr {
    /// Literal socket address
    Ip(SocketAddr),
    /// Domain name and port
    Domain(String, u16),
}

impl TargetAddr {
    /// Create a domain target
    #[must_use]
    pub fn domain(name: impl Into<String>, port: u16) -> Self {
        Self::Domain(name.into(), port)
    }

    /// Get the port
    #[must_use]
    pub const fn port(&self) -> u16 {
        match self {
            Self::Ip(addr) => addr.port(),
            Self::Domain(_, port) => *port,
        }
    }
}

impl From<SocketAddr> for TargetAddr {
    fn from(addr: SocketAddr) -> Self {
        Self::Ip(addr)
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(addr) => write!(f, "{addr}"),
            Self::Domain(name, port) => write!(f, "{name}:{port}"),
        }
    }
}

/// An accepted TCP connection from the packet engine
///
/// Dropping the flow closes it.
pub trait TcpFlow: AsyncRead + AsyncWrite + Send + Unpin {
    /// Address of the local application that opened the connection
    fn peer_addr(&self) -> SocketAddr;
}

/// An accepted UDP flow from the packet engine
///
/// Reads yield datagrams sent by the local application together with the
/// address they were sent to; writes deliver datagrams to the application
/// as if they came from the given address.
///
/// End of stream is reported as an error of kind `UnexpectedEof`,
/// `BrokenPipe`, `ConnectionAborted` or `NotConnected`. Closing the flow
/// must unblock a pending `recv_to` with one of those.
#[async_trait]
pub trait PacketFlow: Send + Sync {
    /// Receive a datagram and the address it was destined to
    async fn recv_to(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Deliver a datagram to the application, appearing to come from `from`
    async fn send_from(&self, buf: &[u8], from: SocketAddr) -> io::Result<usize>;

    /// Address of the local application that owns the flow
    fn peer_addr(&self) -> SocketAddr;

    /// Close the flow
    async fn close(&self);
}

/// Handler-facing datagram connection
///
/// Same shape as [`PacketFlow`] but addressed with [`TargetAddr`], so a
/// handler can see `example.com:443` where the wire carried a fake IP.
#[async_trait]
pub trait PacketConn: Send + Sync {
    /// Receive a datagram and its destination
    async fn read_to(&self, buf: &mut [u8]) -> io::Result<(usize, TargetAddr)>;

    /// Deliver a datagram to the application, appearing to come from `from`
    async fn write_from(&self, buf: &[u8], from: &TargetAddr) -> io::Result<usize>;

    /// Local address as presented to the handler
    fn local_addr(&self) -> TargetAddr;

    /// Close the connection
    async fn close(&self);
}

/// Returns true for errors that mean the flow is gone
#[must_use]
pub fn is_closed_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}

/// A flow accepted by the packet engine
pub enum AcceptedFlow {
    /// TCP connection with its declared destination
    Tcp {
        conn: Box<dyn TcpFlow>,
        target: SocketAddr,
    },
    /// UDP flow with its declared destination, if bound to one
    Udp {
        conn: Box<dyn PacketFlow>,
        target: Option<SocketAddr>,
    },
}

impl fmt::Debug for AcceptedFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { conn, target } => f
                .debug_struct("Tcp")
                .field("peer", &conn.peer_addr())
                .field("target", target)
                .finish(),
            Self::Udp { conn, target } => f
                .debug_struct("Udp")
                .field("peer", &conn.peer_addr())
                .field("target", target)
                .finish(),
        }
    }
}

/// The packet-level TCP/IP stack behind the virtual interface
///
/// Starting the engine yields the channel accepted flows arrive on. The
/// channel closing means the engine has stopped.
pub trait PacketEngine: Send {
    /// Start processing the device and return the accepted-flow channel
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be started.
    fn start(&mut self) -> io::Result<mpsc::Receiver<AcceptedFlow>>;
}
