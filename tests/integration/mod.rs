//! Integration tests for netstack-dispatch
//!
//! Everything runs in memory: flows are channel- or duplex-backed mocks,
//! the handler forwards what it receives back to the test, and upstream
//! resolvers are canned.
//!
//! # Test Organization
//!
//! - `dispatch`: TCP/UDP classification, scope filtering, wrapper selection
//! - `hijack`: DNS interceptor sessions
//! - `e2e`: DNS answer to routed TCP flow through a running stack

pub mod e2e;

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Header, Message, MessageType, OpCode, Query};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{Name, RData, Record, RecordType};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::{mpsc, Mutex};

use netstack_dispatch::error::ResolverResult;
use netstack_dispatch::fakedns::FakeDnsConfig;
use netstack_dispatch::{
    AcceptedFlow, FakeAddressTable, Handler, HostResolver, PacketConn, PacketEngine, PacketFlow,
    ResolverError, Resolver, TargetAddr, TcpFlow,
};

/// Address the canned upstream resolver answers with
pub const REAL_V4: Ipv4Addr = Ipv4Addr::new(93, 184, 216, 34);

/// Address of the local application owning the mock flows
pub fn app_addr() -> SocketAddr {
    "192.0.2.10:40000".parse().unwrap()
}

/// Table over 10.255.0.0/16 whose first entry is 10.255.0.1
pub fn test_table() -> Arc<FakeAddressTable> {
    let config = FakeDnsConfig::new()
        .with_ipv4_pool("10.255.0.0/16".parse().unwrap())
        .with_counter_seed(0);
    Arc::new(FakeAddressTable::new(&config))
}

// ============================================================================
// Packet flows
// ============================================================================

type Datagram = (Vec<u8>, SocketAddr);

/// Channel-backed UDP flow
pub struct MockPacketFlow {
    inbound: Mutex<mpsc::UnboundedReceiver<Datagram>>,
    outbound: mpsc::UnboundedSender<Datagram>,
    peer: SocketAddr,
    closed: Arc<AtomicBool>,
}

/// The application side of a [`MockPacketFlow`]
pub struct FlowHandle {
    /// Datagrams the application sends, with their destination
    pub tx: mpsc::UnboundedSender<Datagram>,
    /// Datagrams delivered to the application, with their apparent source
    pub rx: mpsc::UnboundedReceiver<Datagram>,
    closed: Arc<AtomicBool>,
}

impl MockPacketFlow {
    pub fn new() -> (Self, FlowHandle) {
        let (app_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, app_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let flow = Self {
            inbound: Mutex::new(inbound),
            outbound,
            peer: app_addr(),
            closed: Arc::clone(&closed),
        };
        let handle = FlowHandle {
            tx: app_tx,
            rx: app_rx,
            closed,
        };
        (flow, handle)
    }
}

impl FlowHandle {
    /// Send a datagram to `dst` as the application
    pub fn send(&self, data: &[u8], dst: SocketAddr) {
        self.tx.send((data.to_vec(), dst)).unwrap();
    }

    /// Receive the next datagram delivered to the application
    pub async fn recv(&mut self) -> Datagram {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("no datagram delivered")
            .expect("flow dropped")
    }

    /// Whether the flow has been closed by the stack
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PacketFlow for MockPacketFlow {
    async fn recv_to(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::NotConnected.into());
        }
        let (data, dst) = self
            .inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        buf[..data.len()].copy_from_slice(&data);
        Ok((data.len(), dst))
    }

    async fn send_from(&self, buf: &[u8], from: SocketAddr) -> io::Result<usize> {
        self.outbound
            .send((buf.to_vec(), from))
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// TCP flows
// ============================================================================

/// Duplex-backed TCP flow
pub struct MockTcpFlow {
    stream: DuplexStream,
    peer: SocketAddr,
}

impl MockTcpFlow {
    /// Create a flow and the application's end of it
    pub fn pair() -> (Self, DuplexStream) {
        let (stream, app) = tokio::io::duplex(4096);
        (
            Self {
                stream,
                peer: app_addr(),
            },
            app,
        )
    }
}

impl TcpFlow for MockTcpFlow {
    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl AsyncRead for MockTcpFlow {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for MockTcpFlow {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

// ============================================================================
// Handler
// ============================================================================

/// Handler passing everything it receives back to the test
pub struct RecordingHandler {
    tcp: mpsc::UnboundedSender<(Box<dyn TcpFlow>, TargetAddr)>,
    udp: mpsc::UnboundedSender<Box<dyn PacketConn>>,
    fail: bool,
}

/// What a [`RecordingHandler`] received
pub struct HandlerEvents {
    pub tcp: mpsc::UnboundedReceiver<(Box<dyn TcpFlow>, TargetAddr)>,
    pub udp: mpsc::UnboundedReceiver<Box<dyn PacketConn>>,
}

impl RecordingHandler {
    pub fn new() -> (Arc<Self>, HandlerEvents) {
        Self::build(false)
    }

    /// A handler that records, then reports failure
    pub fn failing() -> (Arc<Self>, HandlerEvents) {
        Self::build(true)
    }

    fn build(fail: bool) -> (Arc<Self>, HandlerEvents) {
        let (tcp, tcp_rx) = mpsc::unbounded_channel();
        let (udp, udp_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self { tcp, udp, fail }),
            HandlerEvents {
                tcp: tcp_rx,
                udp: udp_rx,
            },
        )
    }

    fn outcome(&self) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("upstream refused");
        }
        Ok(())
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    async fn handle(&self, conn: Box<dyn TcpFlow>, target: TargetAddr) -> anyhow::Result<()> {
        self.tcp.send((conn, target)).ok();
        self.outcome()
    }

    async fn handle_packet(&self, conn: Box<dyn PacketConn>) -> anyhow::Result<()> {
        self.udp.send(conn).ok();
        self.outcome()
    }
}

impl HandlerEvents {
    /// Assert that nothing reached the handler
    pub fn assert_idle(&mut self) {
        assert!(self.tcp.try_recv().is_err(), "unexpected TCP flow");
        assert!(self.udp.try_recv().is_err(), "unexpected UDP flow");
    }
}

// ============================================================================
// Resolvers and engine
// ============================================================================

/// Upstream answering every query with [`REAL_V4`]
#[derive(Default)]
pub struct StaticResolver {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, query: &[u8]) -> ResolverResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let req = Message::from_vec(query)
            .map_err(|e| ResolverError::upstream("static", e.to_string()))?;

        let mut rsp = Message::new();
        rsp.set_header(Header::response_from_request(req.header()));
        for query in req.queries() {
            rsp.add_query(query.clone());
            rsp.add_answer(Record::from_rdata(
                query.name().clone(),
                300,
                RData::A(A(REAL_V4)),
            ));
        }
        rsp.to_vec()
            .map_err(|e| ResolverError::upstream("static", e.to_string()))
    }
}

/// Upstream that always times out
pub struct SilentResolver;

#[async_trait]
impl Resolver for SilentResolver {
    async fn resolve(&self, _query: &[u8]) -> ResolverResult<Vec<u8>> {
        Err(ResolverError::timeout("192.0.2.53:53", Duration::from_secs(5)))
    }
}

/// Upstream that rejects every query
pub struct RefusingResolver;

#[async_trait]
impl Resolver for RefusingResolver {
    async fn resolve(&self, _query: &[u8]) -> ResolverResult<Vec<u8>> {
        Err(ResolverError::upstream("192.0.2.53:53", "refused"))
    }
}

/// Host resolver mapping every name to one address
pub struct StaticHostResolver(pub Ipv4Addr);

#[async_trait]
impl HostResolver for StaticHostResolver {
    async fn resolve_host(&self, _domain: &str, port: u16) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from((self.0, port)))
    }
}

/// Engine fed by the test through a channel
pub struct MockEngine {
    flows: Option<mpsc::Receiver<AcceptedFlow>>,
}

impl MockEngine {
    pub fn new() -> (Self, mpsc::Sender<AcceptedFlow>) {
        let (tx, rx) = mpsc::channel(16);
        (Self { flows: Some(rx) }, tx)
    }
}

impl PacketEngine for MockEngine {
    fn start(&mut self) -> io::Result<mpsc::Receiver<AcceptedFlow>> {
        self.flows
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "engine already started"))
    }
}

// ============================================================================
// DNS helpers
// ============================================================================

/// Encode a standard query
pub fn dns_query(id: u16, name: &str, qtype: RecordType) -> Vec<u8> {
    let mut req = Message::new();
    req.set_id(id);
    req.set_message_type(MessageType::Query);
    req.set_op_code(OpCode::Query);
    req.set_recursion_desired(true);
    req.add_query(Query::query(Name::from_str(name).unwrap(), qtype));
    req.to_vec().unwrap()
}

/// Decode a response and return its id and first A answer
pub fn parse_a(bytes: &[u8]) -> (u16, Option<Ipv4Addr>) {
    let rsp = Message::from_vec(bytes).unwrap();
    let a = rsp.answers().iter().find_map(|r| match r.data() {
        Some(RData::A(a)) => Some(a.0),
        _ => None,
    });
    (rsp.id(), a)
}
