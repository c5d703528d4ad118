//! DNS hijacking
//!
//! A UDP flow to port 53 of a real address is served here instead of being
//! handed to the upstream handler. Each datagram is parsed and either
//! answered locally (fake address, NXDOMAIN) or relayed to the real
//! resolver. The flow is served until it goes idle, ends, or fails.
//!
//! ```text
//! Listening -> Reading -> Processing -> Responding  -> Listening
//!                  |                 \-> Forwarding -> Listening
//!                  \-> Closed (idle, eof, read error; write error from either reply path)
//! ```

use std::sync::Arc;
use std::time::Duration;

use hickory_proto::error::ProtoError;
use hickory_proto::op::Message;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, trace, warn};

use crate::error::ResolverError;
use crate::fakedns::{handle_message, Decision, FakeAddressTable};
use crate::flow::{is_closed_error, PacketFlow};
use crate::matcher::DomainMatcher;
use crate::resolver::Resolver;

/// Largest datagram a flow can deliver
const MAX_PACKET_SIZE: usize = 65535;

/// Default time a hijacked flow may stay silent
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default TTL of fake answers
pub const DEFAULT_ANSWER_TTL: Duration = Duration::from_secs(60);

/// Why a hijacked flow stopped being served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// No datagram arrived within the idle timeout
    Idle,
    /// The flow was closed by the other side
    Eof,
    /// Reading from the flow failed
    ReadError,
    /// Writing a reply to the flow failed
    WriteError,
}

/// Per-datagram failures; the session carries on after any of these
#[derive(Debug, Error)]
pub enum HijackError {
    /// The datagram is not a DNS message
    #[error("failed to parse DNS message: {0}")]
    Parse(#[source] ProtoError),

    /// The message carries no question
    #[error("DNS message has no question")]
    NoQuestion,

    /// The local response could not be serialised
    #[error("failed to encode DNS response: {0}")]
    Encode(#[source] ProtoError),

    /// The upstream resolver failed with something other than a timeout
    #[error(transparent)]
    Resolver(#[from] ResolverError),
}

/// Serves hijacked DNS flows
pub struct DnsInterceptor {
    table: Arc<FakeAddressTable>,
    matcher: Arc<dyn DomainMatcher>,
    resolver: Arc<dyn Resolver>,
    idle_timeout: Duration,
    answer_ttl: Duration,
}

impl DnsInterceptor {
    /// Create an interceptor with default timeouts
    #[must_use]
    pub fn new(
        table: Arc<FakeAddressTable>,
        matcher: Arc<dyn DomainMatcher>,
        resolver: Arc<dyn Resolver>,
    ) -> Self {
        Self {
            table,
            matcher,
            resolver,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            answer_ttl: DEFAULT_ANSWER_TTL,
        }
    }

    /// Set the idle timeout
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Set the TTL of fake answers
    #[must_use]
    pub fn with_answer_ttl(mut self, answer_ttl: Duration) -> Self {
        self.answer_ttl = answer_ttl;
        self
    }

    /// Serve `flow` until it ends, then close it
    pub async fn serve(&self, flow: Box<dyn PacketFlow>) -> SessionEnd {
        let peer = flow.peer_addr();
        let end = self.run(flow.as_ref()).await;
        flow.close().await;
        debug!(peer = %peer, reason = ?end, "DNS session closed");
        end
    }

    async fn run(&self, flow: &dyn PacketFlow) -> SessionEnd {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];

        loop {
            let (n, dst) = match timeout(self.idle_timeout, flow.recv_to(&mut buf)).await {
                Ok(Ok(r)) => r,
                Ok(Err(e)) if is_closed_error(&e) => return SessionEnd::Eof,
                Ok(Err(e)) => {
                    error!(peer = %flow.peer_addr(), error = %e, "DNS flow read error");
                    return SessionEnd::ReadError;
                }
                Err(_) => return SessionEnd::Idle,
            };

            trace!(dst = %dst, len = n, "DNS datagram received");

            let reply = match self.process(&buf[..n]).await {
                Ok(Some(reply)) => reply,
                Ok(None) => continue,
                Err(e) => {
                    warn!(peer = %flow.peer_addr(), dst = %dst, error = %e, "DNS datagram skipped");
                    continue;
                }
            };

            if let Err(e) = flow.send_from(&reply, dst).await {
                error!(peer = %flow.peer_addr(), error = %e, "DNS flow write error");
                return SessionEnd::WriteError;
            }
        }
    }

    /// Produce the reply for one datagram, or `None` to send nothing
    async fn process(&self, packet: &[u8]) -> Result<Option<Vec<u8>>, HijackError> {
        let req = Message::from_vec(packet).map_err(HijackError::Parse)?;
        if req.queries().is_empty() {
            return Err(HijackError::NoQuestion);
        }

        match handle_message(&req, self.matcher.as_ref(), &self.table, self.answer_ttl) {
            Decision::Respond(rsp) => rsp.to_vec().map(Some).map_err(HijackError::Encode),
            Decision::Forward => match self.resolver.resolve(packet).await {
                Ok(rsp) => Ok(Some(rsp)),
                // The client retries on its own schedule
                Err(e) if e.is_timeout() => {
                    debug!(id = req.id(), error = %e, "upstream timed out, dropping query");
                    Ok(None)
                }
                Err(e) => Err(e.into()),
            },
        }
    }
}
