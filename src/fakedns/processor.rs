//! DNS message processor
//!
//! Turns a parsed query into a locally synthesised response, or decides
//! that it must go to the real resolver. Response construction is pure:
//! the only side effect is issuing a fake address from the table.

use std::time::Duration;

use hickory_proto::op::{Header, Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{DNSClass, RData, Record, RecordType};
use tracing::{debug, trace};

use super::table::{FakeAddressTable, FakeEntry};
use crate::matcher::{DomainMatcher, FakePolicy};

/// What to do with a query
#[derive(Debug)]
pub enum Decision {
    /// Answer locally with this response
    Respond(Message),
    /// Pass the raw query to the upstream resolver
    Forward,
}

/// Decide how to handle a DNS query
///
/// Only standard queries of class IN are answered locally, and only when
/// the matcher puts the first question name under [`FakePolicy::Proxy`] or
/// [`FakePolicy::Blocked`]. Everything else is forwarded.
pub fn handle_message(
    req: &Message,
    matcher: &dyn DomainMatcher,
    table: &FakeAddressTable,
    ttl: Duration,
) -> Decision {
    if req.message_type() != MessageType::Query || req.op_code() != OpCode::Query {
        return Decision::Forward;
    }
    let Some(question) = req.queries().first() else {
        return Decision::Forward;
    };
    if question.query_class() != DNSClass::IN {
        return Decision::Forward;
    }

    let name = question.name().to_ascii();
    let domain = name.trim_end_matches('.');

    match matcher.match_domain(domain) {
        Some(FakePolicy::Proxy) => {
            let entry = table.assign(domain);
            trace!(domain = %entry.domain, ipv4 = %entry.ipv4, qtype = %question.query_type(), "answering with fake address");
            Decision::Respond(fake_response(req, &entry, ttl))
        }
        Some(FakePolicy::Blocked) => {
            debug!(domain = %domain, "blocked domain queried");
            Decision::Respond(blocked_response(req))
        }
        Some(FakePolicy::Direct) | None => Decision::Forward,
    }
}

/// Build a response carrying the fake address of `entry`
///
/// A questions get the IPv4 address, AAAA questions get the IPv6 address
/// when the entry has one. Other question types get an empty NOERROR answer
/// so the real addresses of a proxied name never leak to the client.
#[must_use]
pub fn fake_response(req: &Message, entry: &FakeEntry, ttl: Duration) -> Message {
    let mut rsp = response_to(req, ResponseCode::NoError);
    let ttl = u32::try_from(ttl.as_secs()).unwrap_or(u32::MAX);

    if let Some(question) = req.queries().first() {
        let rdata = match question.query_type() {
            RecordType::A => Some(RData::A(A(entry.ipv4))),
            RecordType::AAAA => entry.ipv6.map(|ip| RData::AAAA(AAAA(ip))),
            _ => None,
        };
        if let Some(rdata) = rdata {
            let mut record = Record::from_rdata(question.name().clone(), ttl, rdata);
            record.set_dns_class(question.query_class());
            rsp.add_answer(record);
        }
    }

    rsp
}

/// Build an NXDOMAIN response for a blocked name
#[must_use]
pub fn blocked_response(req: &Message) -> Message {
    response_to(req, ResponseCode::NXDomain)
}

/// Response skeleton: header from the request, questions echoed
fn response_to(req: &Message, code: ResponseCode) -> Message {
    let mut rsp = Message::new();
    let mut header = Header::response_from_request(req.header());
    header.set_recursion_available(true);
    header.set_authoritative(false);
    rsp.set_header(header);
    rsp.set_response_code(code);
    for query in req.queries() {
        rsp.add_query(query.clone());
    }
    rsp
}
