//! End-to-end: a name resolved through the hijacked DNS flow is routed by
//! name when the application connects to the answer.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::rr::RecordType;

use netstack_dispatch::config::load_config_str;
use netstack_dispatch::{AcceptedFlow, FakeLookup, StackBuilder, TargetAddr};

use super::{
    dns_query, parse_a, MockEngine, MockPacketFlow, MockTcpFlow, RecordingHandler,
    StaticResolver, REAL_V4,
};

const CONFIG: &str = r#"{
    "fakedns": { "ipv4_pool": "10.255.0.0/16", "counter_seed": 0 },
    "dns": { "hijack": true, "answer_ttl_secs": 30 },
    "domains": { "proxy": ["example.com"], "blocked": ["ads.example"] },
    "log": { "level": "debug" }
}"#;

#[tokio::test]
async fn test_dns_answer_routes_tcp_by_name() {
    let config = load_config_str(CONFIG).unwrap();
    let (handler, mut events) = RecordingHandler::new();

    let stack = StackBuilder::from_config(&config)
        .unwrap()
        .handler(handler)
        .resolver(Arc::new(StaticResolver::default()))
        .build()
        .unwrap();

    let (mut engine, flows) = MockEngine::new();
    let accept_loop = stack.start(&mut engine).unwrap();

    // The application asks its resolver for example.com
    let resolver: SocketAddr = "8.8.8.8:53".parse().unwrap();
    let (dns_flow, mut dns_app) = MockPacketFlow::new();
    flows
        .send(AcceptedFlow::Udp {
            conn: Box::new(dns_flow),
            target: Some(resolver),
        })
        .await
        .unwrap();

    dns_app.send(&dns_query(0x2a, "example.com.", RecordType::A), resolver);
    let (reply, from) = dns_app.recv().await;
    assert_eq!(from, resolver);

    let (id, answer) = parse_a(&reply);
    assert_eq!(id, 0x2a);
    let fake = answer.unwrap();
    assert_eq!(fake, Ipv4Addr::new(10, 255, 0, 1));
    assert_eq!(
        stack.table().lookup(IpAddr::V4(fake)),
        FakeLookup::Resolved("example.com".into())
    );

    // Names outside the proxy list still resolve for real
    dns_app.send(&dns_query(0x2b, "rust-lang.org.", RecordType::A), resolver);
    let (reply, _) = dns_app.recv().await;
    assert_eq!(parse_a(&reply), (0x2b, Some(REAL_V4)));

    // Then it connects to the answer
    let (tcp, _tcp_app) = MockTcpFlow::pair();
    flows
        .send(AcceptedFlow::Tcp {
            conn: Box::new(tcp),
            target: SocketAddr::new(IpAddr::V4(fake), 443),
        })
        .await
        .unwrap();

    let (_, dest) = tokio::time::timeout(Duration::from_secs(5), events.tcp.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dest, TargetAddr::domain("example.com", 443));
    assert_eq!(dest.to_string(), "example.com:443");

    // Engine shutdown ends the accept loop
    drop(flows);
    tokio::time::timeout(Duration::from_secs(5), accept_loop)
        .await
        .unwrap()
        .unwrap();
    drop(dns_app);
}

#[tokio::test]
async fn test_engine_can_only_start_once() {
    let config = load_config_str(CONFIG).unwrap();
    let (handler, _events) = RecordingHandler::new();
    let stack = StackBuilder::from_config(&config)
        .unwrap()
        .handler(handler)
        .resolver(Arc::new(StaticResolver::default()))
        .build()
        .unwrap();

    let (mut engine, flows) = MockEngine::new();
    let _accept_loop = stack.start(&mut engine).unwrap();
    assert!(stack.start(&mut engine).is_err());
    drop(flows);
}
