//! End-to-end facade behaviour over the fake back-end.
//!
//! Everything runs on tokio's paused clock, so deadlines are exact.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use netbridge::prelude::*;
use netbridge::testing::{ConnectOutcome, DelayedResolver, FakeBackend};
use tokio::time::Instant;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[tokio::test(start_paused = true)]
async fn test_mqtt_session_over_hostname() {
    let backend = FakeBackend::new();
    let link = backend.link();
    let resolver =
        DelayedResolver::new(ms(200)).answer(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 33)));
    let mut net = Network::builder(backend).resolver(resolver).build();

    let start = Instant::now();
    net.connect(&ConnectParams::new("device.example.test", 8883).timeout_ms(5000))
        .await
        .unwrap();
    assert!(start.elapsed() < ms(5000));
    assert!(net.is_open());
    assert_eq!(
        net.manager().backend().connected_addrs()[0].to_string(),
        "192.0.2.33:8883"
    );

    // CONNECT out, CONNACK in
    let connect = b"\x10\x0c\x00\x04MQTT\x04\x02\x00\x3c\x00\x00";
    assert_eq!(net.write(connect, 2000).await, Ok(connect.len()));
    assert_eq!(link.take_outbound(), connect);

    let feeder = link.clone();
    tokio::spawn(async move {
        tokio::time::sleep(ms(120)).await;
        feeder.push_inbound(b"\x20\x02\x00\x00");
    });
    let mut header = [0u8; 2];
    assert_eq!(net.read(&mut header, 2000).await, Ok(2));
    assert_eq!(header, [0x20, 0x02]);
    let mut rest = [0u8; 2];
    assert_eq!(net.read(&mut rest, 2000).await, Ok(2));

    // Broker goes away: read surfaces the reset, then is_lost
    link.drop_peer();
    assert_eq!(net.read(&mut header, 2000).await, Err(NetError::ConnReset));
    assert!(net.is_lost());
    assert_eq!(net.phase(), ConnectionPhase::Lost);

    // Reconnect reuses the cached resolution and replaces the handle
    net.connect(&ConnectParams::new("device.example.test", 8883).timeout_ms(5000))
        .await
        .unwrap();
    assert!(net.is_open());
    assert_eq!(link.live_handles(), 1);
    assert_eq!(link.opened(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_is_exact() {
    let backend = FakeBackend::refusing().latency(ms(250));
    let mut net = Network::builder(backend)
        .connect_settings(ConnectSettings {
            retry_count: 3,
            retry_delay_ms: 200,
            ..ConnectSettings::default()
        })
        .build();

    let start = Instant::now();
    let result = net
        .connect(&ConnectParams::new("203.0.113.5", 8883).timeout_ms(2000))
        .await;
    let elapsed = start.elapsed();

    assert_eq!(result, Err(NetError::ConnectFailed));
    assert_eq!(net.manager().backend().attempts(), 3);
    assert!(elapsed >= ms(3 * (250 + 200)));
    assert!(elapsed < ms(3 * (250 + 200) + 10));
}

#[tokio::test(start_paused = true)]
async fn test_dns_timeout_opens_nothing() {
    let backend = FakeBackend::new();
    let resolver = DelayedResolver::new(ms(10_000)).answer(IpAddr::V4(Ipv4Addr::LOCALHOST));
    let mut net = Network::builder(backend).resolver(resolver).build();

    let start = Instant::now();
    let result = net
        .connect(&ConnectParams::new("slow.example.test", 1883).timeout_ms(1000))
        .await;
    assert_eq!(result, Err(NetError::Timeout));
    assert!(start.elapsed() <= ms(1100));
    assert_eq!(net.manager().backend().attempts(), 0);
    assert_eq!(net.phase(), ConnectionPhase::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_flaky_link_recovers_within_retries() {
    let backend = FakeBackend::new().script([ConnectOutcome::Hang, ConnectOutcome::Refuse]);
    let mut net = Network::builder(backend)
        .connect_settings(ConnectSettings {
            retry_count: 3,
            ..ConnectSettings::default()
        })
        .build();

    net.connect(&ConnectParams::new("198.51.100.4", 1883).timeout_ms(800))
        .await
        .unwrap();
    assert_eq!(net.manager().backend().attempts(), 3);
    assert!(net.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_line_protocol_through_facade() {
    let backend = FakeBackend::new();
    let link = backend.link();
    let mut net = Network::new(backend);
    net.connect(&ConnectParams::new("198.51.100.4", 7).timeout_ms(800))
        .await
        .unwrap();

    link.push_inbound(b"PING\r\n");
    assert_eq!(net.read_line(64).await.unwrap(), "PING");

    assert_eq!(net.send(b"PONG\r\n").await, Ok(6));
    assert_eq!(link.take_outbound(), b"PONG\r\n");

    let mut buf = [0u8; 8];
    assert_eq!(net.recv(&mut buf), Err(NetError::WantRead));
    assert_eq!(net.recv_with_timeout(&mut buf, 300).await, Err(NetError::Timeout));

    net.disconnect();
    assert_eq!(net.send(b"x").await, Err(NetError::InvalidContext));
}
