//! End-to-end tests for the socat relay driver against a real
//! user+network namespace: a full port lifecycle with byte-identical
//! round trips, OS-level bind conflicts, and shutdown draining.
//!
//! Each test skips (with a note on stderr) when the host lacks the
//! required tools or unprivileged user namespaces.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::print_stderr)]

mod harness;

use std::time::Duration;

use porthole_common::config::ForwardConfig;
use porthole_common::error::PortholeError;
use porthole_common::types::{PortSpec, Proto};
use porthole_forward::{ParentDriver, RelayDriver};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

const REQUIRED_TOOLS: &[&str] = &["unshare", "nsenter", "socat", "nc", "ip"];

fn spec(proto: Proto, parent_port: u16, child_port: u16) -> PortSpec {
    PortSpec {
        proto,
        parent_ip: "127.0.0.1".parse().expect("loopback"),
        parent_port,
        child_port,
    }
}

async fn connect_with_retry(port: u16) -> Option<TcpStream> {
    for attempt in 1..=10u64 {
        if let Ok(conn) = TcpStream::connect(("127.0.0.1", port)).await {
            return Some(conn);
        }
        tokio::time::sleep(Duration::from_millis(25 * attempt)).await;
    }
    None
}

/// Add a mapping, push a payload through the parent endpoint, and verify
/// the in-namespace listener received it byte-identical.
async fn round_trip(proto: Proto, child_port: u16, parent_port: u16) {
    harness::init_logging();
    if !harness::have_tools(REQUIRED_TOOLS) {
        eprintln!("skipping: required tools missing ({REQUIRED_TOOLS:?})");
        return;
    }
    let Some(ns) = harness::spawn_namespace().await else {
        eprintln!("skipping: unprivileged user namespaces unavailable");
        return;
    };

    let driver = RelayDriver::socat(ForwardConfig::default());
    driver.set_child_pid(ns.pid()).expect("set child pid");

    let mut listener = harness::spawn_listener(ns.pid(), proto, child_port)
        .await
        .expect("in-namespace listener");

    let status = driver
        .add_port(spec(proto, parent_port, child_port))
        .await
        .expect("add_port");
    assert_eq!(driver.list_ports(), vec![status.clone()]);

    let payload = format!("test-{proto}-{}-{child_port}-{parent_port}", ns.pid()).into_bytes();
    match proto {
        Proto::Tcp => {
            let mut conn = connect_with_retry(parent_port)
                .await
                .expect("connect to parent endpoint");
            conn.write_all(&payload).await.expect("write payload");
            conn.shutdown().await.expect("close write side");
        }
        Proto::Udp => {
            // A UDP send cannot confirm the relay is up; give it a moment.
            tokio::time::sleep(Duration::from_secs(1)).await;
            let sock = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
            let _ = sock
                .send_to(&payload, ("127.0.0.1", parent_port))
                .await
                .expect("send datagram");
        }
    }

    let mut stdout = listener.stdout.take().expect("listener stdout");
    let mut received = vec![0u8; payload.len()];
    tokio::time::timeout(Duration::from_secs(10), stdout.read_exact(&mut received))
        .await
        .expect("listener produced output in time")
        .expect("read listener output");
    assert_eq!(received, payload);

    driver.remove_port(status.id).await.expect("remove_port");
    assert!(driver.list_ports().is_empty());

    let _ = listener.start_kill();
    ns.close().await;
}

#[tokio::test]
async fn tcp_round_trip_through_the_namespace_boundary() {
    round_trip(Proto::Tcp, 8080, 42880).await;
}

#[tokio::test]
async fn udp_datagram_arrives_intact() {
    round_trip(Proto::Udp, 80, 42080).await;
}

#[tokio::test]
async fn os_level_bind_conflict_is_surfaced_within_the_startup_window() {
    harness::init_logging();
    if !harness::have_tools(REQUIRED_TOOLS) {
        eprintln!("skipping: required tools missing ({REQUIRED_TOOLS:?})");
        return;
    }
    let Some(ns) = harness::spawn_namespace().await else {
        eprintln!("skipping: unprivileged user namespaces unavailable");
        return;
    };

    // Two independent drivers cannot see each other's port tables, so
    // the second add only fails at the OS bind.
    let first = RelayDriver::socat(ForwardConfig::default());
    first.set_child_pid(ns.pid()).expect("set child pid");
    let status = first
        .add_port(spec(Proto::Tcp, 42980, 8080))
        .await
        .expect("first bind");

    let second = RelayDriver::socat(ForwardConfig::default());
    second.set_child_pid(ns.pid()).expect("set child pid");
    let err = second
        .add_port(spec(Proto::Tcp, 42980, 8081))
        .await
        .expect_err("conflicting bind");
    assert!(
        matches!(err, PortholeError::PortInUse { parent_port: 42980, .. }),
        "unexpected error: {err}"
    );
    assert!(second.list_ports().is_empty());

    first.remove_port(status.id).await.expect("remove");
    ns.close().await;
}

#[tokio::test]
async fn shutdown_terminates_every_relay_process() {
    harness::init_logging();
    if !harness::have_tools(REQUIRED_TOOLS) {
        eprintln!("skipping: required tools missing ({REQUIRED_TOOLS:?})");
        return;
    }
    let Some(ns) = harness::spawn_namespace().await else {
        eprintln!("skipping: unprivileged user namespaces unavailable");
        return;
    };

    let driver = RelayDriver::socat(ForwardConfig::default());
    driver.set_child_pid(ns.pid()).expect("set child pid");
    for (parent_port, child_port) in [(42985, 8085), (42986, 8086)] {
        let _ = driver
            .add_port(spec(Proto::Tcp, parent_port, child_port))
            .await
            .expect("add_port");
    }

    let markers = ["TCP4-LISTEN:42985", "TCP4-LISTEN:42986"];
    for marker in markers {
        assert!(harness::relay_running(marker), "relay missing: {marker}");
    }

    driver.shutdown().await.expect("shutdown");

    // SIGTERM delivery is asynchronous; poll briefly.
    let mut all_gone = false;
    for _ in 0..40 {
        if markers.iter().all(|m| !harness::relay_running(m)) {
            all_gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(all_gone, "relay processes survived shutdown");
    assert!(driver.list_ports().is_empty());
    ns.close().await;
}
