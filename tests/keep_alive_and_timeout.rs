//! Covers spec.md §8 scenario 5: keep-alive pings on idle, and inactivity
//! timeout firing `on_disconnect(R_TIMEOUT)` when no reply ever comes.

mod common;

use std::{
    sync::{
        Arc,
        Mutex,
    },
    time::{
        Duration,
        Instant,
    },
};

use link_protocol::{
    server::Server,
    DisconnectReason,
    TransportConfig,
};
use tokio::time::timeout;

use common::{
    FakePeer,
    PING,
};

#[tokio::test]
async fn keep_alive_pings_then_times_out() {
    let _ = env_logger::try_init();

    let config = TransportConfig {
        keep_alive_ping_time: 1.0,
        connection_timeout: 3.0,
        ..Default::default()
    };

    let server = Server::bind(common::next_addr(), config).expect("server bind");
    let disconnected_at = Arc::new(Mutex::new(None));
    {
        let disconnected_at = disconnected_at.clone();
        server.on_disconnect(move |_id, reason| {
            *disconnected_at.lock().unwrap() = Some((Instant::now(), reason));
        });
    }

    let peer = FakePeer::bind().await;
    let start = Instant::now();
    peer.handshake(server.local_addr()).await;

    let ping = timeout(Duration::from_millis(1500), peer.recv())
        .await
        .expect("ping arrived");
    assert_eq!(ping, vec![PING]);
    let ping_elapsed = start.elapsed();
    assert!(ping_elapsed >= Duration::from_millis(900) && ping_elapsed <= Duration::from_millis(1800));

    // Never send PING_ACK or anything else back; wait past connection_timeout.
    tokio::time::sleep(Duration::from_millis(2700)).await;

    let (fired_at, reason) = disconnected_at.lock().unwrap().expect("disconnected on timeout");
    assert_eq!(reason, DisconnectReason::Timeout);
    let total = fired_at.duration_since(start);
    assert!(total >= Duration::from_millis(2700) && total <= Duration::from_millis(4000));
}
