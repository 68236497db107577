//! Covers spec.md §8 scenario 2: with no ACK ever arriving, a reliable send
//! is retransmitted exactly `max_retries` additional times (the reference
//! implementation counts the initial send plus the retries), then stops.

mod common;

use std::time::Duration;

use link_protocol::{
    server::Server,
    TransportConfig,
};
use tokio::time::timeout;

use common::{
    FakePeer,
    RELIABLE,
};

#[tokio::test]
async fn exhausts_retry_budget_then_stops() {
    let _ = env_logger::try_init();

    let config = TransportConfig {
        max_retries: 10,
        retry_interval: 0.1,
        ..Default::default()
    };

    let server = Server::bind(common::next_addr(), config).expect("server bind");
    let peer = FakePeer::bind().await;
    peer.handshake(server.local_addr()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let conn = server.connections().into_iter().next().expect("accepted connection");
    conn.send_reliable(b"never acked");

    let mut seen = 0;
    loop {
        match timeout(Duration::from_millis(500), peer.recv()).await {
            Ok(frame) => {
                assert_eq!(frame[0], RELIABLE);
                assert_eq!(&frame[2 ..], b"never acked");
                seen += 1;
            },
            Err(_) => break,
        }
    }

    // Initial send plus 10 retries.
    assert_eq!(seen, 11);
}
