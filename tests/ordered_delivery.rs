//! Covers spec.md §8 scenario 3: reliable packets injected out of order are
//! delivered to `on_receive` in ascending sequence order.

mod common;

use std::{
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};

use link_protocol::{
    server::Server,
    TransportConfig,
};

use common::{
    FakePeer,
    ACK,
    RELIABLE,
};

#[tokio::test]
async fn out_of_order_reliable_packets_deliver_in_sequence() {
    let _ = env_logger::try_init();

    let server = Server::bind(common::next_addr(), TransportConfig::default()).expect("server bind");
    let delivered = Arc::new(Mutex::new(Vec::new()));
    {
        let delivered = delivered.clone();
        server.on_receive(move |_id, payload| {
            delivered.lock().unwrap().push(payload.to_vec());
        });
    }

    let peer = FakePeer::bind().await;
    peer.handshake(server.local_addr()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let server_addr = server.local_addr();

    // Establish the stream with seq=1 so `next_expected_id` is 2 before the
    // reordering under test, matching spec.md's scenario, which injects
    // 3-then-2 against an already-running stream, not a fresh connection
    // (a fresh connection's first packet seeds `next_expected_id` from
    // whatever sequence arrives first and would deliver seq=3 immediately).
    let mut pkt1 = vec![RELIABLE, 1];
    pkt1.extend_from_slice(&[1u8; 9]);
    peer.send(server_addr, &pkt1).await;
    let ack1 = peer.recv().await;
    assert_eq!(ack1, vec![ACK, 1]);

    // Inject seq=3 first, then seq=2; both 9-byte payloads equal to [seq; 9],
    // matching spec.md's literal scenario.
    let mut pkt3 = vec![RELIABLE, 3];
    pkt3.extend_from_slice(&[3u8; 9]);
    peer.send(server_addr, &pkt3).await;

    let ack3 = peer.recv().await;
    assert_eq!(ack3, vec![ACK, 3]);

    let mut pkt2 = vec![RELIABLE, 2];
    pkt2.extend_from_slice(&[2u8; 9]);
    peer.send(server_addr, &pkt2).await;

    let ack2 = peer.recv().await;
    assert_eq!(ack2, vec![ACK, 2]);

    tokio::time::sleep(Duration::from_millis(100)).await;

    let got = delivered.lock().unwrap().clone();
    assert_eq!(got, vec![vec![1u8; 9], vec![2u8; 9], vec![3u8; 9]]);
}
