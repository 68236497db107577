//! Covers spec.md §8 scenario 4: a payload larger than `MAX_PAYLOAD` is
//! split into `MULTI` fragments on the wire and reassembled byte-identical
//! on the other side.

mod common;

use std::{
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};

use link_protocol::{
    client::Transport,
    server::Server,
    TransportConfig,
    MAX_PAYLOAD,
};

use common::FakePeer;

#[tokio::test]
async fn oversized_payload_reassembles_intact() {
    let _ = env_logger::try_init();

    let server = Server::bind(common::next_addr(), TransportConfig::default()).expect("server bind");
    let received = Arc::new(Mutex::new(None));
    {
        let received = received.clone();
        server.on_receive(move |_id, payload| {
            *received.lock().unwrap() = Some(payload.to_vec());
        });
    }

    let client = Transport::bind(common::next_addr(), TransportConfig::default()).expect("client bind");
    let conn = client.connect(
        &server.local_addr().ip().to_string(),
        server.local_addr().port() as u32,
    )
    .expect("client connect");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(conn.is_connected());

    let payload: Vec<u8> = (0 .. 10_000usize).map(|i| (i % 256) as u8).collect();
    assert!(payload.len() > MAX_PAYLOAD);
    conn.send(&payload);

    tokio::time::sleep(Duration::from_millis(200)).await;

    let got = received.lock().unwrap().clone().expect("payload delivered");
    assert_eq!(got, payload);
}

#[tokio::test]
async fn fragment_count_matches_ceiling_division_over_the_wire() {
    let _ = env_logger::try_init();

    let server = Server::bind(common::next_addr(), TransportConfig::default()).expect("server bind");
    let peer = FakePeer::bind().await;
    peer.handshake(server.local_addr()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let conn = server.connections().into_iter().next().expect("accepted connection");
    let payload = vec![0xABu8; 10_000];
    conn.send(&payload);

    let mut fragments = Vec::new();
    for _ in 0 .. 8 {
        let frame = peer.recv().await;
        assert_eq!(frame[0], common::MULTI);
        assert_eq!(frame[1], 8);
        fragments.push(frame);
    }

    fragments.sort_by_key(|f| f[2]);
    for (i, frame) in fragments.iter().enumerate() {
        assert_eq!(frame[2], (i + 1) as u8);
        assert_eq!(frame[3], common::NON_RELIABLE);
        let expected_len = if i < 7 { MAX_PAYLOAD } else { 10_000 - 7 * MAX_PAYLOAD };
        assert_eq!(frame.len() - 4, expected_len);
    }
}
