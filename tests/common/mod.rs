//! Shared helpers for the integration tests: a port dispenser so tests can
//! run concurrently without clashing on `bind`, and hand-rolled wire-format
//! helpers that let a test act as a raw UDP "fake peer" driving the crate's
//! [`link_protocol::server::Server`] through its public packet types.
//!
//! The byte layouts here mirror spec.md's wire format exactly (type tags,
//! header lengths, little-endian nonces) rather than reaching into the
//! crate's private `wire` module, so these tests exercise the protocol the
//! same way an independent implementation on the wire would.

use std::{
    net::SocketAddr,
    sync::atomic::{
        AtomicU16,
        Ordering,
    },
};

use tokio::net::UdpSocket;

pub const INIT: u8 = 1;
pub const INIT_ACK: u8 = 2;
pub const INIT_FIN: u8 = 3;
pub const NON_RELIABLE: u8 = 10;
pub const RELIABLE: u8 = 11;
pub const MULTI: u8 = 12;
pub const ACK: u8 = 20;
pub const PING: u8 = 25;
pub const PING_ACK: u8 = 26;
pub const DISCONNECT: u8 = 30;

static TEST_PORT: AtomicU16 = AtomicU16::new(31000);

/// Returns a fresh loopback `127.0.0.1:<port>` address, distinct from every
/// other call in the same test binary.
pub fn next_addr() -> SocketAddr {
    let port = TEST_PORT.fetch_add(1, Ordering::Relaxed);
    ([127, 0, 0, 1], port).into()
}

/// A raw socket standing in for a peer that speaks the wire protocol
/// without any of the crate's connection-management machinery, so tests can
/// assert on exact bytes and timing.
pub struct FakePeer {
    pub socket: UdpSocket,
}

impl FakePeer {
    pub async fn bind() -> FakePeer {
        let socket = UdpSocket::bind(next_addr()).await.expect("fake peer bind");
        FakePeer { socket }
    }

    pub async fn send(&self, to: SocketAddr, bytes: &[u8]) {
        self.socket.send_to(bytes, to).await.expect("fake peer send");
    }

    pub async fn recv(&self) -> Vec<u8> {
        let mut buf = vec![0u8; 2048];
        let (len, _) = self.socket.recv_from(&mut buf).await.expect("fake peer recv");
        buf.truncate(len);
        buf
    }

    pub async fn recv_from(&self) -> (Vec<u8>, SocketAddr) {
        let mut buf = vec![0u8; 2048];
        let (len, peer) = self.socket.recv_from(&mut buf).await.expect("fake peer recv");
        buf.truncate(len);
        (buf, peer)
    }

    /// Drives a full three-way handshake against `server_addr`, acting as
    /// the connecting side: sends `INIT`, waits for `INIT_ACK`, replies with
    /// `INIT_FIN`. Returns the nonce it generated (`A`) and the peer's (`B`).
    pub async fn handshake(&self, server_addr: SocketAddr) -> (i32, i32) {
        let a: i32 = 0x4242_4242;
        let mut init = vec![INIT];
        init.extend_from_slice(&a.to_le_bytes());
        self.send(server_addr, &init).await;

        let reply = self.recv().await;
        assert_eq!(reply[0], INIT_ACK);
        let a_prime = i32::from_le_bytes(reply[1 .. 5].try_into().unwrap());
        let b = i32::from_le_bytes(reply[5 .. 9].try_into().unwrap());
        assert_eq!(a_prime, a.wrapping_add(1));

        let mut fin = vec![INIT_FIN];
        fin.extend_from_slice(&a_prime.to_le_bytes());
        fin.extend_from_slice(&b.wrapping_add(1).to_le_bytes());
        self.send(server_addr, &fin).await;

        (a, b)
    }
}
