//! Crate-wide error taxonomy.

/// Errors surfaced by the public API.
///
/// Transient network errors (`MalformedPacket`, most `SocketError`s) are
/// never surfaced this way; they are logged and dropped internally. Only
/// connect-time validation errors and explicit retry exhaustion reach the
/// caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `connect()` was given a host that does not resolve to any address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// `connect()` was given a port outside `0..65535`.
    #[error("invalid port: {0}")]
    InvalidPort(u32),

    /// A datagram's header was too short, named an unknown packet type, or
    /// carried inconsistent multi-part metadata. Never surfaced to callers;
    /// kept `pub` only so unit tests can assert on it.
    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),

    /// A datagram-layer I/O error.
    #[error("socket error: {0}")]
    SocketError(#[from] std::io::Error),

    /// A handshake nonce failed to verify; the connection is closed.
    #[error("handshake nonce mismatch")]
    HandshakeMismatch,

    /// A reliable send exhausted its retry budget without an ACK.
    #[error("retry budget exhausted")]
    RetryExhausted,

    /// The transport's socket and receive loop have already shut down.
    #[error("transport is closed")]
    TransportClosed,
}
