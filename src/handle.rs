use std::{
    net::SocketAddr,
    sync::Arc,
};

use crate::{
    connection::{
        Connection,
        ConnId,
        DisconnectReason,
    },
    core::Core,
};

/// A handle to one peer connection, returned by
/// [`crate::client::Transport::connect`] and delivered to a
/// [`crate::server::Server`]'s accept callback.
///
/// Holding a clone keeps the owning transport's receive loop alive even if
/// the `Transport`/`Server` that created it is dropped.
#[derive(Clone)]
pub struct ConnectionHandle {
    core: Arc<Core>,
    conn: Arc<Connection>,
}

impl ConnectionHandle {
    pub(crate) fn new(core: Arc<Core>, conn: Arc<Connection>) -> Self {
        ConnectionHandle { core, conn }
    }

    pub fn id(&self) -> ConnId {
        self.conn.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.conn.peer
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    /// Sends `payload` as a best-effort, unordered `NON_RELIABLE` datagram.
    pub fn send(&self, payload: &[u8]) {
        self.conn.send_non_reliable(payload);
    }

    /// Sends `payload` as a `RELIABLE` datagram, retried until acknowledged
    /// or the retry budget is exhausted.
    pub fn send_reliable(&self, payload: &[u8]) {
        self.conn.send_reliable(payload);
    }

    /// Sends `DISCONNECT` and tears the connection down immediately.
    pub fn disconnect(&self) {
        self.conn.disconnect_local();
    }

    /// Registers a callback invoked on every delivered payload, in addition
    /// to any already registered (including ones seeded from the owning
    /// transport's defaults at connect/accept time).
    pub fn on_receive(&self, cb: impl Fn(ConnId, &[u8]) + Send + Sync + 'static) {
        self.conn.add_receive_event(Arc::new(cb));
    }

    /// Registers a callback invoked exactly once when the connection closes.
    pub fn on_disconnect(&self, cb: impl Fn(ConnId, DisconnectReason) + Send + Sync + 'static) {
        self.conn.add_disconnect_event(Arc::new(cb));
    }

    pub fn clear_receive_events(&self) {
        self.conn.clear_receive_events();
    }

    pub fn clear_disconnect_events(&self) {
        self.conn.clear_disconnect_events();
    }
}
