//! Server-side facade: bind a socket, accept first-contact peers, and fan
//! user `send`/`disconnect` calls out to the right connection.
//!
//! Unlike [`crate::client::Transport`], a [`Server`]'s receive loop is
//! running from the moment it is constructed, it has to be, since inbound
//! `INIT` packets from unknown peers are what create connections here.

use std::{
    net::ToSocketAddrs,
    sync::Arc,
};

use tokio::net::UdpSocket;

use crate::{
    addr,
    config::TransportConfig,
    connection::{
        ConnId,
        DisconnectCallback,
        DisconnectReason,
        ReceiveCallback,
    },
    core::Core,
    error::Error,
    handle::ConnectionHandle,
};

/// A server-side endpoint, accepting connections from any peer that sends a
/// well-formed `INIT`.
pub struct Server {
    core: Arc<Core>,
}

impl Server {
    /// Binds to `addr` and immediately starts the background receive loop,
    /// the server variant never defers it the way [`crate::client::Transport`]
    /// does, since it has nothing else to wait on before a peer can show up.
    pub fn bind(addr: impl ToSocketAddrs, config: TransportConfig) -> Result<Server, Error> {
        let addr = addr::resolve(addr)?;
        let std_socket = std::net::UdpSocket::bind(addr)?;
        std_socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(std_socket)?;

        let core = Core::bind(socket, config, true);
        Ok(Server { core })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.core.local_addr()
    }

    pub fn connection(&self, id: ConnId) -> Option<ConnectionHandle> {
        let conn = self.core.connection(id)?;
        Some(ConnectionHandle::new(self.core.clone(), conn))
    }

    pub fn connections(&self) -> Vec<ConnectionHandle> {
        self.core
            .connections()
            .into_iter()
            .map(|conn| ConnectionHandle::new(self.core.clone(), conn))
            .collect()
    }

    /// Disconnects every connection currently held, but unlike
    /// [`crate::client::Transport::disconnect_all`], never tears down the
    /// socket or stops the receive loop. The server keeps listening for the
    /// next first-contact peer.
    pub fn disconnect_all(&self) {
        for conn in self.core.connections() {
            let id = conn.id;
            conn.disconnect_local();
            self.core.remove_connection_now(id, DisconnectReason::Disconnect);
        }
    }

    /// Registers a callback fired once per newly accepted connection, right
    /// after it is created from an inbound `INIT` and before that `INIT` is
    /// processed (so the handshake reply it triggers is already observable
    /// through the handle if the callback inspects connection state).
    pub fn on_connect(&self, cb: impl Fn(ConnectionHandle) + Send + Sync + 'static) {
        let core = self.core.clone();
        self.core.set_accept_hook(Arc::new(move |conn| {
            cb(ConnectionHandle::new(core.clone(), conn));
        }));
    }

    /// Registers a default `on_receive` callback applied to every connection
    /// accepted by this server from this point forward.
    pub fn on_receive(&self, cb: impl Fn(ConnId, &[u8]) + Send + Sync + 'static) {
        self.core.add_default_on_receive(Arc::new(cb) as ReceiveCallback);
    }

    pub fn on_disconnect(&self, cb: impl Fn(ConnId, DisconnectReason) + Send + Sync + 'static) {
        self.core
            .add_default_on_disconnect(Arc::new(cb) as DisconnectCallback);
    }
}
