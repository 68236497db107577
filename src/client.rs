//! Client-side facade: bind a local socket, connect to peers, exchange
//! datagrams over the connections that come back.

use std::{
    net::ToSocketAddrs,
    sync::{
        Arc,
        Mutex,
    },
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

/// A client-side endpoint. Binds its local socket eagerly in [`Transport::bind`]
/// but defers spawning the background receive loop until the first
/// [`Transport::connect`] call, so a `Transport` that is built and never
/// used to connect never spawns a task.
pub struct Transport {
    pending_socket: Mutex<Option<UdpSocket>>,
    config: TransportConfig,
    core: Mutex<Option<Arc<Core>>>,
}

impl Transport {
    pub fn bind(addr: impl ToSocketAddrs, config: TransportConfig) -> Result<Transport, Error> {
        let addr = addr::resolve(addr)?;
        let std_socket = std::net::UdpSocket::bind(addr)?;
        std_socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(std_socket)?;

        Ok(Transport {
            pending_socket: Mutex::new(Some(socket)),
            config,
            core: Mutex::new(None),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        if let Some(core) = self.core.lock().unwrap().as_ref() {
            return Ok(core.local_addr());
        }
        self.pending_socket
            .lock()
            .unwrap()
            .as_ref()
            .expect("transport socket missing")
            .local_addr()
    }

    fn core(&self) -> Arc<Core> {
        let mut slot = self.core.lock().unwrap();
        if let Some(core) = slot.as_ref() {
            return core.clone();
        }
        let socket = self
            .pending_socket
            .lock()
            .unwrap()
            .take()
            .expect("transport socket already handed to the receive loop");
        let core = Core::bind(socket, self.config, false);
        *slot = Some(core.clone());
        core
    }

    /// Starts a three-way handshake with `host:port` and returns a handle to
    /// the resulting connection immediately; the handshake itself completes
    /// asynchronously in the background.
    ///
    /// `host` is resolved via a numeric parse first, falling back to DNS,
    /// taking the first resolved address. Fails with
    /// [`Error::InvalidAddress`] if resolution fails or [`Error::InvalidPort`]
    /// if `port` is outside `0..=65535`.
    pub fn connect(&self, host: &str, port: u32) -> Result<ConnectionHandle, Error> {
        let addr = addr::resolve_host_port(host, port)?;
        let core = self.core();
        let conn = core.create_connection(addr, true);
        Ok(ConnectionHandle::new(core, conn))
    }

    pub fn connection(&self, id: ConnId) -> Option<ConnectionHandle> {
        let core = self.core.lock().unwrap().as_ref()?.clone();
        let conn = core.connection(id)?;
        Some(ConnectionHandle::new(core, conn))
    }

    pub fn connections(&self) -> Vec<ConnectionHandle> {
        match self.core.lock().unwrap().as_ref() {
            Some(core) => core
                .connections()
                .into_iter()
                .map(|conn| ConnectionHandle::new(core.clone(), conn))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Disconnects every connection this transport currently holds. Once
    /// none remain, stops the receive loop and releases the socket. A
    /// client `Transport` with no connections is fully idle, matching
    /// spec.md's client-variant teardown (the server variant never does
    /// this; see [`crate::server::Server::disconnect_all`]).
    pub fn disconnect_all(&self) {
        let Some(core) = self.core.lock().unwrap().clone() else {
            return;
        };
        for conn in core.connections() {
            let id = conn.id;
            conn.disconnect_local();
            core.remove_connection_now(id, DisconnectReason::Disconnect);
        }
        if core.connection_count() == 0 {
            core.shutdown();
        }
    }

    /// Registers a default `on_receive` callback applied to every connection
    /// created by this transport from this point forward.
    pub fn on_receive(&self, cb: impl Fn(ConnId, &[u8]) + Send + Sync + 'static) {
        self.core().add_default_on_receive(Arc::new(cb) as ReceiveCallback);
    }

    pub fn on_disconnect(&self, cb: impl Fn(ConnId, DisconnectReason) + Send + Sync + 'static) {
        self.core()
            .add_default_on_disconnect(Arc::new(cb) as DisconnectCallback);
    }
}
