//! Socket ownership, the background receive loop, and the connection maps
//! shared by [`crate::client::Transport`] and [`crate::server::Server`].

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{
            AtomicI32,
            Ordering,
        },
        Arc,
        Mutex,
    },
};

use tokio::{
    net::UdpSocket,
    sync::mpsc,
    task::JoinHandle,
};

use crate::{
    config::TransportConfig,
    connection::{
        ConnId,
        Connection,
        DisconnectCallback,
        DisconnectReason,
        ReceiveCallback,
        SendFn,
    },
    wire::{
        Type,
        MAX_DATAGRAM,
    },
};

struct Maps {
    by_id: HashMap<ConnId, Arc<Connection>>,
    by_addr: HashMap<SocketAddr, ConnId>,
}

/// Owns the `UdpSocket` and the single background task that reads from it.
///
/// A connection's timers never touch [`Maps`] directly. They report
/// removals through `removal_tx`, which the receive loop drains, so the two
/// mutexes in this object (`maps` here, `Connection::inner` in the other)
/// are never held at the same time by the same task.
pub(crate) struct Core {
    socket: Mutex<Option<Arc<UdpSocket>>>,
    local_addr: SocketAddr,
    config: TransportConfig,
    next_id: AtomicI32,
    maps: Mutex<Maps>,
    default_on_receive: Mutex<Vec<ReceiveCallback>>,
    default_on_disconnect: Mutex<Vec<DisconnectCallback>>,
    removal_tx: mpsc::UnboundedSender<(ConnId, DisconnectReason)>,
    recv_loop: Mutex<Option<JoinHandle<()>>>,
    server_mode: bool,
    accept_hook: Mutex<Option<Arc<dyn Fn(Arc<Connection>) + Send + Sync>>>,
}

impl Core {
    pub fn bind(socket: UdpSocket, config: TransportConfig, server_mode: bool) -> Arc<Core> {
        let local_addr = socket
            .local_addr()
            .expect("a bound UdpSocket always has a local address");
        let (removal_tx, removal_rx) = mpsc::unbounded_channel();

        let core = Arc::new(Core {
            socket: Mutex::new(Some(Arc::new(socket))),
            local_addr,
            config,
            next_id: AtomicI32::new(1),
            maps: Mutex::new(Maps {
                by_id: HashMap::new(),
                by_addr: HashMap::new(),
            }),
            default_on_receive: Mutex::new(Vec::new()),
            default_on_disconnect: Mutex::new(Vec::new()),
            removal_tx,
            recv_loop: Mutex::new(None),
            server_mode,
            accept_hook: Mutex::new(None),
        });

        let handle = {
            let core = core.clone();
            tokio::spawn(async move { core.run_receive_loop(removal_rx).await })
        };
        *core.recv_loop.lock().unwrap() = Some(handle);

        core
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> TransportConfig {
        self.config
    }

    pub fn is_server_mode(&self) -> bool {
        self.server_mode
    }

    pub fn set_accept_hook(&self, hook: Arc<dyn Fn(Arc<Connection>) + Send + Sync>) {
        *self.accept_hook.lock().unwrap() = Some(hook);
    }

    async fn run_receive_loop(
        self: Arc<Self>,
        mut removal_rx: mpsc::UnboundedReceiver<(ConnId, DisconnectReason)>,
    ) {
        // Held for the lifetime of the loop; shutdown happens by aborting
        // this task and dropping `self.socket`'s own clone, not by racing
        // on the Mutex from inside the loop body.
        let socket = match self.socket.lock().unwrap().clone() {
            Some(socket) => socket,
            None => return,
        };

        let mut buf = vec![0u8; MAX_DATAGRAM + 64];
        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, peer)) => self.on_datagram(&buf[.. len], peer),
                        Err(e) => {
                            log::warn!("receive loop I/O error: {}", e);
                            if self.config.exit_on_receive_exception {
                                std::process::exit(1);
                            }
                        },
                    }
                },
                Some((id, reason)) = removal_rx.recv() => {
                    self.remove_connection(id, reason);
                },
            }
        }
    }

    fn on_datagram(self: &Arc<Self>, bytes: &[u8], peer: SocketAddr) {
        let existing = {
            let maps = self.maps.lock().unwrap();
            maps.by_addr
                .get(&peer)
                .and_then(|id| maps.by_id.get(id))
                .cloned()
        };

        if let Some(conn) = existing {
            if self.config.debug {
                log::debug!("recv {} bytes from {}", bytes.len(), peer);
            }
            conn.process_inbound(bytes);
            return;
        }

        if self.server_mode && bytes.first() == Some(&Type::INIT) {
            let conn = self.create_connection(peer, false);
            if let Some(hook) = self.accept_hook.lock().unwrap().clone() {
                hook(conn.clone());
            }
            conn.process_inbound(bytes);
        } else {
            log::debug!("dropping datagram from unestablished peer {}", peer);
        }
    }

    fn remove_connection(&self, id: ConnId, reason: DisconnectReason) {
        let mut maps = self.maps.lock().unwrap();
        if let Some(conn) = maps.by_id.remove(&id) {
            maps.by_addr.remove(&conn.peer);
        }
        log::debug!("connection {} removed ({:?})", id, reason);
    }

    /// Removes a connection from the maps immediately, without waiting for
    /// the receive loop to drain the removal channel. Used by
    /// `disconnect`/`disconnect_all`, which run on an arbitrary caller
    /// thread and need the maps to reflect the removal before returning.
    pub fn remove_connection_now(&self, id: ConnId, reason: DisconnectReason) {
        self.remove_connection(id, reason);
    }

    pub fn create_connection(self: &Arc<Self>, peer: SocketAddr, initiate: bool) -> Arc<Connection> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let send_fn: SendFn = {
            let core = self.clone();
            Arc::new(move |bytes, addr| core.send_datagram(bytes, addr))
        };

        let seed_on_receive = self.default_on_receive.lock().unwrap().clone();
        let seed_on_disconnect = self.default_on_disconnect.lock().unwrap().clone();

        let conn = Connection::new(
            id,
            peer,
            self.config,
            send_fn,
            self.removal_tx.clone(),
            seed_on_receive,
            seed_on_disconnect,
        );

        {
            let mut maps = self.maps.lock().unwrap();
            maps.by_id.insert(id, conn.clone());
            maps.by_addr.insert(peer, id);
        }

        if initiate {
            conn.initiate_handshake();
        }

        conn
    }

    fn send_datagram(&self, bytes: Vec<u8>, addr: SocketAddr) {
        let socket = self.socket.lock().unwrap().clone();
        let Some(socket) = socket else {
            log::debug!("dropping send to {} after transport shutdown", addr);
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = socket.send_to(&bytes, addr).await {
                log::warn!("send error to {}: {}", addr, e);
            }
        });
    }

    pub fn connection(&self, id: ConnId) -> Option<Arc<Connection>> {
        self.maps.lock().unwrap().by_id.get(&id).cloned()
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.maps.lock().unwrap().by_id.values().cloned().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.maps.lock().unwrap().by_id.len()
    }

    pub fn add_default_on_receive(&self, cb: ReceiveCallback) {
        self.default_on_receive.lock().unwrap().push(cb);
    }

    pub fn add_default_on_disconnect(&self, cb: DisconnectCallback) {
        self.default_on_disconnect.lock().unwrap().push(cb);
    }

    pub fn is_shut_down(&self) -> bool {
        self.socket.lock().unwrap().is_none()
    }

    /// Stops the receive loop and drops this `Core`'s own handle on the
    /// socket. Only ever called for the client variant (`Transport`), and
    /// only once every connection it owned has been disconnected; the
    /// server variant keeps listening regardless of connection count.
    pub fn shutdown(&self) {
        if let Some(handle) = self.recv_loop.lock().unwrap().take() {
            handle.abort();
        }
        *self.socket.lock().unwrap() = None;
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        if let Some(handle) = self.recv_loop.lock().unwrap().take() {
            handle.abort();
        }
    }
}
