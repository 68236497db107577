//! Per-peer connection state machine: handshake, keep-alive, ordered
//! reliable delivery, retransmission, and inactivity timeout.

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::{
        Arc,
        Mutex,
        Weak,
    },
};

use tokio::task::JoinHandle;

use crate::{
    config::TransportConfig,
    wire::{
        self,
        MultiBuf,
        SeqId,
        Type,
    },
};

/// Stable, non-zero connection identity assigned by the owning transport.
pub type ConnId = i32;

/// Reason a connection was torn down, delivered to `on_disconnect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer (or the local side) sent `DISCONNECT`.
    Disconnect = 1,
    /// No valid packet arrived for `connection_timeout` seconds.
    Timeout = 2,
}

pub type ReceiveCallback = Arc<dyn Fn(ConnId, &[u8]) + Send + Sync + 'static>;
pub type DisconnectCallback = Arc<dyn Fn(ConnId, DisconnectReason) + Send + Sync + 'static>;

/// Non-blocking datagram send primitive the connection is given by its
/// owning transport; the external collaborator described in spec §1.
pub type SendFn = Arc<dyn Fn(Vec<u8>, SocketAddr) + Send + Sync + 'static>;

/// Used by timer callbacks to ask the transport to remove this connection
/// from its maps, without the timer ever touching the transport's own
/// mutex directly (see concurrency design notes).
pub type RemovalSender = tokio::sync::mpsc::UnboundedSender<(ConnId, DisconnectReason)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Idle,
    HandshakingA,
    HandshakingB,
    Connected,
    Closed,
}

struct OutboundReliable {
    header: Vec<u8>,
    body: Vec<u8>,
    tries: u32,
    retry_timer: Option<JoinHandle<()>>,
}

struct Inner {
    state: ConnState,
    gen_nonce: i32,
    recv_nonce: i32,

    outbound: BTreeMap<SeqId, OutboundReliable>,
    next_send_id: SeqId,

    reorder: BTreeMap<SeqId, Vec<u8>>,
    next_expected_id: SeqId,
    first_packet: bool,

    multi_buf: Option<MultiBuf>,

    on_receive: Vec<ReceiveCallback>,
    on_disconnect: Vec<DisconnectCallback>,

    handshake_interval: Option<JoinHandle<()>>,
    handshake_timeout: Option<JoinHandle<()>>,
    keep_alive: Option<JoinHandle<()>>,
    inactivity_timeout: Option<JoinHandle<()>>,
}

impl Inner {
    fn take_all_timer_handles(&mut self) -> Vec<JoinHandle<()>> {
        [
            self.handshake_interval.take(),
            self.handshake_timeout.take(),
            self.keep_alive.take(),
            self.inactivity_timeout.take(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// The 8-bit sequence space wraps modulo 255, not 256, a latent quirk
/// carried over unchanged; see the design notes.
fn seq_inc(x: SeqId) -> SeqId {
    ((x as u16 + 1) % 255) as u8
}

fn read_i32(buf: &[u8], offset: usize) -> Option<i32> {
    let bytes: [u8; 4] = buf.get(offset .. offset + 4)?.try_into().ok()?;
    Some(i32::from_le_bytes(bytes))
}

fn build_init(nonce: i32) -> Vec<u8> {
    let mut v = Vec::with_capacity(5);
    v.push(Type::INIT);
    v.extend_from_slice(&nonce.to_le_bytes());
    v
}

fn build_init_ack(a_plus_one: i32, b: i32) -> Vec<u8> {
    let mut v = Vec::with_capacity(9);
    v.push(Type::INIT_ACK);
    v.extend_from_slice(&a_plus_one.to_le_bytes());
    v.extend_from_slice(&b.to_le_bytes());
    v
}

fn build_init_fin(a_plus_one: i32, b_plus_one: i32) -> Vec<u8> {
    let mut v = Vec::with_capacity(9);
    v.push(Type::INIT_FIN);
    v.extend_from_slice(&a_plus_one.to_le_bytes());
    v.extend_from_slice(&b_plus_one.to_le_bytes());
    v
}

/// Per-peer protocol state. One mutex serializes every mutation, matching
/// the "single mutex per connection" rule in the concurrency design.
/// Timer tasks and the receive loop both go through it, never touching the
/// transport's own maps directly.
pub(crate) struct Connection {
    pub id: ConnId,
    pub peer: SocketAddr,
    config: TransportConfig,
    send_fn: SendFn,
    removal_tx: RemovalSender,
    self_ref: Weak<Connection>,
    inner: Mutex<Inner>,
}

impl Connection {
    pub fn new(
        id: ConnId,
        peer: SocketAddr,
        config: TransportConfig,
        send_fn: SendFn,
        removal_tx: RemovalSender,
        seed_on_receive: Vec<ReceiveCallback>,
        seed_on_disconnect: Vec<DisconnectCallback>,
    ) -> Arc<Connection> {
        Arc::new_cyclic(|weak| {
            Connection {
                id,
                peer,
                config,
                send_fn,
                removal_tx,
                self_ref: weak.clone(),
                inner: Mutex::new(Inner {
                    state: ConnState::Idle,
                    gen_nonce: 0,
                    recv_nonce: 0,
                    outbound: BTreeMap::new(),
                    next_send_id: 1,
                    reorder: BTreeMap::new(),
                    next_expected_id: 0,
                    first_packet: true,
                    multi_buf: None,
                    on_receive: seed_on_receive,
                    on_disconnect: seed_on_disconnect,
                    handshake_interval: None,
                    handshake_timeout: None,
                    keep_alive: None,
                    inactivity_timeout: None,
                }),
            }
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn arc(&self) -> Arc<Connection> {
        self.self_ref
            .upgrade()
            .expect("connection outlived its own Arc")
    }

    fn send_small(&self, bytes: Vec<u8>) {
        (self.send_fn)(bytes, self.peer);
    }

    fn transmit(&self, header: &[u8], body: &[u8]) {
        for frag in wire::frame(header, body) {
            (self.send_fn)(frag, self.peer);
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.lock().state, ConnState::Connected)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.lock().state, ConnState::Closed)
    }

    // ---- callback registration -------------------------------------

    pub fn add_receive_event(&self, cb: ReceiveCallback) {
        self.lock().on_receive.push(cb);
    }

    pub fn clear_receive_events(&self) {
        self.lock().on_receive.clear();
    }

    pub fn add_disconnect_event(&self, cb: DisconnectCallback) {
        self.lock().on_disconnect.push(cb);
    }

    pub fn clear_disconnect_events(&self) {
        self.lock().on_disconnect.clear();
    }

    fn fire_on_receive(&self, payload: &[u8]) {
        let callbacks = self.lock().on_receive.clone();
        for cb in callbacks {
            cb(self.id, payload);
        }
    }

    // ---- handshake ----------------------------------------------------

    pub fn initiate_handshake(&self) {
        let nonce: i32 = rand::random();
        {
            let mut inner = self.lock();
            if inner.state != ConnState::Idle {
                return;
            }
            inner.gen_nonce = nonce;
            inner.state = ConnState::HandshakingA;
        }
        self.send_small(build_init(nonce));
        self.start_handshake_timers(true);
        // Started here rather than only on entering `Connected`, so a peer
        // that abandons the handshake after `handshake_timeout` stops the
        // retries is still torn down by the inactivity timeout instead of
        // lingering in `by_id`/`by_addr` forever.
        self.restart_inactivity();
    }

    fn start_handshake_timers(&self, with_interval: bool) {
        let timeout_conn = self.arc();
        let timeout_dur = self.config.connect_timeout_duration();
        let timeout_handle = tokio::spawn(async move {
            tokio::time::sleep(timeout_dur).await;
            timeout_conn.on_handshake_timeout();
        });

        let interval_handle = with_interval.then(|| {
            let interval_conn = self.arc();
            let interval_dur = self.config.connect_interval_duration();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval_dur);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    interval_conn.on_handshake_interval_tick();
                }
            })
        });

        let mut inner = self.lock();
        inner.handshake_timeout = Some(timeout_handle);
        inner.handshake_interval = interval_handle;
    }

    fn on_handshake_timeout(&self) {
        let stale_interval = {
            let mut inner = self.lock();
            if matches!(inner.state, ConnState::HandshakingA | ConnState::HandshakingB) {
                inner.handshake_timeout = None;
                inner.handshake_interval.take()
            } else {
                None
            }
        };
        if let Some(handle) = stale_interval {
            handle.abort();
        }
    }

    fn on_handshake_interval_tick(&self) {
        let nonce = {
            let inner = self.lock();
            if inner.state != ConnState::HandshakingA {
                return;
            }
            inner.gen_nonce
        };
        self.send_small(build_init(nonce));
    }

    fn handle_init(&self, payload: &[u8]) {
        let Some(a) = read_i32(payload, 0) else {
            log::warn!("malformed INIT from {}", self.peer);
            return;
        };

        // `None` means "ignore"; `Some(is_fresh, recv_nonce, gen_nonce)` means
        // "send INIT_ACK", where `is_fresh` tells us whether this is the first
        // time we've entered HandshakingB (and so must start its timers) or an
        // idempotent resend triggered by a retried INIT.
        let action = {
            let mut inner = self.lock();
            match inner.state {
                ConnState::Idle => {
                    let recv_nonce = a.wrapping_add(1);
                    let gen_nonce: i32 = rand::random();
                    inner.recv_nonce = recv_nonce;
                    inner.gen_nonce = gen_nonce;
                    inner.state = ConnState::HandshakingB;
                    Some((true, recv_nonce, gen_nonce))
                },
                ConnState::HandshakingB if inner.recv_nonce == a.wrapping_add(1) => {
                    Some((false, inner.recv_nonce, inner.gen_nonce))
                },
                _ => None,
            }
        };

        match action {
            Some((is_fresh, recv_nonce, gen_nonce)) => {
                self.send_small(build_init_ack(recv_nonce, gen_nonce));
                if is_fresh {
                    self.start_handshake_timers(false);
                    // Same reasoning as `initiate_handshake`: a peer that
                    // never sends `INIT_FIN` would otherwise leave this
                    // connection parked in the transport's maps forever.
                    self.restart_inactivity();
                }
            },
            None => log::debug!("ignoring unexpected INIT from {}", self.peer),
        }
    }

    fn handle_init_ack(&self, payload: &[u8]) {
        let (Some(a_prime), Some(b)) = (read_i32(payload, 0), read_i32(payload, 4)) else {
            log::warn!("malformed INIT_ACK from {}", self.peer);
            return;
        };

        let outcome = {
            let mut inner = self.lock();
            if inner.state != ConnState::HandshakingA {
                return;
            }
            if a_prime != inner.gen_nonce.wrapping_add(1) {
                None
            } else {
                inner.recv_nonce = b;
                inner.state = ConnState::Connected;
                let handles = [inner.handshake_timeout.take(), inner.handshake_interval.take()];
                Some((handles, a_prime, b))
            }
        };

        match outcome {
            None => self.close(DisconnectReason::Disconnect, false),
            Some((handles, a_prime, b)) => {
                for handle in handles.into_iter().flatten() {
                    handle.abort();
                }
                self.send_small(build_init_fin(a_prime, b.wrapping_add(1)));
                self.on_entered_connected();
            },
        }
    }

    fn handle_init_fin(&self, payload: &[u8]) {
        let (Some(a), Some(b_prime)) = (read_i32(payload, 0), read_i32(payload, 4)) else {
            log::warn!("malformed INIT_FIN from {}", self.peer);
            return;
        };

        let outcome = {
            let mut inner = self.lock();
            if inner.state != ConnState::HandshakingB {
                return;
            }
            if a != inner.recv_nonce || b_prime != inner.gen_nonce.wrapping_add(1) {
                false
            } else {
                inner.state = ConnState::Connected;
                true
            }
        };

        if !outcome {
            self.close(DisconnectReason::Disconnect, false);
            return;
        }

        let stale_timeout = self.lock().handshake_timeout.take();
        if let Some(handle) = stale_timeout {
            handle.abort();
        }
        self.on_entered_connected();
    }

    fn on_entered_connected(&self) {
        self.start_keep_alive();
        self.restart_inactivity();
    }

    // ---- keep-alive / inactivity ---------------------------------------

    fn start_keep_alive(&self) {
        let conn = self.arc();
        let dur = self.config.keep_alive_ping_time_duration();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(dur);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                conn.send_small(vec![Type::PING]);
            }
        });
        self.lock().keep_alive = Some(handle);
    }

    fn restart_inactivity(&self) {
        let stale = self.lock().inactivity_timeout.take();
        if let Some(handle) = stale {
            handle.abort();
        }

        let conn = self.arc();
        let dur = self.config.connection_timeout_duration();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(dur).await;
            conn.on_inactivity_timeout();
        });

        let mut inner = self.lock();
        if inner.state == ConnState::Closed {
            drop(inner);
            handle.abort();
        } else {
            inner.inactivity_timeout = Some(handle);
        }
    }

    fn on_inactivity_timeout(&self) {
        if !self.is_closed() {
            self.close(DisconnectReason::Timeout, false);
        }
    }

    // ---- reliable send / ordered receive -------------------------------

    pub fn send_reliable(&self, payload: &[u8]) {
        let seq = {
            let mut inner = self.lock();
            if inner.state != ConnState::Connected {
                log::warn!("send_reliable on connection {} not yet connected", self.id);
                return;
            }
            let seq = inner.next_send_id;
            inner.next_send_id = seq_inc(seq);
            seq
        };

        let header = vec![Type::RELIABLE, seq];
        let body = payload.to_vec();
        self.transmit(&header, &body);

        let conn = self.arc();
        let retry_dur = self.config.retry_interval_duration();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(retry_dur);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if conn.on_retry_tick(seq) {
                    break;
                }
            }
        });

        self.lock().outbound.insert(seq, OutboundReliable {
            header,
            body,
            tries: 0,
            retry_timer: Some(handle),
        });
    }

    fn on_retry_tick(&self, seq: SeqId) -> bool {
        let (header, body, exhausted) = {
            let mut inner = self.lock();
            let Some(entry) = inner.outbound.get_mut(&seq) else {
                return true;
            };
            entry.tries += 1;
            let exhausted = entry.tries >= self.config.max_retries;
            let header = entry.header.clone();
            let body = entry.body.clone();
            if exhausted {
                inner.outbound.remove(&seq);
            }
            (header, body, exhausted)
        };

        self.transmit(&header, &body);
        exhausted
    }

    pub fn send_non_reliable(&self, payload: &[u8]) {
        if !self.is_connected() {
            log::warn!("send on connection {} not yet connected", self.id);
            return;
        }
        self.transmit(&[Type::NON_RELIABLE], payload);
    }

    fn handle_ack(&self, seq: SeqId) {
        let removed = self.lock().outbound.remove(&seq);
        match removed {
            Some(entry) => {
                if let Some(handle) = entry.retry_timer {
                    handle.abort();
                }
            },
            None => log::warn!("ack for unknown sequence {} on connection {}", seq, self.id),
        }
    }

    fn handle_reliable(&self, seq: SeqId, payload: &[u8]) {
        if !self.config.use_ordering {
            self.fire_on_receive(payload);
            return;
        }

        let mut to_deliver = Vec::new();
        {
            let mut inner = self.lock();

            let mut expected = inner.next_expected_id;
            if inner.first_packet {
                expected = seq;
                inner.first_packet = false;
            }

            if seq < expected {
                log::debug!("dropping duplicate/late reliable seq={} on {}", seq, self.id);
                inner.next_expected_id = expected;
                return;
            } else if seq == expected {
                to_deliver.push(payload.to_vec());
                expected = seq_inc(expected);
                while let Some(buf) = inner.reorder.remove(&expected) {
                    to_deliver.push(buf);
                    expected = seq_inc(expected);
                }
            } else {
                inner.reorder.insert(seq, payload.to_vec());
            }

            inner.next_expected_id = expected;
        }

        for buf in to_deliver {
            self.fire_on_receive(&buf);
        }
    }

    // ---- dispatch -------------------------------------------------------

    pub fn process_inbound(&self, bytes: &[u8]) {
        let (header, payload) = match wire::split_header(bytes) {
            Ok(parts) => parts,
            Err(e) => {
                log::warn!("{} from {}: {:?}", e, self.peer, bytes.first());
                return;
            },
        };

        let packet_type = header[0];

        if packet_type == Type::MULTI {
            // Each fragment of a multi-part stream is itself a valid packet
            // on arrival, so a transfer spanning longer than
            // `connection_timeout` doesn't time out mid-stream while
            // fragments are still actively coming in.
            self.restart_inactivity();
            let (total_parts, part_index) = (header[1], header[2]);
            let reassembled = {
                let mut inner = self.lock();
                wire::reassemble(&mut inner.multi_buf, total_parts, part_index, payload)
            };
            match reassembled {
                Ok(Some(inner_packet)) => self.process_inbound(&inner_packet),
                Ok(None) => {},
                Err(e) => log::warn!("multi-part reassembly from {}: {}", self.peer, e),
            }
            return;
        }

        self.dispatch(packet_type, header, payload);
    }

    fn dispatch(&self, packet_type: u8, header: &[u8], payload: &[u8]) {
        match packet_type {
            Type::INIT => self.handle_init(payload),
            Type::INIT_ACK => self.handle_init_ack(payload),
            Type::INIT_FIN => self.handle_init_fin(payload),
            Type::NON_RELIABLE => {
                self.restart_inactivity();
                self.fire_on_receive(payload);
            },
            Type::PING => {
                self.restart_inactivity();
                self.send_small(vec![Type::PING_ACK]);
            },
            Type::PING_ACK => {
                self.restart_inactivity();
            },
            Type::RELIABLE => {
                self.restart_inactivity();
                let seq = header[1];
                self.send_small(vec![Type::ACK, seq]);
                self.handle_reliable(seq, payload);
            },
            Type::ACK => self.handle_ack(header[1]),
            Type::DISCONNECT => self.close(DisconnectReason::Disconnect, false),
            _ => log::warn!("unreachable packet type {} from {}", packet_type, self.peer),
        }
    }

    // ---- teardown ---------------------------------------------------------

    /// Stops all timers and drops all in-flight reliable state. Idempotent;
    /// does not touch connection state or invoke callbacks.
    pub fn clear_all(&self) {
        let (timer_handles, outbound_handles) = {
            let mut inner = self.lock();
            let timer_handles = inner.take_all_timer_handles();
            let outbound_handles = inner
                .outbound
                .values_mut()
                .filter_map(|o| o.retry_timer.take())
                .collect::<Vec<_>>();
            inner.outbound.clear();
            (timer_handles, outbound_handles)
        };
        for handle in timer_handles.into_iter().chain(outbound_handles) {
            handle.abort();
        }
    }

    /// Sends `DISCONNECT` to the peer and tears the connection down.
    pub fn disconnect_local(&self) {
        self.close(DisconnectReason::Disconnect, true);
    }

    fn close(&self, reason: DisconnectReason, notify_peer: bool) {
        let (already_closed, callbacks) = {
            let mut inner = self.lock();
            if inner.state == ConnState::Closed {
                (true, Vec::new())
            } else {
                inner.state = ConnState::Closed;
                (false, inner.on_disconnect.clone())
            }
        };

        if already_closed {
            return;
        }

        self.clear_all();

        if notify_peer {
            self.send_small(vec![Type::DISCONNECT]);
        }

        for cb in callbacks {
            cb(self.id, reason);
        }

        let _ = self.removal_tx.send((self.id, reason));
    }
}
