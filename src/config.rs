use std::time::Duration;

/// Tunable knobs applied to every connection a [`crate::client::Transport`]
/// or [`crate::server::Server`] creates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportConfig {
    /// Handshake retransmit interval, in seconds.
    pub connect_interval: f32,
    /// Handshake deadline, in seconds, after which retries stop.
    pub connect_timeout: f32,
    /// Inactivity deadline, in seconds, before a connection is closed with
    /// `R_TIMEOUT`.
    pub connection_timeout: f32,
    /// `PING` emission period, in seconds, while a connection is idle.
    pub keep_alive_ping_time: f32,
    /// Reliable-send retransmit budget.
    pub max_retries: u32,
    /// Reliable-send retransmit period, in seconds.
    pub retry_interval: f32,
    /// When `false`, `RELIABLE` deliveries bypass the reorder buffer and are
    /// handed to `on_receive` as soon as they arrive.
    pub use_ordering: bool,
    /// Enables verbose per-packet logging.
    pub debug: bool,
    /// Terminates the process on an unexpected receive-loop error.
    pub exit_on_receive_exception: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_interval: 2.0,
            connect_timeout: 10.0,
            connection_timeout: 40.0,
            keep_alive_ping_time: 15.0,
            max_retries: 10,
            retry_interval: 0.5,
            use_ordering: true,
            debug: false,
            exit_on_receive_exception: false,
        }
    }
}

impl TransportConfig {
    pub(crate) fn connect_interval_duration(&self) -> Duration {
        Duration::from_secs_f32(self.connect_interval)
    }

    pub(crate) fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs_f32(self.connect_timeout)
    }

    pub(crate) fn connection_timeout_duration(&self) -> Duration {
        Duration::from_secs_f32(self.connection_timeout)
    }

    pub(crate) fn keep_alive_ping_time_duration(&self) -> Duration {
        Duration::from_secs_f32(self.keep_alive_ping_time)
    }

    pub(crate) fn retry_interval_duration(&self) -> Duration {
        Duration::from_secs_f32(self.retry_interval)
    }
}
