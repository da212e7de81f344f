//! Connection configuration

use crate::{DEFAULT_HOST, DEFAULT_PORT};
use std::time::Duration;

/// Settings for one multiplexed connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server host name or address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Sent with `AUTH` before anything else when set
    pub password: Option<String>,
    /// Capacity of the standard outbound lane; producers block beyond it
    pub max_unsent: usize,
    /// Deadline for the synchronous wait helpers and the open handshake
    pub sync_timeout: Duration,
    /// Socket write timeout. Reads block for the life of the connection.
    pub io_timeout: Option<Duration>,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Buffered error events per subscriber
    pub error_channel_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            password: None,
            max_unsent: usize::MAX,
            sync_timeout: Duration::from_secs(10),
            io_timeout: None,
            connect_timeout: Duration::from_secs(5),
            error_channel_capacity: 64,
        }
    }
}

impl ConnectionConfig {
    /// Default settings for `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_max_unsent(mut self, max_unsent: usize) -> Self {
        self.max_unsent = max_unsent;
        self
    }

    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_error_channel_capacity(mut self, capacity: usize) -> Self {
        self.error_channel_capacity = capacity.max(1);
        self
    }

    /// `host:port`, for logging and connecting.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
