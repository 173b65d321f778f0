// Relay configuration.
//
// `RelayConfig` carries every tunable the relay loop reads: bind address,
// slot capacity, poll cadence, read chunk size, per-client outbound
// buffering, and the two behavior switches (connect/disconnect notices and read-error isolation). Defaults
// match the chat program's historical constants, so an empty JSON object or
// no config file at all yields the classic relay on localhost:50497.
//
// Layering: defaults < JSON file (`-f`) < command-line flags. The CLI layer
// lives in `cli.rs`; this module only knows about defaults and JSON.
//
// `resolve()` is shared by the relay (bind) and the `chat` client (connect)
// so both sides pick the same address for a host name.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 50497;
pub const DEFAULT_CAPACITY: usize = 10;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 100;
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_OUTBOUND_QUEUE_DEPTH: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Host name or address to bind the listening socket to.
    pub host: String,
    /// TCP port; 0 lets the OS pick one.
    pub port: u16,
    /// Total slots, including slot 0 for the monitor.
    pub capacity: usize,
    /// Print connect/disconnect notices with the peer address.
    pub report_addresses: bool,
    /// Upper bound on one multiplexer wait.
    pub poll_timeout_ms: u64,
    /// Largest chunk read from one endpoint and relayed as one unit.
    pub read_buffer_size: usize,
    /// Upper bound on one blocked write by a client's writer thread. A
    /// closed client whose writer is stuck is abandoned after this long.
    pub write_timeout_ms: u64,
    /// Chunks that may wait for one client's socket. Further chunks for that
    /// client are dropped until it catches up.
    pub outbound_queue_depth: usize,
    /// Treat a client read error as a disconnect of that client instead of
    /// terminating the relay.
    pub isolate_read_errors: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            capacity: DEFAULT_CAPACITY,
            report_addresses: false,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            outbound_queue_depth: DEFAULT_OUTBOUND_QUEUE_DEPTH,
            isolate_read_errors: false,
        }
    }
}

impl RelayConfig {
    /// Parse a config from a JSON string. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RelayConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|source| RelayError::ConfigFile {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity < 2 {
            return Err(RelayError::Config(format!(
                "capacity must be at least 2 (monitor + one client), got {}",
                self.capacity
            )));
        }
        if self.read_buffer_size == 0 {
            return Err(RelayError::Config("read_buffer_size must be non-zero".into()));
        }
        if self.poll_timeout_ms == 0 {
            return Err(RelayError::Config("poll_timeout_ms must be non-zero".into()));
        }
        if self.write_timeout_ms == 0 {
            return Err(RelayError::Config("write_timeout_ms must be non-zero".into()));
        }
        if self.outbound_queue_depth == 0 {
            return Err(RelayError::Config("outbound_queue_depth must be non-zero".into()));
        }
        Ok(())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Resolve `host:port`, preferring the first IPv4 address.
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|source| RelayError::Resolve {
            host: host.into(),
            source,
        })?
        .collect();
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| RelayError::NoAddress(host.into()))
}
