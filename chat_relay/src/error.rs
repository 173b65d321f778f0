// Error types for the chat relay.
//
// Every fatal failure site gets its own `RelayError` variant, and every
// variant maps to a small exit code via `exit_code()` so the binaries can
// report which stage failed. The codes follow the stage numbering the chat
// program has always used (setup failures low, loop failures high).
//
// Benign conditions (would-block on accept, an empty poll, peer end-of-stream,
// capacity rejection) are never errors; they are ordinary outcomes of the
// acceptor, multiplexer, and broadcast relay.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::slots::SlotIndex;

/// Contract violations detected by `SlotTable`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("{0} is reserved for the monitor")]
    Reserved(SlotIndex),

    #[error("{index} is out of range (capacity {capacity})")]
    OutOfRange { index: SlotIndex, capacity: usize },

    #[error("{0} is already occupied")]
    Occupied(SlotIndex),
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cannot read config file {path}: {source}")]
    ConfigFile { path: String, source: io::Error },

    #[error("cannot parse config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("cannot resolve host {host}: {source}")]
    Resolve { host: String, source: io::Error },

    #[error("no address found for host {0}")]
    NoAddress(String),

    #[error("bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("connect {addr}: {source}")]
    Connect { addr: SocketAddr, source: io::Error },

    #[error("accept: {0}")]
    Accept(io::Error),

    #[error("multiplexer: {0}")]
    Multiplex(String),

    #[error("read from {slot}: {source}")]
    Read { slot: SlotIndex, source: io::Error },

    #[error("slot table: {0}")]
    Slot(#[from] SlotError),

    #[error("display read: {0}")]
    Display(io::Error),

    #[error("keyboard read: {0}")]
    Keyboard(io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RelayError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            RelayError::Io(_) => 1,
            RelayError::Connect { .. } => 2,
            RelayError::Config(_) | RelayError::ConfigFile { .. } | RelayError::ConfigParse(_) => 4,
            RelayError::Resolve { .. } | RelayError::NoAddress(_) => 6,
            RelayError::Bind { .. } => 7,
            RelayError::Accept(_) => 8,
            RelayError::Multiplex(_) | RelayError::Slot(_) => 9,
            RelayError::Display(_) => 11,
            RelayError::Keyboard(_) => 12,
            RelayError::Read { .. } => 13,
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
