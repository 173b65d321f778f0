// Operator-facing connect/disconnect notices.
//
// These are part of the relay's user interface, not diagnostics: with address
// reporting on (`-c`), the relay writes them to its notice output (stdout
// unless replaced) in the same wording the chat server has always used.
// Diagnostics go through `tracing` instead.

use std::fmt;
use std::io::{self, Write};
use std::net::SocketAddr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notice {
    Connected(SocketAddr),
    Disconnected(SocketAddr),
    /// The client was still connected when the monitor shut the relay down.
    DisconnectedByServer(SocketAddr),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Connected(addr) => write!(f, "client has connected from {addr}"),
            Notice::Disconnected(addr) => {
                write!(f, "client at address {addr} has disconnected")
            }
            Notice::DisconnectedByServer(addr) => {
                write!(f, "client at address {addr} has been disconnected by the server")
            }
        }
    }
}

impl Notice {
    /// Write the notice as one line and flush.
    pub fn write_to(&self, output: &mut dyn Write) -> io::Result<()> {
        writeln!(output, "{self}")?;
        output.flush()
    }
}
