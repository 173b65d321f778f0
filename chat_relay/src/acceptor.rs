// Non-blocking client admission.
//
// `ConnectionAcceptor::try_accept` is called once per relay cycle. It never
// blocks: with no pending connection it reports `WouldBlock` and changes
// nothing. A new connection goes into the lowest free client slot and gets a
// reader thread plus a writer thread with a bounded outbound queue; if the
// table is full, the connection is sent the fixed rejection text and closed
// without ever touching the table. The rejection write is non-blocking: a
// fresh socket always has room for it, and if not, the text is lost.
//
// Any accept failure other than would-block (or an interrupted call, which
// is simply retried next cycle) is returned as `RelayError::Accept` and
// terminates the relay.

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use tracing::{debug, warn};

use crate::endpoint::{ClientWriter, Endpoint};
use crate::error::{RelayError, Result};
use crate::multiplexer::EventMultiplexer;
use crate::slots::{SlotIndex, SlotTable};

/// Sent to a connection that arrives while every client slot is taken.
pub const REJECTION_MESSAGE: &[u8] = b"Too many clients, try again later.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcceptOutcome {
    Connected { slot: SlotIndex, addr: SocketAddr },
    Rejected { addr: SocketAddr },
    WouldBlock,
}

pub struct ConnectionAcceptor {
    listener: TcpListener,
    record_addresses: bool,
    queue_depth: usize,
    write_timeout: Duration,
}

impl ConnectionAcceptor {
    /// Wrap a bound listener, switching it to non-blocking accepts.
    pub fn new(
        listener: TcpListener,
        record_addresses: bool,
        queue_depth: usize,
        write_timeout: Duration,
    ) -> Result<Self> {
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            record_addresses,
            queue_depth,
            write_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn try_accept(
        &self,
        table: &mut SlotTable<Endpoint>,
        mux: &EventMultiplexer,
    ) -> Result<AcceptOutcome> {
        let (stream, addr) = match self.listener.accept() {
            Ok(pair) => pair,
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                return Ok(AcceptOutcome::WouldBlock);
            }
            Err(e) => return Err(RelayError::Accept(e)),
        };

        let Some(slot) = table.find_free_slot() else {
            reject(stream, addr);
            return Ok(AcceptOutcome::Rejected { addr });
        };

        // Accepted sockets may inherit the listener's non-blocking flag. The
        // reader and writer threads both want blocking calls.
        stream.set_nonblocking(false).map_err(RelayError::Accept)?;
        let reader = stream.try_clone().map_err(RelayError::Accept)?;
        let writer = ClientWriter::spawn(stream, self.queue_depth, self.write_timeout)
            .map_err(RelayError::Accept)?;

        let label = self.record_addresses.then_some(addr);
        let token = table.occupy(slot, Endpoint::Client(writer), label)?;
        mux.watch(slot, token, reader)?;
        debug!(%slot, %addr, "client connected");
        Ok(AcceptOutcome::Connected { slot, addr })
    }
}

/// Tell a surplus client to go away, then close it.
fn reject(mut stream: TcpStream, addr: SocketAddr) {
    warn!(%addr, "slot table full, rejecting client");
    // Best effort: the client may already be gone.
    let _ = stream.set_nonblocking(true);
    let _ = stream.write_all(REJECTION_MESSAGE);
    let _ = stream.shutdown(Shutdown::Both);
}
