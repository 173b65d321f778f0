// Duplex message channel between the relay and the local operator.
//
// `MonitorLink::pair()` creates two symmetric ends, one for the relay (slot 0)
// and one for the operator console. Each end can `send` byte chunks to the
// other and `receive` chunks from it; dropping an end, or its sender half, is
// end-of-stream for the peer. Internally each direction is a
// `std::sync::mpsc` channel, so the two sides can run on separate threads
// with no shared state.
//
// The relay splits its end: the `LinkSender` half lives in slot 0 as the
// monitor's endpoint, and the `LinkReceiver` half is handed to a reader
// thread, where it behaves like a socket through `ChunkSource` (it yields at
// most one buffer's worth per read and keeps the remainder for the next one).

use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

use crate::endpoint::ChunkSource;

/// One receive result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Received {
    Bytes(Vec<u8>),
    EndOfStream,
}

/// One end of a duplex monitor channel.
pub struct MonitorLink {
    sender: LinkSender,
    receiver: LinkReceiver,
}

impl MonitorLink {
    /// Create two connected ends. Bytes sent on one are received on the other.
    pub fn pair() -> (MonitorLink, MonitorLink) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        (
            MonitorLink {
                sender: LinkSender { tx: a_tx },
                receiver: LinkReceiver::new(a_rx),
            },
            MonitorLink {
                sender: LinkSender { tx: b_tx },
                receiver: LinkReceiver::new(b_rx),
            },
        )
    }

    pub fn send(&self, bytes: &[u8]) -> io::Result<()> {
        self.sender.send(bytes)
    }

    /// Block until the peer sends something or goes away.
    pub fn receive(&mut self) -> Received {
        self.receiver.receive()
    }

    /// Non-blocking receive. `None` means nothing is queued yet.
    pub fn try_receive(&mut self) -> Option<Received> {
        self.receiver.try_receive()
    }

    pub fn receive_timeout(&mut self, timeout: Duration) -> Option<Received> {
        self.receiver.receive_timeout(timeout)
    }

    pub fn split(self) -> (LinkSender, LinkReceiver) {
        (self.sender, self.receiver)
    }
}

/// Sending half of a `MonitorLink`.
pub struct LinkSender {
    tx: Sender<Vec<u8>>,
}

impl LinkSender {
    /// Queue `bytes` for the peer. Fails with `BrokenPipe` once the peer's
    /// receiving half is gone.
    pub fn send(&self, bytes: &[u8]) -> io::Result<()> {
        self.tx
            .send(bytes.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "monitor link closed"))
    }
}

/// Receiving half of a `MonitorLink`.
pub struct LinkReceiver {
    rx: Receiver<Vec<u8>>,
    /// Tail of a message larger than the last `read_chunk` buffer.
    pending: Vec<u8>,
}

impl LinkReceiver {
    fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            pending: Vec::new(),
        }
    }

    fn take_pending(&mut self) -> Option<Received> {
        if self.pending.is_empty() {
            None
        } else {
            Some(Received::Bytes(std::mem::take(&mut self.pending)))
        }
    }

    pub fn receive(&mut self) -> Received {
        if let Some(bytes) = self.take_pending() {
            return bytes;
        }
        match self.rx.recv() {
            Ok(bytes) => Received::Bytes(bytes),
            Err(_) => Received::EndOfStream,
        }
    }

    pub fn try_receive(&mut self) -> Option<Received> {
        if let Some(bytes) = self.take_pending() {
            return Some(bytes);
        }
        match self.rx.try_recv() {
            Ok(bytes) => Some(Received::Bytes(bytes)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Received::EndOfStream),
        }
    }

    pub fn receive_timeout(&mut self, timeout: Duration) -> Option<Received> {
        if let Some(bytes) = self.take_pending() {
            return Some(bytes);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(bytes) => Some(Received::Bytes(bytes)),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Received::EndOfStream),
        }
    }
}

impl ChunkSource for LinkReceiver {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        // Empty sends carry nothing to relay; skip them rather than report
        // a zero-length read, which would look like end-of-stream.
        while self.pending.is_empty() {
            match self.rx.recv() {
                Ok(bytes) => self.pending = bytes,
                Err(_) => return Ok(0),
            }
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}
