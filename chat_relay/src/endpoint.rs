// Byte-stream endpoints occupying relay slots.
//
// An endpoint is split in two. The write half (`Endpoint`) lives in the slot
// table and is only touched by the relay's main loop: `deliver` hands a
// broadcast chunk to it and `close` tears it down. The read half is a
// `ChunkSource` owned by that endpoint's reader thread in `multiplexer.rs`.
//
// Neither half may block the main loop. For a client, `deliver` only queues
// the chunk for the client's writer thread (`ClientWriter`); the queue is
// bounded, and a chunk that does not fit is dropped for that recipient alone.
// The writer thread always writes a chunk whole or gives up on the
// connection, so a recipient never sees part of a chunk followed by the next
// one. For the monitor, `deliver` is a send on the in-process link.
//
// Closing a client lets its writer thread flush what is already queued, then
// shut the socket down in both directions, which also wakes the blocked
// reader thread with end-of-stream. A writer stuck on a peer that stopped
// reading notices the close within one write timeout and gives up.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::monitor::LinkSender;

/// Read half of an endpoint, driven by a reader thread.
pub trait ChunkSource: Send + 'static {
    /// Block until some bytes are available and copy at most `buf.len()` of
    /// them into `buf`. `Ok(0)` means end-of-stream.
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl ChunkSource for TcpStream {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }
}

/// Write half of an endpoint, stored in the slot table.
pub enum Endpoint {
    Monitor(LinkSender),
    Client(ClientWriter),
}

impl Endpoint {
    /// Hand one broadcast chunk to the endpoint without blocking. An error
    /// means this recipient did not get the chunk.
    pub fn deliver(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            Endpoint::Monitor(link) => link.send(bytes),
            Endpoint::Client(writer) => writer.enqueue(bytes),
        }
    }

    /// Close the endpoint. The peer observes end-of-stream after any chunks
    /// already delivered.
    pub fn close(self) {
        match self {
            Endpoint::Monitor(link) => drop(link),
            Endpoint::Client(writer) => writer.close(),
        }
    }

    pub fn is_monitor(&self) -> bool {
        matches!(self, Endpoint::Monitor(_))
    }
}

/// Bounded outbound queue to one client socket, drained by its own thread.
pub struct ClientWriter {
    queue: SyncSender<Vec<u8>>,
    closing: Arc<AtomicBool>,
}

impl ClientWriter {
    /// Start the writer thread for `stream`. At most `queue_depth` chunks
    /// wait for the socket; `retry_interval` bounds each blocked write so the
    /// thread can notice a close.
    pub fn spawn(
        stream: TcpStream,
        queue_depth: usize,
        retry_interval: Duration,
    ) -> io::Result<Self> {
        stream.set_write_timeout(Some(retry_interval))?;
        let (queue, rx) = mpsc::sync_channel(queue_depth);
        let closing = Arc::new(AtomicBool::new(false));
        let closing_writer = Arc::clone(&closing);
        thread::Builder::new()
            .name("relay-writer".into())
            .spawn(move || writer_loop(stream, rx, closing_writer))?;
        Ok(Self { queue, closing })
    }

    fn enqueue(&self, bytes: &[u8]) -> io::Result<()> {
        match self.queue.try_send(bytes.to_vec()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "outbound queue full, chunk dropped",
            )),
            Err(TrySendError::Disconnected(_)) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "client writer has stopped",
            )),
        }
    }

    fn close(self) {
        self.closing.store(true, Ordering::SeqCst);
        // Dropping `queue` ends the writer's receive loop once it is drained.
    }
}

/// Writer thread body: write queued chunks in order until the queue closes
/// or the connection fails, then shut the socket down.
fn writer_loop(mut stream: TcpStream, rx: Receiver<Vec<u8>>, closing: Arc<AtomicBool>) {
    for chunk in rx.iter() {
        if let Err(e) = write_chunk(&mut stream, &chunk, &closing) {
            debug!(error = %e, "client writer giving up");
            break;
        }
    }
    // Fails harmlessly if the peer already reset the connection.
    let _ = stream.shutdown(Shutdown::Both);
}

/// Write all of `chunk`. A timed-out write retries the rest of the same
/// chunk, unless the endpoint has been closed meanwhile.
fn write_chunk(stream: &mut TcpStream, chunk: &[u8], closing: &AtomicBool) -> io::Result<()> {
    let mut written = 0;
    while written < chunk.len() {
        match stream.write(&chunk[written..]) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => written += n,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                if closing.load(Ordering::SeqCst) {
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
