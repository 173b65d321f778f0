// TCP client for the chat relay.
//
// Two entry points:
// - `ChatClient`: a programmatic client. `connect()` opens the socket and
//   spawns a background reader thread that pushes every received chunk into
//   an `mpsc` inbox; `poll()` drains the inbox without blocking. The calling
//   thread keeps the write half and sends synchronously (chat messages are
//   small).
// - `run_terminal()`: the `chat` program. Keyboard input goes to the relay,
//   relay output is printed with the "msg: " prefix. Keyboard end-of-stream
//   half-closes the socket; the relay then drops this client, and the loop
//   ends when the relay closes the connection.
//
// There is no framing: chunk boundaries on the receiving side are whatever
// the relay's reads produced and TCP delivered.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use crate::config::{DEFAULT_READ_BUFFER_SIZE, resolve};
use crate::console::{display, finish_pump, spawn_input_pump};
use crate::error::{RelayError, Result};

pub struct ChatClient {
    writer: TcpStream,
    inbox: Receiver<Vec<u8>>,
    closed: Arc<AtomicBool>,
    _reader_thread: Option<JoinHandle<()>>,
}

impl ChatClient {
    pub fn connect(addr: SocketAddr) -> Result<Self> {
        let stream =
            TcpStream::connect(addr).map_err(|source| RelayError::Connect { addr, source })?;
        let reader = stream.try_clone()?;

        let (tx, rx) = mpsc::channel();
        let closed = Arc::new(AtomicBool::new(false));
        let closed_reader = Arc::clone(&closed);
        let reader_thread = thread::Builder::new()
            .name("chat-reader".into())
            .spawn(move || reader_loop(reader, tx, closed_reader))?;

        Ok(Self {
            writer: stream,
            inbox: rx,
            closed,
            _reader_thread: Some(reader_thread),
        })
    }

    /// Resolve `host` the same way the relay does and connect.
    pub fn connect_host(host: &str, port: u16) -> Result<Self> {
        Self::connect(resolve(host, port)?)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.writer.local_addr()?)
    }

    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        Ok(())
    }

    /// Half-close: the relay sees end-of-stream, but relay output can still
    /// arrive until the relay closes its side.
    pub fn hang_up(&self) {
        let _ = self.writer.shutdown(Shutdown::Write);
    }

    /// Drain all received chunks (non-blocking).
    pub fn poll(&self) -> Vec<Vec<u8>> {
        self.inbox.try_iter().collect()
    }

    /// True once the relay has closed the connection. Chunks received before
    /// that may still be waiting in `poll()`.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Reader thread: push received chunks to the inbox until the relay closes
/// the connection.
fn reader_loop(mut stream: TcpStream, tx: Sender<Vec<u8>>, closed: Arc<AtomicBool>) {
    let mut buf = vec![0u8; DEFAULT_READ_BUFFER_SIZE];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break; // Client dropped the receiver
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    closed.store(true, Ordering::SeqCst);
}

/// Write half handed to the keyboard pump. Dropping it half-closes the
/// socket, which is how keyboard end-of-stream reaches the relay.
struct SocketSink(TcpStream);

impl Drop for SocketSink {
    fn drop(&mut self) {
        let _ = self.0.shutdown(Shutdown::Write);
    }
}

/// The `chat` program loop.
pub fn run_terminal<R, W>(addr: SocketAddr, input: R, mut output: W) -> Result<()>
where
    R: Read + Send + 'static,
    W: Write,
{
    let mut stream =
        TcpStream::connect(addr).map_err(|source| RelayError::Connect { addr, source })?;
    writeln!(output, "connected to server\n")?;
    output.flush()?;

    let sink = SocketSink(stream.try_clone()?);
    let pump = spawn_input_pump(input, move |bytes| (&sink.0).write_all(bytes))?;

    let mut buf = vec![0u8; DEFAULT_READ_BUFFER_SIZE];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => display(&mut output, &buf[..n]).map_err(RelayError::Display)?,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(RelayError::Display(e)),
        }
    }
    finish_pump(pump)
}
