// Test harness for chat relay integration tests.
//
// Wraps the real `ChatClient` and the operator end of a real `MonitorLink`
// in synchronous, test-friendly helpers: `expect()` blocks until exactly the
// expected bytes have arrived (however TCP chunked them), `assert_silent()`
// checks that nothing arrives within a window. All relay and networking
// code is the production code path; the only test-specific code is the
// polling loops here.
//
// See also: `tests/full_pipeline.rs` for the scenarios.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chat_relay::client::ChatClient;
use chat_relay::monitor::{LinkReceiver, LinkSender};
use chat_relay::server::RelayStats;
use chat_relay::{MonitorLink, Received, RelayConfig, RelayContext, RelayHandle, start_relay};

/// Default timeout for blocking expectations.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep duration between poll attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How long `assert_silent` listens by default.
pub const SILENCE_WINDOW: Duration = Duration::from_millis(150);

/// Relay config for tests: loopback, OS-assigned port, fast poll cadence.
pub fn test_config(capacity: usize) -> RelayConfig {
    RelayConfig {
        host: "127.0.0.1".into(),
        port: 0,
        capacity,
        poll_timeout_ms: 20,
        ..RelayConfig::default()
    }
}

/// Start a relay on a background thread and return its handle, address,
/// and the operator side of its monitor link.
pub fn start_test_relay(config: RelayConfig) -> (RelayHandle, SocketAddr, TestMonitor) {
    let (relay_end, operator_end) = MonitorLink::pair();
    let (handle, addr) = start_relay(config, relay_end).expect("start_relay failed");
    (handle, addr, TestMonitor::new(operator_end))
}

/// Like `start_test_relay`, with the relay's connect/disconnect notices
/// captured in `notices` instead of printed.
pub fn start_test_relay_with_notices(
    config: RelayConfig,
    notices: NoticeLog,
) -> (RelayHandle, SocketAddr, TestMonitor) {
    let (relay_end, operator_end) = MonitorLink::pair();
    let mut context = RelayContext::bind(config, relay_end).expect("bind failed");
    context.set_notice_output(notices);
    let (handle, addr) = RelayHandle::spawn(context).expect("spawn failed");
    (handle, addr, TestMonitor::new(operator_end))
}

/// Shared in-memory notice output.
#[derive(Clone, Debug, Default)]
pub struct NoticeLog(Arc<Mutex<Vec<u8>>>);

impl NoticeLog {
    /// Every notice written so far, one per line.
    pub fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().expect("notice log poisoned");
        String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Write for NoticeLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .expect("notice log poisoned")
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Connect a plain socket (no reader thread) and wait until the relay has
/// registered it. Used for clients that misbehave on purpose.
pub fn join_raw(addr: SocketAddr, stats: &RelayStats) -> TcpStream {
    let before = stats.clients();
    let stream = TcpStream::connect(addr).expect("raw connect failed");
    stream
        .set_read_timeout(Some(POLL_TIMEOUT))
        .expect("set_read_timeout failed");
    wait_for_clients(stats, before + 1);
    stream
}

/// Block until the relay reports exactly `count` connected clients.
pub fn wait_for_clients(stats: &RelayStats, count: usize) {
    let start = Instant::now();
    while stats.clients() != count {
        assert!(
            start.elapsed() < POLL_TIMEOUT,
            "timed out waiting for {count} clients (have {})",
            stats.clients()
        );
        thread::sleep(POLL_INTERVAL);
    }
}

/// Block until `done` holds.
pub fn wait_until(what: &str, done: impl Fn() -> bool) {
    let start = Instant::now();
    while !done() {
        assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for {what}");
        thread::sleep(POLL_INTERVAL);
    }
}

/// A chat client with blocking expectations.
pub struct TestClient {
    client: ChatClient,
    received: Vec<u8>,
}

impl TestClient {
    pub fn connect(addr: SocketAddr) -> Self {
        let client = ChatClient::connect(addr).expect("TestClient::connect failed");
        Self {
            client,
            received: Vec::new(),
        }
    }

    /// Connect and wait until the relay has registered this client, given
    /// how many clients it had before.
    pub fn join(addr: SocketAddr, stats: &RelayStats) -> Self {
        let before = stats.clients();
        let client = Self::connect(addr);
        wait_for_clients(stats, before + 1);
        client
    }

    pub fn send(&mut self, bytes: &[u8]) {
        self.client.send(bytes).expect("send failed");
    }

    /// The address the relay sees this client connecting from.
    pub fn local_addr(&self) -> SocketAddr {
        self.client.local_addr().expect("local_addr failed")
    }

    fn drain(&mut self) {
        for chunk in self.client.poll() {
            self.received.extend(chunk);
        }
    }

    /// Block until `expected.len()` bytes have arrived; assert they match.
    pub fn expect(&mut self, expected: &[u8]) {
        let start = Instant::now();
        loop {
            self.drain();
            if self.received.len() >= expected.len() {
                break;
            }
            assert!(
                start.elapsed() < POLL_TIMEOUT,
                "timed out waiting for {:?}, got {:?}",
                String::from_utf8_lossy(expected),
                String::from_utf8_lossy(&self.received)
            );
            thread::sleep(POLL_INTERVAL);
        }
        let got: Vec<u8> = self.received.drain(..expected.len()).collect();
        assert_eq!(got, expected);
    }

    /// Block until what has arrived so far ends with `tail`, then discard
    /// it all. For streams where earlier chunks may have been dropped.
    pub fn expect_tail(&mut self, tail: &[u8], timeout: Duration) {
        let start = Instant::now();
        loop {
            self.drain();
            if self.received.ends_with(tail) {
                break;
            }
            assert!(
                start.elapsed() < timeout,
                "timed out waiting for {:?} ({} bytes received)",
                String::from_utf8_lossy(tail),
                self.received.len()
            );
            thread::sleep(POLL_INTERVAL);
        }
        self.received.clear();
    }

    /// Read and discard until nothing new arrives for `SILENCE_WINDOW`.
    pub fn discard_until_quiet(&mut self, timeout: Duration) {
        let start = Instant::now();
        loop {
            thread::sleep(SILENCE_WINDOW);
            let before = self.received.len();
            self.drain();
            if self.received.len() == before {
                break;
            }
            self.received.clear();
            assert!(
                start.elapsed() < timeout,
                "still receiving after {timeout:?}"
            );
        }
        self.received.clear();
    }

    /// Assert nothing arrives within `SILENCE_WINDOW`.
    pub fn assert_silent(&mut self) {
        thread::sleep(SILENCE_WINDOW);
        self.drain();
        assert!(
            self.received.is_empty(),
            "expected silence, got {:?}",
            String::from_utf8_lossy(&self.received)
        );
    }

    /// Half-close the connection (the relay sees end-of-stream).
    pub fn hang_up(&self) {
        self.client.hang_up();
    }

    /// Block until the relay closes the connection. Returns anything that
    /// arrived before the close and was not yet consumed.
    pub fn wait_until_closed(&mut self) -> Vec<u8> {
        let start = Instant::now();
        while !self.client.is_closed() {
            assert!(
                start.elapsed() < POLL_TIMEOUT,
                "timed out waiting for the relay to close the connection"
            );
            thread::sleep(POLL_INTERVAL);
        }
        self.drain();
        std::mem::take(&mut self.received)
    }
}

/// The operator side of the monitor link, with blocking expectations.
pub struct TestMonitor {
    sender: Option<LinkSender>,
    receiver: LinkReceiver,
    received: Vec<u8>,
    /// Sizes of the chunks received so far, in order.
    pub chunk_sizes: Vec<usize>,
    closed: bool,
}

impl TestMonitor {
    pub fn new(link: MonitorLink) -> Self {
        let (sender, receiver) = link.split();
        Self {
            sender: Some(sender),
            receiver,
            received: Vec::new(),
            chunk_sizes: Vec::new(),
            closed: false,
        }
    }

    pub fn send(&self, bytes: &[u8]) {
        self.sender
            .as_ref()
            .expect("monitor already hung up")
            .send(bytes)
            .expect("relay end of the monitor link is gone");
    }

    /// Take one receive result if one shows up within `POLL_INTERVAL`.
    fn pull(&mut self) {
        if self.closed {
            return;
        }
        match self.receiver.receive_timeout(POLL_INTERVAL) {
            Some(Received::Bytes(bytes)) => {
                self.chunk_sizes.push(bytes.len());
                self.received.extend(bytes);
            }
            Some(Received::EndOfStream) => self.closed = true,
            None => {}
        }
    }

    /// Block until `expected.len()` bytes have arrived; assert they match.
    pub fn expect(&mut self, expected: &[u8]) {
        let start = Instant::now();
        while self.received.len() < expected.len() {
            assert!(
                start.elapsed() < POLL_TIMEOUT && !self.closed,
                "monitor waited for {:?}, got {:?}",
                String::from_utf8_lossy(expected),
                String::from_utf8_lossy(&self.received)
            );
            self.pull();
        }
        let got: Vec<u8> = self.received.drain(..expected.len()).collect();
        assert_eq!(got, expected);
    }

    /// Assert nothing arrives within `SILENCE_WINDOW`.
    pub fn assert_silent(&mut self) {
        let start = Instant::now();
        while start.elapsed() < SILENCE_WINDOW {
            self.pull();
        }
        assert!(
            self.received.is_empty(),
            "expected silence on the monitor, got {:?}",
            String::from_utf8_lossy(&self.received)
        );
    }

    /// Stop sending: the relay's shutdown signal. Receiving continues.
    pub fn hang_up(&mut self) {
        self.sender = None;
    }

    /// Block until the relay closes its end of the link.
    pub fn wait_until_closed(&mut self) {
        let start = Instant::now();
        while !self.closed {
            assert!(
                start.elapsed() < POLL_TIMEOUT,
                "timed out waiting for the relay to close the monitor link"
            );
            self.pull();
        }
    }
}
