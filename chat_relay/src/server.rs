// Relay context and main loop.
//
// `RelayContext` owns everything the relay mutates: the slot table, the
// acceptor, the multiplexer, and the broadcast step. Each `run_cycle()` is
// one pass of the classic loop:
//
//   try_accept  ->  poll (bounded wait)  ->  process ready slots
//
// and `run()` repeats it until the monitor reaches end-of-stream, at which
// point every remaining slot is closed and the state becomes `Stopped`.
//
// Threads: the context runs on one thread and is the only writer to the slot
// table. The other relay threads are the multiplexer's reader threads, which
// just forward read results, and one writer thread per client, which drains
// that client's outbound queue.
//
// `start_relay()` runs a context on a background thread and returns a
// `RelayHandle`, which is how tests and embedding code drive the relay;
// `RelayHandle::spawn()` does the same for a context the caller has already
// customized (for example with `set_notice_output`). The `relay` binary
// calls `RelayContext::run()` directly on the main thread.

use std::io::Write;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;

use serde::Serialize;
use tracing::{debug, info};

use crate::acceptor::{AcceptOutcome, ConnectionAcceptor};
use crate::broadcast::{BroadcastRelay, Disposition};
use crate::config::{RelayConfig, resolve};
use crate::endpoint::Endpoint;
use crate::error::{RelayError, Result};
use crate::monitor::MonitorLink;
use crate::multiplexer::{EVENTS_PER_SLOT, EventMultiplexer};
use crate::notice::Notice;
use crate::slots::{SlotIndex, SlotTable};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayState {
    Running,
    /// Monitor end-of-stream observed; remaining slots are being closed.
    ShuttingDown,
    Stopped,
}

/// Counters shared between the relay loop and whoever holds its handle.
#[derive(Debug, Default)]
pub struct RelayStats {
    clients: AtomicUsize,
    accepted: AtomicU64,
    rejected: AtomicU64,
    relayed: AtomicU64,
    disconnected: AtomicU64,
}

/// Point-in-time copy of `RelayStats`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub clients: usize,
    pub accepted: u64,
    pub rejected: u64,
    pub relayed: u64,
    pub disconnected: u64,
}

impl RelayStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            clients: self.clients.load(Ordering::SeqCst),
            accepted: self.accepted.load(Ordering::SeqCst),
            rejected: self.rejected.load(Ordering::SeqCst),
            relayed: self.relayed.load(Ordering::SeqCst),
            disconnected: self.disconnected.load(Ordering::SeqCst),
        }
    }

    /// Number of currently connected clients.
    pub fn clients(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }
}

pub struct RelayContext {
    config: RelayConfig,
    table: SlotTable<Endpoint>,
    acceptor: ConnectionAcceptor,
    mux: EventMultiplexer,
    relay: BroadcastRelay,
    state: RelayState,
    stats: Arc<RelayStats>,
    notice_output: Box<dyn Write + Send>,
}

impl RelayContext {
    /// Resolve and bind `config.host:config.port`, then build the context.
    pub fn bind(config: RelayConfig, monitor: MonitorLink) -> Result<Self> {
        config.validate()?;
        let addr = resolve(&config.host, config.port)?;
        let listener = TcpListener::bind(addr).map_err(|source| RelayError::Bind { addr, source })?;
        Self::new(config, listener, monitor)
    }

    /// Build a context around an already-bound listener. `monitor` is the
    /// relay's end of the monitor link; it occupies slot 0.
    pub fn new(config: RelayConfig, listener: TcpListener, monitor: MonitorLink) -> Result<Self> {
        config.validate()?;
        let acceptor = ConnectionAcceptor::new(
            listener,
            config.report_addresses,
            config.outbound_queue_depth,
            config.write_timeout(),
        )?;
        let mux = EventMultiplexer::new(
            config.read_buffer_size,
            config.capacity * EVENTS_PER_SLOT,
        );

        let (monitor_tx, monitor_rx) = monitor.split();
        let table = SlotTable::new(config.capacity, Endpoint::Monitor(monitor_tx));
        let monitor_token = table
            .token(SlotIndex::MONITOR)
            .ok_or_else(|| RelayError::Multiplex("monitor slot is empty".into()))?;
        mux.watch(SlotIndex::MONITOR, monitor_token, monitor_rx)?;

        Ok(Self {
            relay: BroadcastRelay::new(config.isolate_read_errors),
            config,
            table,
            acceptor,
            mux,
            state: RelayState::Running,
            stats: Arc::new(RelayStats::default()),
            notice_output: Box::new(std::io::stdout()),
        })
    }

    /// Send connect/disconnect notices to `output` instead of stdout.
    pub fn set_notice_output<W: Write + Send + 'static>(&mut self, output: W) {
        self.notice_output = Box::new(output);
    }

    fn emit(&mut self, notice: &Notice) {
        if let Err(e) = notice.write_to(&mut self.notice_output) {
            debug!(error = %e, "cannot write notice");
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.acceptor.local_addr()
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    /// One accept -> poll -> process pass. Returns the state afterwards.
    pub fn run_cycle(&mut self) -> Result<RelayState> {
        if self.state != RelayState::Running {
            return Ok(self.state);
        }

        match self.acceptor.try_accept(&mut self.table, &self.mux)? {
            AcceptOutcome::Connected { addr, .. } => {
                self.stats.accepted.fetch_add(1, Ordering::SeqCst);
                if self.config.report_addresses {
                    self.emit(&Notice::Connected(addr));
                }
            }
            AcceptOutcome::Rejected { .. } => {
                self.stats.rejected.fetch_add(1, Ordering::SeqCst);
            }
            AcceptOutcome::WouldBlock => {}
        }

        let ready = self.mux.poll(&self.table, self.config.poll_timeout())?;
        if !ready.is_empty() {
            let outcome = self.relay.process(&mut self.table, ready)?;
            self.stats
                .relayed
                .fetch_add(outcome.relayed as u64, Ordering::SeqCst);
            self.stats
                .disconnected
                .fetch_add(outcome.disconnected as u64, Ordering::SeqCst);
            for notice in &outcome.notices {
                self.emit(notice);
            }
            if outcome.disposition == Disposition::Shutdown {
                self.shutdown();
            }
        }

        self.stats
            .clients
            .store(self.table.client_count(), Ordering::SeqCst);
        Ok(self.state)
    }

    /// Run cycles until the monitor hangs up.
    pub fn run(mut self) -> Result<()> {
        info!(
            addr = %self.local_addr()?,
            capacity = self.config.capacity,
            "relay running"
        );
        while self.run_cycle()? != RelayState::Stopped {}
        Ok(())
    }

    fn shutdown(&mut self) {
        self.state = RelayState::ShuttingDown;
        debug!(clients = self.table.client_count(), "shutting down");
        for notice in self.relay.shutdown(&mut self.table) {
            self.emit(&notice);
        }
        self.state = RelayState::Stopped;
        info!("relay stopped");
    }
}

/// Handle to a relay running on a background thread.
pub struct RelayHandle {
    stats: Arc<RelayStats>,
    thread: thread::JoinHandle<Result<()>>,
}

impl RelayHandle {
    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Run `context` on a background thread.
    pub fn spawn(context: RelayContext) -> Result<(RelayHandle, SocketAddr)> {
        let addr = context.local_addr()?;
        let stats = context.stats();
        let thread = thread::Builder::new()
            .name("relay".into())
            .spawn(move || context.run())?;
        Ok((RelayHandle { stats, thread }, addr))
    }

    /// Wait for the relay to stop. It stops only when the monitor link
    /// reaches end-of-stream (or on a fatal error).
    pub fn join(self) -> Result<()> {
        self.thread
            .join()
            .map_err(|_| RelayError::Multiplex("relay thread panicked".into()))?
    }
}

/// Start the relay on a background thread. Returns a handle and the actual
/// bound address (useful when port 0 is used to let the OS pick a free port).
pub fn start_relay(config: RelayConfig, monitor: MonitorLink) -> Result<(RelayHandle, SocketAddr)> {
    RelayHandle::spawn(RelayContext::bind(config, monitor)?)
}
