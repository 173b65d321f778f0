// chat_relay: a multiplexed chat relay with a local monitor console.
//
// The relay accepts TCP clients and one in-process operator ("monitor")
// link, and relays every chunk of bytes it reads from one participant to all
// the others. There is no framing and no protocol: a read of up to
// `read_buffer_size` bytes is one broadcast unit.
//
// Module overview:
// - `slots.rs`:       `SlotTable`, a fixed-capacity registry, slot 0 reserved
//                     for the monitor, first-fit assignment, no I/O.
// - `endpoint.rs`:    Write half of a slot occupant (`Endpoint`) and the read
//                     half trait (`ChunkSource`).
// - `monitor.rs`:     `MonitorLink`, the duplex in-process message channel
//                     between the relay and the operator console.
// - `acceptor.rs`:    Non-blocking accept into the slot table, with capacity
//                     rejection.
// - `multiplexer.rs`: Reader thread per slot funnelling read results into one
//                     bounded channel; bounded-timeout `poll`.
// - `broadcast.rs`:   Applies ready read results: fan-out, disconnect,
//                     shutdown.
// - `server.rs`:      `RelayContext` (the owned relay state and its loop),
//                     `start_relay` for running it on a background thread.
// - `console.rs`:     Keyboard/display copy loops; the operator console.
// - `client.rs`:      `ChatClient` and the `chat` terminal program loop.
// - `config.rs`, `cli.rs`, `error.rs`, `notice.rs`, `logging.rs`: ambient
//                     configuration, argument parsing, errors with exit codes,
//                     operator notices, and log setup.
//
// Threads: the relay loop is single-threaded and is the only mutator of the
// slot table. It never blocks on a socket: each client's writer thread owns
// the socket writes, fed from a bounded queue. Reader threads only read and
// forward. The operator console runs on its own thread(s) and talks to the
// relay exclusively through the `MonitorLink`.

pub mod acceptor;
pub mod broadcast;
pub mod cli;
pub mod client;
pub mod config;
pub mod console;
pub mod endpoint;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod multiplexer;
pub mod notice;
pub mod server;
pub mod slots;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use monitor::{MonitorLink, Received};
pub use server::{RelayContext, RelayHandle, RelayState, start_relay};
