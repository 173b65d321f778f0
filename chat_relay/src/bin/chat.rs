// Terminal client for the chat relay.
//
// Connects to the relay, then copies keyboard input to it and prints every
// relayed message with a "msg: " prefix. End-of-file on the keyboard
// (Ctrl+D) leaves the chat; the program exits once the relay closes the
// connection.
//
// Usage:
//   chat [-h host] [-p port] [-v]

use tracing::error;

use chat_relay::cli::{self, CHAT_USAGE};
use chat_relay::client::run_terminal;
use chat_relay::config::{DEFAULT_HOST, DEFAULT_PORT, resolve};
use chat_relay::logging::init_logging;
use chat_relay::{RelayError, Result};

fn main() {
    let options = cli::parse_chat_args(std::env::args().skip(1));
    if !options.problems.is_empty() {
        println!("{CHAT_USAGE}");
    }
    init_logging(options.verbose);

    let host = options.host.as_deref().unwrap_or(DEFAULT_HOST);
    let port = options.port.unwrap_or(DEFAULT_PORT);
    if let Err(e) = run(host, port) {
        fail(e);
    }
    println!("hanging up now");
}

fn run(host: &str, port: u16) -> Result<()> {
    let addr = resolve(host, port)?;
    run_terminal(addr, std::io::stdin(), std::io::stdout())
}

fn fail(e: RelayError) -> ! {
    error!("{e}");
    std::process::exit(e.exit_code());
}
