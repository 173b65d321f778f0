// CLI entry point for the chat relay.
//
// Binds the listening socket, starts the operator console on its own thread
// (stdin/stdout, connected through a `MonitorLink`), and runs the relay loop
// on the main thread. Typing end-of-file (Ctrl+D) at the console shuts the
// relay down: every client is disconnected and the process exits 0.
//
// Usage:
//   relay [-h host] [-p port] [-c] [-f config.json] [-v]
//
// Fatal errors are logged and the process exits with the stage-specific code
// from `RelayError::exit_code`.

use std::thread;

use tracing::{error, info};

use chat_relay::cli::{self, CliOptions, RELAY_USAGE};
use chat_relay::console::run_console;
use chat_relay::logging::init_logging;
use chat_relay::{MonitorLink, RelayConfig, RelayContext, RelayError, Result};

fn main() {
    let options = cli::parse_args(std::env::args().skip(1));
    if !options.problems.is_empty() {
        println!("{RELAY_USAGE}");
    }
    init_logging(options.verbose);

    if let Err(e) = run(&options) {
        fail(e);
    }
    println!("hanging up now");
}

fn run(options: &CliOptions) -> Result<()> {
    let config = build_config(options)?;
    let (relay_end, operator_end) = MonitorLink::pair();
    let relay = RelayContext::bind(config, relay_end)?;
    let stats = relay.stats();

    let console = thread::Builder::new()
        .name("monitor".into())
        .spawn(move || run_console(operator_end, std::io::stdin(), std::io::stdout()))?;

    relay.run()?;

    let snapshot = stats.snapshot();
    info!(
        accepted = snapshot.accepted,
        rejected = snapshot.rejected,
        relayed = snapshot.relayed,
        "session totals"
    );

    console
        .join()
        .map_err(|_| RelayError::Io(std::io::Error::other("monitor console panicked")))?
}

/// Defaults, then the `-f` file, then command-line flags.
fn build_config(options: &CliOptions) -> Result<RelayConfig> {
    let mut config = match &options.config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            RelayConfig::load(path)?
        }
        None => RelayConfig::default(),
    };
    options.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn fail(e: RelayError) -> ! {
    error!("{e}");
    std::process::exit(e.exit_code());
}
