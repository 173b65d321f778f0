// Diagnostic logging for the binaries.
//
// Logs go to stderr so they never interleave with chat text and notices on
// stdout. INFO by default, DEBUG with `-v`.

use tracing::Level;

pub fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
