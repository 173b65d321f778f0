// Command-line parsing for the `relay` and `chat` binaries.
//
// getopt-style short options only, matched by hand over `std::env::args()`
// (no clap dependency):
//   -h <host>   bind host (relay) / server host (chat)
//   -p <port>   TCP port
//   -c          print connect/disconnect notices (relay; accepted and
//               ignored by chat)
//   -f <path>   JSON config file (relay only; chat reports it as a
//               problem)
//   -v          debug logging
//
// Values may be attached (`-p50497`) or separate (`-p 50497`), and flags may
// be grouped (`-cv`). Anything unrecognized, a missing value, or a bad port
// number is collected in `CliOptions::problems`; the binaries print the
// usage text for those and carry on with the defaults.

use std::path::PathBuf;

use crate::config::RelayConfig;

pub const RELAY_USAGE: &str = "\
usage: relay [-h name] [-p prt #] [-c] [-f config.json] [-v]
\t -h: host name to bind to
\t -p #: the port to listen on for client connections
\t -c: print the address of each client that connects or disconnects
\t -f: JSON config file (flags override it)
\t -v: verbose logging on stderr";

pub const CHAT_USAGE: &str = "\
usage: chat [-h name] [-p prt #] [-v]
\t -h: host name to connect to
\t -p #: the port to use when connecting to the server
\t -c: accepted for symmetry with the relay, ignored
\t -v: verbose logging on stderr";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CliOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub report_addresses: bool,
    pub config_path: Option<PathBuf>,
    pub verbose: bool,
    /// Arguments that could not be used. Non-fatal.
    pub problems: Vec<String>,
}

impl CliOptions {
    /// Overlay the command-line values on `config`.
    pub fn apply(&self, config: &mut RelayConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.report_addresses {
            config.report_addresses = true;
        }
    }
}

/// Parse arguments (without the program name).
pub fn parse_args<I>(args: I) -> CliOptions
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    let mut options = CliOptions::default();
    let mut args = args.into_iter().map(Into::into);

    while let Some(arg) = args.next() {
        if !arg.starts_with('-') || arg.len() == 1 {
            // Positional arguments mean nothing to either program.
            options.problems.push(arg);
            continue;
        }
        let flags = &arg[1..];

        for (i, flag) in flags.char_indices() {
            match flag {
                'c' => options.report_addresses = true,
                'v' => options.verbose = true,
                'h' | 'p' | 'f' => {
                    // The value is the rest of this argument, or the next one.
                    let attached = &flags[i + flag.len_utf8()..];
                    let value = if attached.is_empty() {
                        args.next()
                    } else {
                        Some(attached.to_string())
                    };
                    match value {
                        Some(value) => set_value(&mut options, flag, value),
                        None => options.problems.push(format!("-{flag} needs a value")),
                    }
                    break;
                }
                other => options.problems.push(format!("-{other}")),
            }
        }
    }

    options
}

/// Parse `chat` arguments. `chat` has no config file, so `-f` (with its
/// value) is reported as a problem instead of being kept.
pub fn parse_chat_args<I>(args: I) -> CliOptions
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    let mut options = parse_args(args);
    if let Some(path) = options.config_path.take() {
        options
            .problems
            .push(format!("-f {}: chat takes no config file", path.display()));
    }
    options
}

fn set_value(options: &mut CliOptions, flag: char, value: String) {
    match flag {
        'h' => options.host = Some(value),
        'p' => match value.parse() {
            Ok(port) => options.port = Some(port),
            Err(_) => options.problems.push(format!("-p {value}: not a port number")),
        },
        'f' => options.config_path = Some(PathBuf::from(value)),
        _ => unreachable!("only value-taking flags reach set_value"),
    }
}
