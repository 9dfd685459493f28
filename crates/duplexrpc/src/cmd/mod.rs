use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod inspect;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the demo methods over stdio or a Unix socket.
    Serve(ServeArgs),
    /// Call one method on a serving peer and print the reply.
    Call(CallArgs),
    /// Decode a captured wire dump and print its envelopes.
    Inspect(InspectArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args),
        Command::Call(args) => call::run(args, format),
        Command::Inspect(args) => inspect::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Listen on this Unix socket instead of stdin/stdout.
    #[arg(long, env = "DUPLEXRPC_SOCKET", value_name = "PATH")]
    pub socket: Option<PathBuf>,
    /// Exit after the first connection closes.
    #[arg(long, requires = "socket")]
    pub once: bool,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Socket path to connect to.
    #[arg(env = "DUPLEXRPC_SOCKET")]
    pub socket: PathBuf,
    /// Method to call, e.g. `echo` or `chat/send`.
    pub method: String,
    /// JSON argument (sent as duplexrpc.v1.Json). Default: null.
    #[arg(long, value_name = "VALUE")]
    pub json: Option<String>,
    /// Treat the reply as a stream and print every item.
    #[arg(long)]
    pub stream: bool,
    /// Reply timeout; for streams, the longest wait between items (e.g. 5s, 500ms).
    #[arg(long, env = "DUPLEXRPC_TIMEOUT", default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Wire dump to decode. Reads stdin when omitted.
    pub file: Option<PathBuf>,
    /// Largest frame accepted, in bytes.
    #[arg(long, default_value_t = duplexrpc_frame::DEFAULT_MAX_PAYLOAD)]
    pub max_frame: usize,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("failed to start runtime: {err}")))
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration(" 3 ").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert_eq!(parse_duration("0s").unwrap_err().code, USAGE);
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }
}
