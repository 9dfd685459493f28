mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "duplexrpc", version, about = "Bidirectional RPC over duplex byte streams")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        env = "DUPLEXRPC_LOG_LEVEL",
        default_value = "info",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_call_subcommand() {
        let cli = Cli::try_parse_from([
            "duplexrpc",
            "call",
            "/tmp/test.sock",
            "echo",
            "--json",
            "{\"x\":1}",
            "--timeout",
            "500ms",
        ])
        .expect("call args should parse");

        let Command::Call(args) = cli.command else {
            panic!("expected call command");
        };
        assert_eq!(args.method, "echo");
        assert_eq!(args.timeout, "500ms");
        assert!(!args.stream);
    }

    #[test]
    fn serve_once_requires_socket() {
        let err = Cli::try_parse_from(["duplexrpc", "serve", "--once"])
            .expect_err("--once without --socket should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_inspect_without_file() {
        let cli = Cli::try_parse_from(["duplexrpc", "--format", "pretty", "inspect"])
            .expect("inspect args should parse");
        assert!(matches!(cli.format, Some(OutputFormat::Pretty)));
        assert!(matches!(cli.command, Command::Inspect(ref args) if args.file.is_none()));
    }
}
