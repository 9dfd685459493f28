use crate::transport::Transport;

/// Standard input/output of the current process as a transport.
///
/// This is the transport a child process uses to serve RPC to the parent
/// that spawned it. Nothing else may write to stdout while it is in use;
/// diagnostics belong on stderr.
pub fn stdio() -> Transport {
    Transport::from_halves(tokio::io::stdin(), tokio::io::stdout(), "stdio")
}
