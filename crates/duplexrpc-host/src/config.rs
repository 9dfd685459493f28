use std::time::Duration;

use duplexrpc_frame::FrameConfig;

/// Default time `expect_one` waits for a reply.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of abandoned call ids remembered for late-reply detection.
pub const DEFAULT_MAX_TOMBSTONES: usize = 1024;

/// Host behavior configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// How long `expect_one` waits before failing with `CallError::Timeout`.
    pub call_timeout: Duration,
    /// How many timed-out or abandoned ids are remembered. Replies to a
    /// remembered id are dropped as late instead of counted as orphaned.
    pub max_tombstones: usize,
    /// Framing limits for both directions.
    pub frame: FrameConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_tombstones: DEFAULT_MAX_TOMBSTONES,
            frame: FrameConfig::default(),
        }
    }
}
