use crate::transport::Transport;

/// Default buffer size of each direction of an in-memory pipe.
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// Create two connected in-memory transports.
///
/// Bytes written to one side are read from the other. Dropping one side
/// makes the other observe EOF.
pub fn memory_pair(capacity: usize) -> (Transport, Transport) {
    let (left, right) = tokio::io::duplex(capacity.max(1));
    (
        Transport::from_stream(left, "memory"),
        Transport::from_stream(right, "memory"),
    )
}
