//! # Control Channel Errors

use std::io;

use thiserror::Error;

/// Failures raised by the control session and its packet codec.
///
/// Loss bookkeeping never errors; everything here is connection-level. After
/// the session is active, I/O failures are reported once through the
/// notification sink rather than returned, since the observing context is a
/// background worker.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The TCP connection attempt exceeded its deadline.
    #[error("connection attempt to the host control port timed out")]
    ConnectTimeout,

    /// The TCP connection attempt failed outright.
    #[error("failed to open the control connection")]
    ConnectFailed(#[source] io::Error),

    /// The stream ended before a full packet (header or declared payload)
    /// could be read.
    #[error("control stream ended before a full packet was read")]
    ProtocolTruncated,

    /// A bounded read during the handshake exceeded its deadline.
    #[error("handshake read exceeded its deadline")]
    HandshakeTimeout,

    /// The session has no open connection to operate on.
    #[error("control session is not connected")]
    NotConnected,

    /// The session was already started or has been shut down.
    #[error("control session already started or aborted")]
    AlreadyStarted,

    /// Any other send/receive failure on the control connection.
    #[error("control channel I/O failure")]
    Io(#[from] io::Error),
}
