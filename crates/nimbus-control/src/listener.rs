//! # Notification Sink
//!
//! The embedding client implements [`SessionListener`] to receive the two
//! kinds of user-facing signals the control session produces: throttled
//! transient warnings and a single terminal connection-terminated report.

use crate::error::ControlError;

/// Callbacks from the control session to the owning client.
///
/// Implementations must be thread-safe: warnings arrive on whichever thread
/// invoked the loss entry point, and termination reports arrive on a
/// background worker thread.
pub trait SessionListener: Send + Sync {
    /// Display a short-lived, user-meaningful message.
    fn display_transient_message(&self, message: &str);

    /// The control channel died. Reported at most once per session.
    fn connection_terminated(&self, cause: ControlError);
}
