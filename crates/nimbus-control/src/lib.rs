//! # nimbus-control
//!
//! Control-channel protocol engine for the Nimbus game-streaming client.
//!
//! Establishes and maintains the persistent TCP session with the streaming
//! host: a fixed three-step handshake, steady-state keepalive, and reporting
//! plus recovery of A/V delivery failures observed by the rest of the client.
//!
//! ## Crate structure
//!
//! - [`wire`] — fixed-header packet codec and the packet-type table
//! - [`loss`] — loss-rate tracking and throttled user warnings
//! - [`resync`] — frame-loss range queue and burst coalescing
//! - [`session`] — connection lifecycle, handshake, background workers
//! - [`listener`] — notification sink implemented by the embedding client
//! - [`error`] — connection-level error kinds
//!
//! The AV pipeline drives the engine through [`ControlSession::frame_loss`]
//! and [`ControlSession::sink_too_slow`]; everything else happens on the
//! session's own worker threads.

pub mod error;
pub mod listener;
pub mod loss;
pub mod resync;
pub mod session;
pub mod wire;

pub use error::ControlError;
pub use listener::SessionListener;
pub use loss::{LossTracker, LossWarning};
pub use resync::FrameRange;
pub use session::{ControlConfig, ControlSession, SessionState};
pub use wire::{ControlPacket, ControlResponse};
