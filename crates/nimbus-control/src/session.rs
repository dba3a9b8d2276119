//! # Control Session
//!
//! Owns the TCP control connection to the streaming host and everything that
//! happens on it: the fixed handshake sequence, the steady-state background
//! workers, and shutdown. The session lifecycle is:
//!
//! ```text
//!   Idle ──start()──▶ Handshaking ──▶ Active ──abort()──▶ Aborting ──▶ Closed
//! ```
//!
//! Once active, up to three worker threads share the connection: a heartbeat
//! sender, the resync worker draining the frame-loss queue, and (only when
//! the caller asks) a jitter probe sender. Each worker blocks on a timer or
//! the queue, observes I/O failures once, and never restarts itself.
//!
//! `abort()` shuts the socket down before signalling the workers, so a worker
//! blocked in a read or mid-send observes a plain I/O failure instead of
//! racing a half-closed stream.

use std::io::{self, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{bounded, select, unbounded, Receiver, RecvTimeoutError, Sender};
use quanta::Instant;
use tracing::{debug, warn};

use crate::error::ControlError;
use crate::listener::SessionListener;
use crate::loss::LossTracker;
use crate::resync::{drain_batch, FrameRange};
use crate::wire::{
    heartbeat, handshake_finalize, jitter_probe, keepalive, resync_request, ControlPacket,
    ControlResponse, CONTROL_PORT,
};

// ─── Configuration ───────────────────────────────────────────────────────────

/// Timing knobs for one control session. `Default` supplies the protocol
/// values; tests shrink the intervals.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// TCP port of the host's control service.
    pub port: u16,
    /// Deadline for the TCP connection attempt.
    pub connect_timeout: Duration,
    /// Read deadline applied during the handshake, removed once active.
    pub handshake_timeout: Duration,
    /// Interval between heartbeat packets.
    pub heartbeat_interval: Duration,
    /// Interval between jitter probes.
    pub jitter_interval: Duration,
}

impl Default for ControlConfig {
    fn default() -> Self {
        ControlConfig {
            port: CONTROL_PORT,
            connect_timeout: Duration::from_millis(5000),
            handshake_timeout: Duration::from_millis(5000),
            heartbeat_interval: Duration::from_millis(3000),
            jitter_interval: Duration::from_millis(100),
        }
    }
}

// ─── Session State ───────────────────────────────────────────────────────────

/// Session lifecycle state. Transitions are driven only by the session;
/// `Closed` is terminal and idempotent to re-enter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, not yet started.
    Idle,
    /// `start()` is running the three-step exchange.
    Handshaking,
    /// Handshake done, workers running.
    Active,
    /// `abort()` is tearing the session down.
    Aborting,
    /// Connection closed, all workers joined.
    Closed,
}

// ─── Worker Shared State ─────────────────────────────────────────────────────

/// Everything a background worker needs: the connection, the notification
/// sink, and the once-only termination latch.
struct WorkerShared {
    stream: TcpStream,
    listener: Arc<dyn SessionListener>,
    terminated: AtomicBool,
}

impl WorkerShared {
    fn send_packet(&self, packet: &ControlPacket) -> Result<(), ControlError> {
        (&self.stream).write_all(&packet.encode())?;
        Ok(())
    }

    fn send_and_get_reply(&self, packet: &ControlPacket) -> Result<ControlResponse, ControlError> {
        self.send_packet(packet)?;
        ControlResponse::read_from(&mut &self.stream)
    }

    /// Report connection termination to the owning client. Duplicate reports
    /// from independently-failing workers fold into the first one.
    fn report_termination(&self, cause: ControlError) {
        if !self.terminated.swap(true, Ordering::SeqCst) {
            self.listener.connection_terminated(cause);
        }
    }
}

// ─── Control Session ─────────────────────────────────────────────────────────

/// One control session corresponds to exactly one streaming connection
/// attempt. All entry points take `&self`; the session is made to be shared
/// across the AV-pipeline threads behind an `Arc`.
pub struct ControlSession {
    host: IpAddr,
    config: ControlConfig,
    stream_config: Bytes,
    listener: Arc<dyn SessionListener>,

    state: Mutex<SessionState>,
    shared: Mutex<Option<Arc<WorkerShared>>>,
    tracker: Mutex<LossTracker>,

    range_tx: Sender<FrameRange>,
    range_rx: Mutex<Option<Receiver<FrameRange>>>,

    // Dropping the sender disconnects every worker's cloned receiver.
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,

    heartbeat_worker: Mutex<Option<JoinHandle<()>>>,
    jitter_worker: Mutex<Option<JoinHandle<()>>>,
    resync_worker: Mutex<Option<JoinHandle<()>>>,

    aborting: AtomicBool,
}

impl ControlSession {
    /// Create a session with the default protocol configuration.
    ///
    /// `stream_config` is the pre-serialized configuration blob produced by
    /// the stream-configuration collaborator; it is opaque here and sent
    /// verbatim as the first bytes of the handshake.
    pub fn new(host: IpAddr, listener: Arc<dyn SessionListener>, stream_config: Bytes) -> Self {
        Self::with_config(host, listener, stream_config, ControlConfig::default())
    }

    /// Create a session with explicit timing configuration.
    pub fn with_config(
        host: IpAddr,
        listener: Arc<dyn SessionListener>,
        stream_config: Bytes,
        config: ControlConfig,
    ) -> Self {
        let (range_tx, range_rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = bounded(0);

        ControlSession {
            host,
            config,
            stream_config,
            listener,
            state: Mutex::new(SessionState::Idle),
            shared: Mutex::new(None),
            tracker: Mutex::new(LossTracker::new()),
            range_tx,
            range_rx: Mutex::new(Some(range_rx)),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            heartbeat_worker: Mutex::new(None),
            jitter_worker: Mutex::new(None),
            resync_worker: Mutex::new(None),
            aborting: AtomicBool::new(false),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Open the TCP connection to the host's control port. Must complete
    /// before [`start`](Self::start).
    pub fn initialize(&self) -> Result<(), ControlError> {
        let addr = SocketAddr::new(self.host, self.config.port);
        let stream =
            TcpStream::connect_timeout(&addr, self.config.connect_timeout).map_err(|e| {
                if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) {
                    ControlError::ConnectTimeout
                } else {
                    ControlError::ConnectFailed(e)
                }
            })?;
        stream.set_nodelay(true).map_err(ControlError::ConnectFailed)?;

        debug!(%addr, "control connection open");
        *lock(&self.shared) = Some(Arc::new(WorkerShared {
            stream,
            listener: self.listener.clone(),
            terminated: AtomicBool::new(false),
        }));
        Ok(())
    }

    /// Run the handshake and launch the steady-state workers.
    ///
    /// The three exchanges run in strict order under a bounded read timeout:
    /// raw configuration blob, keepalive ping with one reply, handshake
    /// finalize with one reply. Any failure is returned before a single
    /// worker is spawned and the caller must abort the session; there is no
    /// partial-handshake retry.
    pub fn start(&self) -> Result<(), ControlError> {
        let shared = lock(&self.shared).clone().ok_or(ControlError::NotConnected)?;
        {
            let mut state = lock(&self.state);
            if *state != SessionState::Idle {
                return Err(ControlError::AlreadyStarted);
            }
            *state = SessionState::Handshaking;
        }

        shared
            .stream
            .set_read_timeout(Some(self.config.handshake_timeout))?;
        self.perform_handshake(&shared).map_err(as_handshake_error)?;
        // Steady state uses unbounded blocking reads; abort() unblocks them
        // by shutting the socket down.
        shared.stream.set_read_timeout(None)?;

        if self.aborting.load(Ordering::SeqCst) {
            return Err(ControlError::NotConnected);
        }

        let ranges = lock(&self.range_rx)
            .take()
            .ok_or(ControlError::AlreadyStarted)?;

        let hb_shared = shared.clone();
        let hb_shutdown = self.shutdown_rx.clone();
        let hb_interval = self.config.heartbeat_interval;
        *lock(&self.heartbeat_worker) = Some(
            thread::Builder::new()
                .name("control-heartbeat".into())
                .spawn(move || run_heartbeat(hb_shared, hb_shutdown, hb_interval))
                .expect("failed to spawn control heartbeat worker"),
        );

        let rs_shared = shared;
        let rs_shutdown = self.shutdown_rx.clone();
        *lock(&self.resync_worker) = Some(
            thread::Builder::new()
                .name("control-resync".into())
                .spawn(move || run_resync(rs_shared, ranges, rs_shutdown))
                .expect("failed to spawn control resync worker"),
        );

        let mut state = lock(&self.state);
        if *state == SessionState::Handshaking {
            *state = SessionState::Active;
        }
        debug!("control session active");
        Ok(())
    }

    fn perform_handshake(&self, shared: &WorkerShared) -> Result<(), ControlError> {
        // The configuration blob is pre-framed by its producer and goes out
        // as a raw write, not wrapped in the packet codec.
        (&shared.stream).write_all(&self.stream_config)?;

        shared.send_packet(&keepalive())?;
        let _ = ControlResponse::read_from(&mut &shared.stream)?;

        shared.send_packet(&handshake_finalize())?;
        let _ = ControlResponse::read_from(&mut &shared.stream)?;
        Ok(())
    }

    /// Launch the jitter probe sender. Never started automatically; the
    /// caller opts in once the session is active. The probe sequence counter
    /// advances by two on every send for the life of the session.
    pub fn start_jitter_probe(&self) -> Result<(), ControlError> {
        if self.state() != SessionState::Active {
            return Err(ControlError::NotConnected);
        }
        let shared = lock(&self.shared).clone().ok_or(ControlError::NotConnected)?;

        let mut slot = lock(&self.jitter_worker);
        if slot.is_some() {
            return Ok(());
        }
        let shutdown = self.shutdown_rx.clone();
        let interval = self.config.jitter_interval;
        *slot = Some(
            thread::Builder::new()
                .name("control-jitter".into())
                .spawn(move || run_jitter(shared, shutdown, interval))
                .expect("failed to spawn control jitter worker"),
        );
        Ok(())
    }

    /// The AV pipeline detected a span of undecodable frames.
    ///
    /// Feeds the loss-rate tracker (which may surface a throttled warning)
    /// and always enqueues the range for the resync worker; warning
    /// suppression never suppresses recovery.
    pub fn frame_loss(&self, first_lost_frame: i32, next_successful_frame: i32) {
        let warning = lock(&self.tracker).record_loss(Instant::now());
        if let Some(warning) = warning {
            self.listener.display_transient_message(warning.message());
        }
        self.enqueue(FrameRange::new(first_lost_frame, next_successful_frame));
    }

    /// The AV pipeline reported that the local sink is consuming data too
    /// slowly. Same enqueue behavior as [`frame_loss`](Self::frame_loss),
    /// tracked by the cumulative slow-sink counter.
    pub fn sink_too_slow(&self, first_lost_frame: i32, next_successful_frame: i32) {
        let warning = lock(&self.tracker).record_slow_sink();
        if let Some(warning) = warning {
            self.listener.display_transient_message(warning.message());
        }
        self.enqueue(FrameRange::new(first_lost_frame, next_successful_frame));
    }

    fn enqueue(&self, range: FrameRange) {
        // After abort the worker and its receiver are gone; the range is moot.
        let _ = self.range_tx.send(range);
    }

    /// External signal that the whole client session died.
    pub fn connection_terminated(&self) {
        self.abort();
    }

    /// Tear the session down. Idempotent and safe from any thread, including
    /// before `start()` has completed.
    ///
    /// The connection is shut down first so every blocked read or in-flight
    /// send observes an I/O failure, then the workers are signalled and
    /// joined: jitter, heartbeat, resync. On return no worker is running.
    pub fn abort(&self) {
        if self.aborting.swap(true, Ordering::SeqCst) {
            return;
        }
        *lock(&self.state) = SessionState::Aborting;

        if let Some(shared) = lock(&self.shared).as_ref() {
            let _ = shared.stream.shutdown(Shutdown::Both);
        }
        drop(lock(&self.shutdown_tx).take());

        join_worker(&self.jitter_worker);
        join_worker(&self.heartbeat_worker);
        join_worker(&self.resync_worker);

        *lock(&self.state) = SessionState::Closed;
        debug!("control session closed");
    }
}

impl Drop for ControlSession {
    fn drop(&mut self) {
        self.abort();
    }
}

// ─── Workers ─────────────────────────────────────────────────────────────────

fn run_heartbeat(shared: Arc<WorkerShared>, shutdown: Receiver<()>, interval: Duration) {
    loop {
        if let Err(e) = shared.send_packet(&heartbeat()) {
            shared.report_termination(e);
            return;
        }
        match shutdown.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn run_jitter(shared: Arc<WorkerShared>, shutdown: Receiver<()>, interval: Duration) {
    let mut seq: u32 = 0;
    loop {
        seq = seq.wrapping_add(2);
        if let Err(e) = shared.send_packet(&jitter_probe(seq)) {
            shared.report_termination(e);
            return;
        }
        match shutdown.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn run_resync(shared: Arc<WorkerShared>, ranges: Receiver<FrameRange>, shutdown: Receiver<()>) {
    loop {
        let first = select! {
            recv(ranges) -> range => match range {
                Ok(range) => range,
                Err(_) => return,
            },
            recv(shutdown) -> _ => return,
        };

        let request = drain_batch(first, &ranges);
        warn!(
            first_lost = request.first_lost_frame,
            next_successful = request.next_successful_frame,
            "invalidating reference frames"
        );
        match shared.send_and_get_reply(&resync_request()) {
            Ok(_) => debug!("reference frames invalidated"),
            Err(e) => {
                shared.report_termination(e);
                return;
            }
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn join_worker(slot: &Mutex<Option<JoinHandle<()>>>) {
    let handle = lock(slot).take();
    if let Some(handle) = handle {
        // A listener callback may re-enter abort() from a worker thread;
        // joining that thread from itself would deadlock.
        if handle.thread().id() != thread::current().id() {
            let _ = handle.join();
        }
    }
}

/// During the handshake a read deadline expiry surfaces as a timeout I/O
/// error; fold it into the dedicated handshake error kind.
fn as_handshake_error(err: ControlError) -> ControlError {
    match err {
        ControlError::Io(e)
            if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
        {
            ControlError::HandshakeTimeout
        }
        other => other,
    }
}
