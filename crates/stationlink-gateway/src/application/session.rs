//! Connection/session manager for one device link.
//!
//! A [`Session`] owns the transport to a single base-station device and keeps
//! it usable for any number of callers:
//!
//! - **Receive loop** – reads with a short poll timeout, feeds the bytes to a
//!   [`FrameParser`], and routes every decoded message either to the
//!   [`RequestTracker`] (a reply somebody is waiting for) or to the
//!   [`MessageHandler`] (everything else).  A read error starts a reconnect.
//! - **Heartbeat loop** – pings the device every `heartbeat_interval` and
//!   sweeps expired requests out of the tracker.  Ping failures are logged,
//!   never fatal.
//! - **Callers** – [`Session::send`], [`Session::send_and_wait`], and the
//!   typed helpers ([`Session::request_status`] and friends) may be called
//!   concurrently from any task.
//!
//! # State machine
//!
//! ```text
//!   Disconnected ──start()──► Connecting ──open ok──► Connected
//!        ▲                                               │ read/write error
//!        │                                               ▼
//!        └──── attempts exhausted ◄──── Disconnected ──delay──► Connecting ──► Connected
//!
//!   any state ──stop()──► Stopped (terminal)
//! ```
//!
//! # Locking
//!
//! The transport, the sequence counter, and the last-activity timestamp live
//! together in one `Link` struct behind a `tokio::sync::Mutex`.  Taking a sequence
//! number, registering it with the tracker, and writing the frame all happen
//! under that one guard, so a reply can never race ahead of its registration.
//! The receive loop holds the guard for at most one poll interval per read.
//! The tracker has its own lock, and the frame parser is owned by the receive
//! task alone.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use stationlink_core::protocol::messages::MAX_PAYLOAD_LEN;
use stationlink_core::{
    build_frame, Command, CommandResult, DeviceError, DeviceMessage, DeviceStatus, FrameParser,
    Message, MessageType, Metric, MetricKind, ProtocolError, SequenceCounter,
};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use super::handler::{dispatch_unsolicited, MessageHandler};
use super::tracker::{RequestTracker, TrackerError, WaitError};
use super::transport::{ReadOutcome, Transport, TransportError};

/// Size of the receive buffer handed to the transport on each read.
const READ_BUFFER_SIZE: usize = 4096;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors returned by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is not connected")]
    NotConnected,

    #[error("no response within {0:?}")]
    ResponseTimeout(Duration),

    /// The session was stopped while the request was outstanding.
    #[error("request cancelled by session shutdown")]
    Cancelled,

    #[error("expected {expected:?} but device answered {received:?}")]
    UnexpectedResponse {
        expected: MessageType,
        received: MessageType,
    },

    /// The device answered with an `Error` message.
    #[error("{0}")]
    Device(DeviceError),

    #[error("{0:?} is not a request type")]
    NotARequest(MessageType),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Every one of the 256 sequence numbers is awaiting a response.
    #[error("sequence {0} is already awaiting a response")]
    SequenceInUse(u8),

    #[error("session has already been started")]
    AlreadyStarted,
}

impl From<TrackerError> for SessionError {
    fn from(e: TrackerError) -> Self {
        match e {
            TrackerError::SequenceInUse(seq) => SessionError::SequenceInUse(seq),
            TrackerError::Cancelled => SessionError::Cancelled,
        }
    }
}

// ── Configuration and state ───────────────────────────────────────────────────

/// Timing and recovery settings for a [`Session`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// How long a request waits for its reply.
    pub response_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Pause before each reconnect attempt.
    pub reconnect_delay: Duration,
    /// 0 retries forever.
    pub max_reconnect_attempts: u32,
    /// Read timeout of the receive loop; also bounds how long `stop()` waits
    /// for the loop to notice shutdown.
    pub poll_interval: Duration,
    /// Consecutive CRC failures that force a reconnect.  0 disables.
    pub crc_failure_threshold: u32,
    pub max_payload_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_millis(2000),
            heartbeat_interval: Duration::from_millis(10_000),
            reconnect_delay: Duration::from_millis(2000),
            max_reconnect_attempts: 0,
            poll_interval: Duration::from_millis(50),
            crc_failure_threshold: 0,
            max_payload_len: MAX_PAYLOAD_LEN,
        }
    }
}

/// Where the session is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// `stop()` was called; the session cannot be restarted.
    Stopped,
}

/// Point-in-time counters for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_received: u64,
    pub crc_errors: u64,
    pub reconnects: u64,
    /// Time since the last byte was read or written, if any ever was.
    pub idle_for: Option<Duration>,
}

/// Per-connection mutable state shared by the loops and all callers.
struct Link {
    transport: Box<dyn Transport>,
    sequence: SequenceCounter,
    last_activity: Option<Instant>,
    connected: bool,
}

impl Link {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.transport.write_all(frame).await?;
        self.last_activity = Some(Instant::now());
        Ok(())
    }
}

struct Inner {
    config: SessionConfig,
    link: Mutex<Link>,
    tracker: RequestTracker,
    handler: Arc<dyn MessageHandler>,
    state: watch::Sender<ConnectionState>,
    shutdown: watch::Sender<bool>,
    started: AtomicBool,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    frames_received: AtomicU64,
    crc_errors: AtomicU64,
    reconnects: AtomicU64,
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Handle to one device session.  Cheap to clone; all clones share the link.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub fn new(
        transport: Box<dyn Transport>,
        config: SessionConfig,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                tracker: RequestTracker::new(config.response_timeout),
                config,
                link: Mutex::new(Link {
                    transport,
                    sequence: SequenceCounter::new(),
                    last_activity: None,
                    connected: false,
                }),
                handler,
                state,
                shutdown,
                started: AtomicBool::new(false),
                tasks: StdMutex::new(Vec::new()),
                frames_received: AtomicU64::new(0),
                crc_errors: AtomicU64::new(0),
                reconnects: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Subscribes to connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub async fn stats(&self) -> SessionStats {
        let idle_for = self
            .inner
            .link
            .lock()
            .await
            .last_activity
            .map(|t| t.elapsed());
        SessionStats {
            frames_received: self.inner.frames_received.load(Ordering::Relaxed),
            crc_errors: self.inner.crc_errors.load(Ordering::Relaxed),
            reconnects: self.inner.reconnects.load(Ordering::Relaxed),
            idle_for,
        }
    }

    /// Number of requests currently waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.inner.tracker.pending_count()
    }

    /// Opens the transport and starts the receive and heartbeat loops.
    ///
    /// Returns once the transport is open.
    ///
    /// # Errors
    ///
    /// - [`SessionError::AlreadyStarted`] on a second call.
    /// - [`SessionError::Transport`] when the first connection attempt fails;
    ///   the session is then back in `Disconnected` and may be started again.
    pub async fn start(&self) -> Result<(), SessionError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(SessionError::AlreadyStarted);
        }

        self.inner.set_state(ConnectionState::Connecting);
        let opened = {
            let mut link = self.inner.link.lock().await;
            let result = link.transport.open().await;
            if result.is_ok() {
                link.connected = true;
                link.last_activity = Some(Instant::now());
                info!(endpoint = %link.transport.endpoint(), "device link connected");
            }
            result
        };
        if let Err(e) = opened {
            warn!("initial connection failed: {e}");
            self.inner.set_state(ConnectionState::Disconnected);
            self.inner.started.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        self.inner.set_state(ConnectionState::Connected);

        let receiver = tokio::spawn(receive_loop(self.clone(), self.inner.shutdown.subscribe()));
        let heartbeat =
            tokio::spawn(heartbeat_loop(self.clone(), self.inner.shutdown.subscribe()));
        self.inner.lock_tasks().extend([receiver, heartbeat]);
        Ok(())
    }

    /// Shuts the session down for good.
    ///
    /// Wakes every waiting caller with [`SessionError::Cancelled`], waits for
    /// both loops to exit, closes the transport, and moves to `Stopped`.
    /// Calling it again is a no-op.
    pub async fn stop(&self) {
        if self.state() == ConnectionState::Stopped {
            return;
        }
        info!("stopping session");
        self.inner.started.store(true, Ordering::SeqCst);
        self.inner.shutdown.send_replace(true);

        let cancelled = self.inner.tracker.cancel_all();
        if cancelled > 0 {
            debug!(cancelled, "cancelled outstanding requests");
        }

        let tasks: Vec<JoinHandle<()>> = self.inner.lock_tasks().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!("session task ended abnormally: {e}");
            }
        }

        {
            let mut link = self.inner.link.lock().await;
            link.transport.close().await;
            link.connected = false;
        }
        self.inner.set_state(ConnectionState::Stopped);
    }

    /// Stamps `msg` with the next sequence number and writes it.
    ///
    /// Returns the sequence number used.  A write failure closes the
    /// transport; the receive loop then reconnects.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotConnected`], [`SessionError::Protocol`] for an
    /// oversized payload, [`SessionError::Transport`], or
    /// [`SessionError::SequenceInUse`] when all 256 sequence numbers are
    /// awaiting replies.
    pub async fn send(&self, msg: Message) -> Result<u8, SessionError> {
        let mut link = self.inner.link.lock().await;
        if !link.connected {
            return Err(SessionError::NotConnected);
        }
        let sequence = self.inner.next_free_sequence(&mut link)?;
        let frame = build_frame(&msg.with_sequence(sequence))?;
        self.inner.write_locked(&mut link, &frame).await?;
        Ok(sequence)
    }

    /// Sends a request and waits up to `timeout` for its reply.
    ///
    /// On timeout the request is removed from the tracker before returning.
    ///
    /// # Errors
    ///
    /// [`SessionError::ResponseTimeout`], [`SessionError::Cancelled`] when the
    /// session stops meanwhile, [`SessionError::NotARequest`] for message
    /// types that have no reply, plus everything [`send`](Self::send) returns.
    pub async fn send_and_wait(
        &self,
        msg: Message,
        timeout: Duration,
    ) -> Result<Message, SessionError> {
        let expected = msg
            .message_type
            .expected_response()
            .ok_or(SessionError::NotARequest(msg.message_type))?;

        let pending = {
            let mut link = self.inner.link.lock().await;
            if !link.connected {
                return Err(SessionError::NotConnected);
            }
            let sequence = self.inner.next_free_sequence(&mut link)?;
            let frame = build_frame(&msg.with_sequence(sequence))?;
            let pending = self.inner.tracker.track_with_timeout(sequence, expected, timeout)?;
            if let Err(e) = self.inner.write_locked(&mut link, &frame).await {
                self.inner.tracker.remove(sequence);
                return Err(e);
            }
            debug!(sequence, message_type = ?expected, "awaiting reply");
            pending
        };

        let sequence = pending.sequence();
        match time::timeout(timeout, pending.wait()).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(WaitError::TimedOut)) => Err(SessionError::ResponseTimeout(timeout)),
            Ok(Err(WaitError::Cancelled)) => Err(SessionError::Cancelled),
            Err(_) => {
                self.inner.tracker.remove(sequence);
                debug!(sequence, "request timed out");
                Err(SessionError::ResponseTimeout(timeout))
            }
        }
    }

    /// Round-trips a `Ping` and returns the elapsed time.
    ///
    /// # Errors
    ///
    /// Anything but a `Pong` reply is [`SessionError::UnexpectedResponse`].
    pub async fn ping(&self) -> Result<Duration, SessionError> {
        let started = Instant::now();
        let reply = self
            .send_and_wait(
                Message::empty(MessageType::Ping, 0),
                self.inner.config.response_timeout,
            )
            .await?;
        if reply.message_type != MessageType::Pong {
            return Err(SessionError::UnexpectedResponse {
                expected: MessageType::Pong,
                received: reply.message_type,
            });
        }
        Ok(started.elapsed())
    }

    /// Requests the given metrics; an empty slice asks for all of them.
    pub async fn request_metrics(&self, kinds: &[MetricKind]) -> Result<Vec<Metric>, SessionError> {
        match self.request(DeviceMessage::MetricsRequest(kinds.to_vec())).await? {
            DeviceMessage::MetricsResponse(metrics) => Ok(metrics),
            other => Err(unexpected(MessageType::MetricsResponse, &other)),
        }
    }

    pub async fn request_status(&self) -> Result<DeviceStatus, SessionError> {
        match self.request(DeviceMessage::StatusRequest).await? {
            DeviceMessage::StatusResponse(status) => Ok(status),
            other => Err(unexpected(MessageType::StatusResponse, &other)),
        }
    }

    /// Executes `command` on the device.
    ///
    /// A result with a non-success status is still `Ok`; check
    /// [`CommandResult::is_success`].
    pub async fn execute_command(&self, command: &Command) -> Result<CommandResult, SessionError> {
        match self.request(DeviceMessage::ExecuteCommand(command.clone())).await? {
            DeviceMessage::CommandResult(result) => Ok(result),
            other => Err(unexpected(MessageType::CommandResult, &other)),
        }
    }

    /// Sends a typed request and decodes the reply.  A device `Error` reply
    /// becomes [`SessionError::Device`].
    async fn request(&self, msg: DeviceMessage) -> Result<DeviceMessage, SessionError> {
        let reply = self
            .send_and_wait(msg.into_message(0)?, self.inner.config.response_timeout)
            .await?;
        match DeviceMessage::decode(&reply)? {
            DeviceMessage::Error(e) => Err(SessionError::Device(e)),
            other => Ok(other),
        }
    }
}

fn unexpected(expected: MessageType, received: &DeviceMessage) -> SessionError {
    SessionError::UnexpectedResponse {
        expected,
        received: received.message_type(),
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state || *current == ConnectionState::Stopped {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            self.handler.on_connection_state(state);
        }
    }

    /// Takes the next sequence number that no pending request owns.
    ///
    /// Must be called with the link guard held, so nothing can be tracked
    /// between the check and the caller's `track`.
    fn next_free_sequence(&self, link: &mut Link) -> Result<u8, SessionError> {
        let mut sequence = link.sequence.next();
        for _ in 0..u8::MAX {
            if !self.tracker.is_pending(sequence) {
                return Ok(sequence);
            }
            sequence = link.sequence.next();
        }
        if self.tracker.is_pending(sequence) {
            return Err(SessionError::SequenceInUse(sequence));
        }
        Ok(sequence)
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Writes under an already held link guard.  On failure the transport is
    /// closed and the session marked disconnected.
    async fn write_locked(&self, link: &mut Link, frame: &[u8]) -> Result<(), SessionError> {
        if let Err(e) = link.write_frame(frame).await {
            warn!("write failed, closing transport: {e}");
            link.transport.close().await;
            link.connected = false;
            self.set_state(ConnectionState::Disconnected);
            return Err(e.into());
        }
        Ok(())
    }

    /// Handles one decoded message from the device.
    async fn dispatch(&self, msg: Message) {
        debug!(
            message_type = ?msg.message_type,
            sequence = msg.sequence,
            len = msg.payload.len(),
            "frame received"
        );
        self.frames_received.fetch_add(1, Ordering::Relaxed);

        if msg.message_type == MessageType::Ping {
            self.answer_ping(msg.sequence).await;
            return;
        }
        if !self.tracker.complete(msg.clone()) {
            dispatch_unsolicited(self.handler.as_ref(), &msg);
        }
    }

    async fn answer_ping(&self, sequence: u8) {
        let pong = Message::empty(MessageType::Pong, sequence);
        let Ok(frame) = build_frame(&pong) else {
            return;
        };
        let mut link = self.link.lock().await;
        if link.connected {
            let _ = self.write_locked(&mut link, &frame).await;
        }
    }

    /// Tears down the current connection and retries until it is back, the
    /// attempts run out, or shutdown is requested.  Returns `true` when
    /// connected again.
    async fn reconnect(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        {
            let mut link = self.link.lock().await;
            link.transport.close().await;
            link.connected = false;
        }
        self.set_state(ConnectionState::Disconnected);

        let max = self.config.max_reconnect_attempts;
        let mut attempt: u32 = 0;
        loop {
            if max > 0 && attempt >= max {
                error!(attempts = attempt, "giving up reconnecting to device");
                return false;
            }
            attempt += 1;

            if *shutdown.borrow() {
                return false;
            }
            tokio::select! {
                _ = time::sleep(self.config.reconnect_delay) => {}
                _ = shutdown.changed() => return false,
            }

            self.set_state(ConnectionState::Connecting);
            let mut link = self.link.lock().await;
            let endpoint = link.transport.endpoint();
            warn!(attempt, %endpoint, "reconnecting");
            match link.transport.open().await {
                Ok(()) => {
                    link.connected = true;
                    link.last_activity = Some(Instant::now());
                    drop(link);
                    self.reconnects.fetch_add(1, Ordering::Relaxed);
                    info!(attempt, %endpoint, "device link re-established");
                    self.set_state(ConnectionState::Connected);
                    return true;
                }
                Err(e) => {
                    drop(link);
                    warn!(attempt, "reconnect failed: {e}");
                    self.set_state(ConnectionState::Disconnected);
                }
            }
        }
    }
}

// ── Background loops ──────────────────────────────────────────────────────────

async fn receive_loop(session: Session, mut shutdown: watch::Receiver<bool>) {
    let inner = &session.inner;
    let mut parser = FrameParser::with_max_payload(inner.config.max_payload_len);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        if *shutdown.borrow() {
            break;
        }

        let read = {
            let mut link = inner.link.lock().await;
            let result = link
                .transport
                .read(&mut buf, inner.config.poll_interval)
                .await;
            if let Ok(ReadOutcome::Data(_)) = result {
                link.last_activity = Some(Instant::now());
            }
            result
        };

        let mut needs_reconnect = false;
        match read {
            Ok(ReadOutcome::Idle) => {}
            Ok(ReadOutcome::Data(n)) => {
                let crc_before = parser.crc_errors();
                let messages = parser.feed(&buf[..n]);
                let new_crc_errors = parser.crc_errors() - crc_before;
                if new_crc_errors > 0 {
                    inner.crc_errors.fetch_add(new_crc_errors, Ordering::Relaxed);
                    warn!(
                        dropped = new_crc_errors,
                        consecutive = parser.stats().consecutive_crc_errors,
                        "dropped frames with bad CRC"
                    );
                }
                for msg in messages {
                    inner.dispatch(msg).await;
                }

                let threshold = inner.config.crc_failure_threshold;
                if threshold > 0 && parser.stats().consecutive_crc_errors >= threshold {
                    warn!(threshold, "too many consecutive CRC failures, forcing reconnect");
                    needs_reconnect = true;
                }
            }
            Err(e) => {
                if *shutdown.borrow() {
                    break;
                }
                warn!("device link read failed: {e}");
                needs_reconnect = true;
            }
        }

        if needs_reconnect {
            if !inner.reconnect(&mut shutdown).await {
                break;
            }
            parser.reset();
            parser.clear_error_run();
        }
    }
    debug!("receive loop stopped");
}

async fn heartbeat_loop(session: Session, mut shutdown: watch::Receiver<bool>) {
    let period = session.inner.config.heartbeat_interval;
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        let expired = session.inner.tracker.cleanup();
        if expired > 0 {
            debug!(expired, "expired stale requests");
        }

        if session.state() != ConnectionState::Connected {
            continue;
        }
        match session.ping().await {
            Ok(rtt) => debug!(?rtt, "heartbeat"),
            Err(SessionError::Cancelled) => break,
            Err(e) => warn!("heartbeat failed: {e}"),
        }
    }
    debug!("heartbeat loop stopped");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
