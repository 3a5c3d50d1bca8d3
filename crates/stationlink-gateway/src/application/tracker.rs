//! Request/response correlation.
//!
//! Every request the gateway sends carries a sequence number, and the device
//! echoes that number in its reply.  The [`RequestTracker`] remembers which
//! sequence numbers are waiting for an answer and hands each reply to the
//! task that sent the request.
//!
//! # Delivery guarantees
//!
//! Each pending request is resolved exactly once, by whichever of these
//! happens first:
//!
//! - [`RequestTracker::complete`] sees a reply with the same sequence.
//! - [`RequestTracker::cleanup`] finds the request past its deadline and
//!   delivers [`WaitError::TimedOut`].  The deadline is the tracker's
//!   timeout unless the request was registered with its own through
//!   [`RequestTracker::track_with_timeout`].
//! - [`RequestTracker::cancel_all`] delivers [`WaitError::Cancelled`].
//! - [`RequestTracker::remove`] drops the entry; the waiter sees `Cancelled`.
//!
//! The pending set sits behind a `std::sync::Mutex` that is only held for
//! map operations, never across an `.await`.  Replies travel through
//! `tokio::sync::oneshot` channels, whose `send` never blocks, so
//! [`complete`](RequestTracker::complete) is safe to call from the receive
//! loop.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use stationlink_core::{Message, MessageType};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

/// Errors returned when registering a request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    /// A request with this sequence number is still waiting for its reply.
    #[error("sequence {0} is already awaiting a response")]
    SequenceInUse(u8),

    /// The tracker was shut down by [`RequestTracker::cancel_all`].
    #[error("request tracker has been cancelled")]
    Cancelled,
}

/// Why a waiter received no message.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    #[error("no response within the timeout")]
    TimedOut,
    #[error("request was cancelled")]
    Cancelled,
}

type Slot = oneshot::Sender<Result<Message, WaitError>>;

struct PendingRequest {
    expected_type: MessageType,
    deadline: Instant,
    slot: Slot,
}

#[derive(Default)]
struct Pending {
    requests: HashMap<u8, PendingRequest>,
    closed: bool,
}

/// The waiting half of a tracked request.
#[derive(Debug)]
pub struct PendingResponse {
    sequence: u8,
    rx: oneshot::Receiver<Result<Message, WaitError>>,
}

impl PendingResponse {
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Waits until the tracker resolves this request.
    ///
    /// A request removed from the tracker without a reply resolves as
    /// [`WaitError::Cancelled`].
    pub async fn wait(self) -> Result<Message, WaitError> {
        self.rx.await.unwrap_or(Err(WaitError::Cancelled))
    }
}

/// Pending-request table keyed by sequence number.
pub struct RequestTracker {
    timeout: Duration,
    pending: Mutex<Pending>,
}

impl RequestTracker {
    /// Creates a tracker whose [`cleanup`](Self::cleanup) expires requests
    /// older than `timeout`, unless they were tracked with a timeout of
    /// their own.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pending: Mutex::new(Pending::default()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Registers a request that expects `expected_type` as its reply.
    ///
    /// # Errors
    ///
    /// - [`TrackerError::SequenceInUse`] if `sequence` is already pending.
    /// - [`TrackerError::Cancelled`] after [`cancel_all`](Self::cancel_all).
    pub fn track(
        &self,
        sequence: u8,
        expected_type: MessageType,
    ) -> Result<PendingResponse, TrackerError> {
        self.track_with_timeout(sequence, expected_type, self.timeout)
    }

    /// Like [`track`](Self::track), but [`cleanup`](Self::cleanup) leaves the
    /// request alone until `timeout` has passed.
    ///
    /// # Errors
    ///
    /// Same as [`track`](Self::track).
    pub fn track_with_timeout(
        &self,
        sequence: u8,
        expected_type: MessageType,
        timeout: Duration,
    ) -> Result<PendingResponse, TrackerError> {
        let mut pending = self.lock();
        if pending.closed {
            return Err(TrackerError::Cancelled);
        }
        if pending.requests.contains_key(&sequence) {
            return Err(TrackerError::SequenceInUse(sequence));
        }

        let (slot, rx) = oneshot::channel();
        pending.requests.insert(
            sequence,
            PendingRequest {
                expected_type,
                deadline: Instant::now() + timeout,
                slot,
            },
        );
        Ok(PendingResponse { sequence, rx })
    }

    /// Delivers `msg` to the request with the same sequence number.
    ///
    /// Returns `false` when nothing was waiting for it, in which case the
    /// caller treats the message as unsolicited.  Device events never
    /// complete a request, even when their sequence collides with one.
    pub fn complete(&self, msg: Message) -> bool {
        if msg.message_type.is_event() {
            return false;
        }

        let Some(request) = self.lock().requests.remove(&msg.sequence) else {
            return false;
        };

        if msg.message_type != request.expected_type && msg.message_type != MessageType::Error {
            debug!(
                sequence = msg.sequence,
                expected = ?request.expected_type,
                received = ?msg.message_type,
                "reply type differs from the request's expected response"
            );
        }

        // The waiter may already have given up; the message is then late.
        request.slot.send(Ok(msg)).is_ok()
    }

    /// Expires every request whose deadline has passed and returns how many.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<PendingRequest> = {
            let mut pending = self.lock();
            let stale: Vec<u8> = pending
                .requests
                .iter()
                .filter(|(_, r)| now >= r.deadline)
                .map(|(&seq, _)| seq)
                .collect();
            stale
                .into_iter()
                .filter_map(|seq| pending.requests.remove(&seq))
                .collect()
        };

        let count = expired.len();
        for request in expired {
            let _ = request.slot.send(Err(WaitError::TimedOut));
        }
        count
    }

    /// Forgets the request for `sequence`.  Returns `true` if one was pending.
    pub fn remove(&self, sequence: u8) -> bool {
        self.lock().requests.remove(&sequence).is_some()
    }

    /// Resolves every pending request with [`WaitError::Cancelled`] and closes
    /// the tracker so that later [`track`](Self::track) calls fail.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut pending = self.lock();
            pending.closed = true;
            pending.requests.drain().map(|(_, r)| r).collect()
        };

        let count = drained.len();
        for request in drained {
            let _ = request.slot.send(Err(WaitError::Cancelled));
        }
        count
    }

    pub fn is_pending(&self, sequence: u8) -> bool {
        self.lock().requests.contains_key(&sequence)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().requests.len()
    }

    // A panic while holding the lock cannot leave the map half-updated, so a
    // poisoned guard is still usable.
    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn tracker() -> RequestTracker {
        RequestTracker::new(Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_complete_delivers_reply_to_waiter() {
        // Arrange
        let tracker = tracker();
        let pending = tracker.track(7, MessageType::Pong).unwrap();

        // Act
        let matched = tracker.complete(Message::empty(MessageType::Pong, 7));

        // Assert
        assert!(matched);
        assert_eq!(pending.wait().await, Ok(Message::empty(MessageType::Pong, 7)));
        assert!(!tracker.is_pending(7));
    }

    #[test]
    fn test_wait_stays_pending_until_reply_arrives() {
        use tokio_test::{assert_pending, assert_ready, task};

        // Arrange
        let tracker = tracker();
        let mut wait = task::spawn(tracker.track(9, MessageType::StatusResponse).unwrap().wait());
        assert_pending!(wait.poll());

        // Act
        tracker.complete(Message::empty(MessageType::StatusResponse, 9));

        // Assert
        assert!(wait.is_woken());
        let reply = assert_ready!(wait.poll());
        assert_eq!(reply.map(|m| m.sequence), Ok(9));
    }

    #[test]
    fn test_complete_without_pending_request_is_unsolicited() {
        let tracker = tracker();
        assert!(!tracker.complete(Message::empty(MessageType::Pong, 1)));
    }

    #[test]
    fn test_second_complete_for_same_sequence_is_not_delivered() {
        let tracker = tracker();
        let _pending = tracker.track(3, MessageType::StatusResponse).unwrap();

        assert!(tracker.complete(Message::empty(MessageType::StatusResponse, 3)));
        assert!(!tracker.complete(Message::empty(MessageType::StatusResponse, 3)));
    }

    #[test]
    fn test_event_with_colliding_sequence_does_not_complete_request() {
        // Arrange
        let tracker = tracker();
        let _pending = tracker.track(9, MessageType::MetricsResponse).unwrap();

        // Act
        let matched = tracker.complete(Message::empty(MessageType::MetricsEvent, 9));

        // Assert
        assert!(!matched);
        assert!(tracker.is_pending(9));
    }

    #[tokio::test]
    async fn test_device_error_reply_completes_request() {
        let tracker = tracker();
        let pending = tracker.track(4, MessageType::CommandResult).unwrap();

        assert!(tracker.complete(Message::new(MessageType::Error, 4, vec![1, 0, 0])));
        let reply = pending.wait().await.unwrap();
        assert_eq!(reply.message_type, MessageType::Error);
    }

    #[test]
    fn test_tracking_a_pending_sequence_fails() {
        let tracker = tracker();
        let _first = tracker.track(1, MessageType::Pong).unwrap();

        assert_eq!(
            tracker.track(1, MessageType::Pong).unwrap_err(),
            TrackerError::SequenceInUse(1)
        );
    }

    #[test]
    fn test_complete_after_waiter_dropped_reports_late_reply() {
        let tracker = tracker();
        drop(tracker.track(2, MessageType::Pong).unwrap());

        assert!(!tracker.complete(Message::empty(MessageType::Pong, 2)));
        assert_eq!(tracker.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_expires_only_old_requests() {
        // Arrange
        let tracker = tracker();
        let old = tracker.track(1, MessageType::Pong).unwrap();
        tokio::time::advance(Duration::from_millis(300)).await;
        let _young = tracker.track(2, MessageType::Pong).unwrap();
        tokio::time::advance(Duration::from_millis(250)).await;

        // Act
        let expired = tracker.cleanup();

        // Assert
        assert_eq!(expired, 1);
        assert_eq!(old.wait().await, Err(WaitError::TimedOut));
        assert!(!tracker.is_pending(1));
        assert!(tracker.is_pending(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_honours_per_request_timeout() {
        // Arrange – tracker default is 500 ms, this request allows 2 s
        let tracker = tracker();
        let patient = tracker
            .track_with_timeout(4, MessageType::StatusResponse, Duration::from_secs(2))
            .unwrap();
        tokio::time::advance(Duration::from_millis(900)).await;

        // Act
        let expired_early = tracker.cleanup();
        tokio::time::advance(Duration::from_millis(1200)).await;
        let expired_late = tracker.cleanup();

        // Assert
        assert_eq!(expired_early, 0);
        assert_eq!(expired_late, 1);
        assert_eq!(patient.wait().await, Err(WaitError::TimedOut));
    }

    #[tokio::test]
    async fn test_remove_resolves_waiter_as_cancelled() {
        let tracker = tracker();
        let pending = tracker.track(5, MessageType::Pong).unwrap();

        assert!(tracker.remove(5));
        assert!(!tracker.remove(5));
        assert_eq!(pending.wait().await, Err(WaitError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_all_wakes_waiters_and_closes_tracker() {
        // Arrange
        let tracker = Arc::new(tracker());
        let a = tracker.track(1, MessageType::Pong).unwrap();
        let b = tracker.track(2, MessageType::StatusResponse).unwrap();
        let waiter = tokio::spawn(async move { (a.wait().await, b.wait().await) });

        // Act
        let cancelled = tracker.cancel_all();

        // Assert
        assert_eq!(cancelled, 2);
        assert_eq!(
            waiter.await.unwrap(),
            (Err(WaitError::Cancelled), Err(WaitError::Cancelled))
        );
        assert_eq!(
            tracker.track(3, MessageType::Pong).unwrap_err(),
            TrackerError::Cancelled
        );
    }

    #[tokio::test]
    async fn test_concurrent_track_and_complete_deliver_each_reply_once() {
        // Arrange
        let tracker = Arc::new(tracker());
        let waiters: Vec<_> = (0..=255u8)
            .map(|seq| tracker.track(seq, MessageType::Pong).unwrap())
            .collect();

        // Act – complete from several tasks at once
        let mut completers = Vec::new();
        for chunk in 0..4u8 {
            let tracker = Arc::clone(&tracker);
            completers.push(tokio::spawn(async move {
                (0..64u8)
                    .filter(|i| tracker.complete(Message::empty(MessageType::Pong, chunk * 64 + i)))
                    .count()
            }));
        }
        let mut delivered = 0;
        for c in completers {
            delivered += c.await.unwrap();
        }

        // Assert
        assert_eq!(delivered, 256);
        for (seq, waiter) in waiters.into_iter().enumerate() {
            assert_eq!(waiter.wait().await.unwrap().sequence, seq as u8);
        }
        assert_eq!(tracker.pending_count(), 0);
    }
}
