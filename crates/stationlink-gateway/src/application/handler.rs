//! Callbacks for traffic the device sends on its own initiative.
//!
//! Anything the request tracker does not claim ends up here: pushed metric
//! events, threshold alerts, state changes, device errors, and replies that
//! arrived after their request had already timed out.  The session decodes
//! the payload and calls the matching [`MessageHandler`] method.
//!
//! Handlers run on the session's receive task, so they should return quickly.
//! Forward work to a channel when it may block.

use stationlink_core::{Alert, DeviceError, DeviceMessage, DeviceStatus, Message, Metric};
use tracing::{debug, info, warn};

use super::session::ConnectionState;

/// Receives unsolicited device traffic.
///
/// Every method has an empty default body, so an implementation only needs
/// to override what it cares about.
#[cfg_attr(test, mockall::automock)]
pub trait MessageHandler: Send + Sync {
    /// Pushed metric events and metric responses that arrived too late.
    fn on_metrics(&self, _metrics: &[Metric]) {}

    /// Status responses that arrived too late.
    fn on_status(&self, _status: &DeviceStatus) {}

    /// Threshold crossings and device state changes.
    fn on_alert(&self, _alert: &Alert) {}

    /// Device-reported errors, and local failures to decode a device payload
    /// (code [`DeviceError::LOCAL_DECODE_FAILURE`]).
    fn on_error(&self, _error: &DeviceError) {}

    fn on_connection_state(&self, _state: ConnectionState) {}
}

/// Handler that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHandler;

impl MessageHandler for NullHandler {}

/// Handler that writes every callback to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl MessageHandler for LoggingHandler {
    fn on_metrics(&self, metrics: &[Metric]) {
        for metric in metrics {
            info!(metric = %metric, "metric");
        }
    }

    fn on_status(&self, status: &DeviceStatus) {
        info!(
            state = ?status.state,
            uptime_secs = status.uptime_secs,
            alarms = status.active_alarms,
            cpu = status.cpu_load_pct,
            temperature_c = status.temperature_c,
            "device status"
        );
    }

    fn on_alert(&self, alert: &Alert) {
        match alert {
            Alert::Threshold(t) => warn!(
                metric = %t.metric,
                value = t.value,
                threshold = t.threshold,
                severity = ?t.severity,
                "threshold exceeded"
            ),
            Alert::StateChange(c) => {
                warn!(previous = ?c.previous, current = ?c.current, "device state changed")
            }
        }
    }

    fn on_error(&self, error: &DeviceError) {
        warn!("{error}");
    }

    fn on_connection_state(&self, state: ConnectionState) {
        info!(?state, "connection state");
    }
}

/// Decodes an unclaimed message and calls the matching handler method.
pub fn dispatch_unsolicited(handler: &dyn MessageHandler, msg: &Message) {
    let decoded = match DeviceMessage::decode(msg) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!(
                message_type = ?msg.message_type,
                sequence = msg.sequence,
                "undecodable device payload: {e}"
            );
            handler.on_error(&DeviceError::new(
                DeviceError::LOCAL_DECODE_FAILURE,
                format!("{:?} payload: {e}", msg.message_type),
            ));
            return;
        }
    };

    match decoded {
        DeviceMessage::MetricsEvent(metrics) | DeviceMessage::MetricsResponse(metrics) => {
            handler.on_metrics(&metrics)
        }
        DeviceMessage::StatusResponse(status) => handler.on_status(&status),
        DeviceMessage::ThresholdExceeded(alert) => handler.on_alert(&Alert::Threshold(alert)),
        DeviceMessage::DeviceStateChange(change) => {
            handler.on_alert(&Alert::StateChange(change))
        }
        DeviceMessage::Error(error) => handler.on_error(&error),
        other => debug!(
            message_type = ?other.message_type(),
            sequence = msg.sequence,
            "ignoring unsolicited message"
        ),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use stationlink_core::{
        DeviceState, MessageType, MetricKind, Severity, StateChange, ThresholdAlert,
    };

    fn wire(msg: DeviceMessage) -> Message {
        msg.into_message(0x42).unwrap()
    }

    #[test]
    fn test_metrics_event_goes_to_on_metrics() {
        // Arrange
        let mut handler = MockMessageHandler::new();
        handler
            .expect_on_metrics()
            .withf(|m| m.len() == 1 && m[0].kind == MetricKind::Humidity)
            .times(1)
            .return_const(());

        // Act
        dispatch_unsolicited(
            &handler,
            &wire(DeviceMessage::MetricsEvent(vec![Metric::new(MetricKind::Humidity, 61.0)])),
        );

        // Assert – verified when the mock is dropped
    }

    #[test]
    fn test_late_metrics_response_goes_to_on_metrics() {
        let mut handler = MockMessageHandler::new();
        handler.expect_on_metrics().times(1).return_const(());

        dispatch_unsolicited(&handler, &wire(DeviceMessage::MetricsResponse(vec![])));
    }

    #[test]
    fn test_late_status_goes_to_on_status() {
        let mut handler = MockMessageHandler::new();
        handler
            .expect_on_status()
            .withf(|s| s.state == DeviceState::Maintenance)
            .times(1)
            .return_const(());

        dispatch_unsolicited(
            &handler,
            &wire(DeviceMessage::StatusResponse(DeviceStatus {
                state: DeviceState::Maintenance,
                uptime_secs: 10,
                active_alarms: 0,
                cpu_load_pct: 3,
                temperature_c: 30.0,
            })),
        );
    }

    #[test]
    fn test_threshold_and_state_change_go_to_on_alert() {
        // Arrange
        let mut handler = MockMessageHandler::new();
        handler
            .expect_on_alert()
            .withf(|a| matches!(a, Alert::Threshold(t) if t.severity == Severity::Critical))
            .times(1)
            .return_const(());
        handler
            .expect_on_alert()
            .withf(|a| matches!(a, Alert::StateChange(c) if c.current == DeviceState::Fault))
            .times(1)
            .return_const(());

        // Act
        dispatch_unsolicited(
            &handler,
            &wire(DeviceMessage::ThresholdExceeded(ThresholdAlert {
                metric: MetricKind::Temperature,
                value: 95.0,
                threshold: 85.0,
                severity: Severity::Critical,
            })),
        );
        dispatch_unsolicited(
            &handler,
            &wire(DeviceMessage::DeviceStateChange(StateChange {
                previous: DeviceState::Degraded,
                current: DeviceState::Fault,
            })),
        );
    }

    #[test]
    fn test_device_error_goes_to_on_error() {
        let mut handler = MockMessageHandler::new();
        handler
            .expect_on_error()
            .withf(|e| e.code == 0x10 && e.message == "fan failure")
            .times(1)
            .return_const(());

        dispatch_unsolicited(
            &handler,
            &wire(DeviceMessage::Error(DeviceError::new(0x10, "fan failure"))),
        );
    }

    #[test]
    fn test_undecodable_payload_is_reported_as_local_error() {
        // Arrange – a metrics event that claims 3 entries but carries none
        let mut handler = MockMessageHandler::new();
        handler
            .expect_on_error()
            .withf(|e| e.code == DeviceError::LOCAL_DECODE_FAILURE)
            .times(1)
            .return_const(());

        // Act
        dispatch_unsolicited(&handler, &Message::new(MessageType::MetricsEvent, 1, vec![3]));
    }

    #[test]
    fn test_unsolicited_pong_calls_nothing() {
        // A mock with no expectations panics on any call.
        let handler = MockMessageHandler::new();
        dispatch_unsolicited(&handler, &Message::empty(MessageType::Pong, 1));
    }
}
