//! stationlink-gateway library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does the gateway do?
//!
//! The gateway is the management side of the device link.  It owns one
//! connection to a base-station device (over TCP or a serial line) and:
//!
//! 1. Opens the transport and keeps it open, reconnecting after drops.
//! 2. Sends requests (`Ping`, `MetricsRequest`, `StatusRequest`,
//!    `ExecuteCommand`) and matches each reply to its request by sequence
//!    number, with a per-request timeout.
//! 3. Hands everything the device pushes on its own (metric events, threshold
//!    alerts, state changes, errors) to an injected [`MessageHandler`].
//! 4. Sends a heartbeat ping on a fixed interval.
//!
//! [`MessageHandler`]: application::handler::MessageHandler

/// Application layer: request tracking, the session, and handler callbacks.
pub mod application;

/// Infrastructure layer: TCP/serial transports and configuration files.
pub mod infrastructure;
