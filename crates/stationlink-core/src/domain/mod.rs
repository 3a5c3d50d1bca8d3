//! Domain values reported by a base-station device.
//!
//! Nothing here knows about frames or sockets.  These are the types handed
//! to outer layers (cloud upload, dashboards, alarm managers), which never
//! see raw bytes.

/// Metrics, status, commands, and alerts.
pub mod telemetry;
