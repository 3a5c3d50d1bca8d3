//! # stationlink-sim
//!
//! A base-station device that exists only in software.  It speaks the same
//! framed protocol as real hardware over TCP, so the gateway can be developed
//! and tested without a rack of radios on the desk.
//!
//! - **`device`** – request handling and telemetry generation, no I/O.
//! - **`server`** – the TCP listener, one simulated device per connection,
//!   and the fault switches integration tests use.

pub mod device;
pub mod server;

pub use device::SimulatedDevice;
pub use server::{spawn, SimError, SimulatorConfig, SimulatorHandle};
