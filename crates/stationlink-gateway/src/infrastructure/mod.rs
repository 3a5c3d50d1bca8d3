//! Infrastructure layer for the gateway.
//!
//! Contains the adapters that touch the outside world.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `stationlink_core`, but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`transport`** – [`Transport`](crate::application::transport::Transport)
//!   implementations for TCP and serial lines, and `from_config` to pick one.
//!
//! - **`storage`** – TOML configuration file loading and saving.

pub mod storage;
pub mod transport;
