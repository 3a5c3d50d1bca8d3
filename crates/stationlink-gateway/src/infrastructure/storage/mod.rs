//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the gateway's TOML file, fills in defaults
//! for anything missing, and writes it back out.

pub mod config;
