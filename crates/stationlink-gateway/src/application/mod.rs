//! Application layer of the gateway.
//!
//! # What lives here?
//!
//! - **`tracker`** – Correlates outgoing requests with their responses by
//!   sequence number and expires the ones that never get an answer.
//!
//! - **`session`** – The connection/session manager.  Owns the transport,
//!   runs the receive and heartbeat loops, reconnects, and exposes
//!   `send` / `send_and_wait` plus typed request helpers.
//!
//! - **`handler`** – The callback trait for unsolicited device traffic and the
//!   routing function that decodes those messages.
//!
//! - **`transport`** – The byte-stream port the session drives.  Concrete
//!   TCP and serial adapters live in the infrastructure layer.

pub mod handler;
pub mod session;
pub mod tracker;
pub mod transport;
