//! Station observation ingester service library.
//!
//! Wires configuration, the ingestion pipeline, the interval scheduler and
//! the optional status server together for the `ingester` binary.

pub mod config;
pub mod pipeline;
pub mod scheduler;
pub mod server;
