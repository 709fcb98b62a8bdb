//! Bluetooth RFCOMM client for the schmeep Scheme evaluation service.
//!
//! The client finds a paired device that advertises the service over SDP,
//! connects to its RFCOMM channel and runs a read-eval-print session over a
//! small framed wire protocol. SIGINT interrupts the evaluation in flight
//! instead of killing the client.

pub mod bluetooth;
pub mod cache;
pub mod config;
pub mod error;
pub mod repl;

pub use error::{ClientError, Result};
