//! Read-eval-print session over the framed wire protocol.
//!
//! `protocol` and `parser` hold the byte layout of both directions. The
//! rest runs a session: a blocking input thread feeds expressions, the
//! network loop prints output and forwards interrupts, and the pending slot
//! keeps at most one evaluation in flight.

pub mod coordinator;
pub mod input;
pub mod interrupt;
pub mod parser;
pub mod pending;
pub mod protocol;

pub use coordinator::{ReplOptions, run};
