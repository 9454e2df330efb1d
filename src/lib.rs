//! canwatch: vehicle-bus signal monitor.
//!
//! Follows an append-only log of `(timestamp, signal id, value)` rows,
//! flags signals that fall silent or report values outside their physical
//! envelope, writes every fault to a durable ledger, and prints periodic
//! liveness summaries.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Static signal catalog.
pub mod catalog;
/// Configuration loading and validation.
pub mod config;
/// Pure timeout and range checks.
pub mod detector;
/// Control loop tying the reader, state, detectors, and ledger together.
pub mod engine;
/// Append-only fault ledger.
pub mod ledger;
/// Structured logging setup.
pub mod logging;
/// Periodic liveness and fault summaries.
pub mod reporter;
/// Producer simulator.
pub mod simulator;
/// Per-signal state tracking.
pub mod state;
/// Incremental log follower.
pub mod tailer;
