//! Event-sourcing kernel: commits and their binary layout, event dispatch,
//! aggregate replay, pluggable codecs, an in-memory backend with optimistic
//! concurrency and transactions, and the session orchestrator on top.

pub mod config;
pub mod domain;
pub mod event_sourcing;
pub mod metrics;
pub mod telemetry;
pub mod utils;
