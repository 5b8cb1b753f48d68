// ============================================================================
// Telemetry - operation timings, metrics and log lines per stream
// ============================================================================
//
// The event store reports every operation through this trait and must work
// the same with the no-op implementation. Implementations:
//
// - VoidTelemetry        drops everything
// - InMemoryTelemetry    keeps everything, per stream (tests, diagnostics)
// - PrometheusTelemetry  counters and histograms (see crate::metrics)
//
// ============================================================================

mod in_memory;

use std::fmt;
use std::time::Duration;

use crate::event_sourcing::EventStoreError;

pub use in_memory::{
    InMemoryTelemetry, LogEntry, MetricEntry, MetricStats, OperationEntry, OperationStats, StreamTelemetry,
    TelemetryReport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operation {
    Load,
    Hydrate,
    Save,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 4] = [Self::Load, Self::Hydrate, Self::Save, Self::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Hydrate => "hydrate",
            Self::Save => "save",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Metric {
    CommitsPerLoad,
    BytesPerLoad,
    VersionConflict,
    StreamTooLong,
    /// Microseconds.
    DeserializeTime,
    /// Microseconds.
    SerializeTime,
    EmptyStream,
    /// Payload bytes of a saved commit.
    CommitSize,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommitsPerLoad => "commits_per_load",
            Self::BytesPerLoad => "bytes_per_load",
            Self::VersionConflict => "version_conflict",
            Self::StreamTooLong => "stream_too_long",
            Self::DeserializeTime => "deserialize_time",
            Self::SerializeTime => "serialize_time",
            Self::EmptyStream => "empty_stream",
            Self::CommitSize => "commit_size",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for LogSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait Telemetry: Send + Sync {
    fn track_success(&self, operation: Operation, elapsed: Duration, correlation_id: &str, stream_id: &str);

    /// `stream_id` is `None` when the operation failed before one was known.
    fn track_failure(
        &self,
        operation: Operation,
        elapsed: Duration,
        error: &EventStoreError,
        correlation_id: &str,
        stream_id: Option<&str>,
    );

    fn track(&self, metric: Metric, value: i64, correlation_id: &str, stream_id: &str);

    fn log(&self, severity: LogSeverity, message: &str, correlation_id: &str, stream_id: &str);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VoidTelemetry;

impl Telemetry for VoidTelemetry {
    fn track_success(&self, _: Operation, _: Duration, _: &str, _: &str) {}

    fn track_failure(&self, _: Operation, _: Duration, _: &EventStoreError, _: &str, _: Option<&str>) {}

    fn track(&self, _: Metric, _: i64, _: &str, _: &str) {}

    fn log(&self, _: LogSeverity, _: &str, _: &str, _: &str) {}
}
