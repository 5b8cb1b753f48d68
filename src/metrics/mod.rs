use prometheus::{Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};
use std::time::Duration;

use crate::event_sourcing::EventStoreError;
use crate::telemetry::{LogSeverity, Metric, Operation, Telemetry};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Telemetry implementation backed by a private Prometheus registry:
// - Store operations (count by outcome, latency)
// - Load shape (commits and bytes per load, empty streams)
// - Save shape (commit size, codec timings)
// - Optimistic concurrency conflicts and stream length violations
//
// The store writes its own log lines through `tracing`; only their count
// ends up here.
// ============================================================================

pub struct PrometheusTelemetry {
    registry: Registry,

    // Operation Metrics
    pub operations_total: IntCounterVec,
    pub operation_duration: HistogramVec,

    // Load Metrics
    pub commits_per_load: Histogram,
    pub bytes_per_load: Histogram,
    pub empty_streams: IntCounter,

    // Save Metrics
    pub commit_size: Histogram,
    pub codec_duration: HistogramVec,

    // Concurrency Metrics
    pub version_conflicts: IntCounter,
    pub streams_too_long: IntCounter,

    pub log_messages: IntCounterVec,
}

impl PrometheusTelemetry {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Operation Metrics
        let operations_total = IntCounterVec::new(
            Opts::new("event_store_operations_total", "Total event store operations"),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new("event_store_operation_duration_seconds", "Event store operation duration")
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        // Load Metrics
        let commits_per_load = Histogram::with_opts(
            HistogramOpts::new("event_store_commits_per_load", "Commits read per stream load")
                .buckets(vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0]),
        )?;
        registry.register(Box::new(commits_per_load.clone()))?;

        let bytes_per_load = Histogram::with_opts(
            HistogramOpts::new("event_store_bytes_per_load", "Payload bytes read per stream load")
                .buckets(prometheus::exponential_buckets(256.0, 4.0, 8)?),
        )?;
        registry.register(Box::new(bytes_per_load.clone()))?;

        let empty_streams = IntCounter::new(
            "event_store_empty_streams_total",
            "Loads that found no commits",
        )?;
        registry.register(Box::new(empty_streams.clone()))?;

        // Save Metrics
        let commit_size = Histogram::with_opts(
            HistogramOpts::new("event_store_commit_size_bytes", "Payload bytes per saved commit")
                .buckets(prometheus::exponential_buckets(64.0, 4.0, 7)?),
        )?;
        registry.register(Box::new(commit_size.clone()))?;

        let codec_duration = HistogramVec::new(
            HistogramOpts::new("event_store_codec_duration_seconds", "Time spent serializing or deserializing")
                .buckets(vec![0.00001, 0.0001, 0.001, 0.01, 0.1]),
            &["direction"],
        )?;
        registry.register(Box::new(codec_duration.clone()))?;

        // Concurrency Metrics
        let version_conflicts = IntCounter::new(
            "event_store_version_conflicts_total",
            "Saves rejected because the version already existed",
        )?;
        registry.register(Box::new(version_conflicts.clone()))?;

        let streams_too_long = IntCounter::new(
            "event_store_streams_too_long_total",
            "Loads of streams past a length threshold",
        )?;
        registry.register(Box::new(streams_too_long.clone()))?;

        let log_messages = IntCounterVec::new(
            Opts::new("event_store_log_messages_total", "Log lines reported by the event store"),
            &["severity"],
        )?;
        registry.register(Box::new(log_messages.clone()))?;

        Ok(Self {
            registry,
            operations_total,
            operation_duration,
            commits_per_load,
            bytes_per_load,
            empty_streams,
            commit_size,
            codec_duration,
            version_conflicts,
            streams_too_long,
            log_messages,
        })
    }

    /// Get the Prometheus registry for exposing metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Helper to record a finished operation
    pub fn record_operation(&self, operation: Operation, elapsed: Duration, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.operations_total
            .with_label_values(&[operation.as_str(), outcome])
            .inc();
        self.operation_duration
            .with_label_values(&[operation.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    /// Helper to record a metric sample
    pub fn record_metric(&self, metric: Metric, value: i64) {
        match metric {
            Metric::CommitsPerLoad => self.commits_per_load.observe(value as f64),
            Metric::BytesPerLoad => self.bytes_per_load.observe(value as f64),
            Metric::EmptyStream => self.empty_streams.inc_by(value.max(0) as u64),
            Metric::CommitSize => self.commit_size.observe(value as f64),
            Metric::VersionConflict => self.version_conflicts.inc_by(value.max(0) as u64),
            Metric::StreamTooLong => self.streams_too_long.inc_by(value.max(0) as u64),
            Metric::SerializeTime => self
                .codec_duration
                .with_label_values(&["serialize"])
                .observe(micros_to_secs(value)),
            Metric::DeserializeTime => self
                .codec_duration
                .with_label_values(&["deserialize"])
                .observe(micros_to_secs(value)),
        }
    }
}

fn micros_to_secs(value: i64) -> f64 {
    value as f64 / 1_000_000.0
}

impl Telemetry for PrometheusTelemetry {
    fn track_success(&self, operation: Operation, elapsed: Duration, _correlation_id: &str, _stream_id: &str) {
        self.record_operation(operation, elapsed, true);
    }

    fn track_failure(
        &self,
        operation: Operation,
        elapsed: Duration,
        error: &EventStoreError,
        correlation_id: &str,
        stream_id: Option<&str>,
    ) {
        self.record_operation(operation, elapsed, false);
        tracing::debug!(
            operation = %operation,
            correlation_id,
            stream_id = stream_id.unwrap_or("-"),
            error = %error,
            "Event store operation failed"
        );
    }

    fn track(&self, metric: Metric, value: i64, _correlation_id: &str, _stream_id: &str) {
        self.record_metric(metric, value);
    }

    fn log(&self, severity: LogSeverity, _message: &str, _correlation_id: &str, _stream_id: &str) {
        self.log_messages.with_label_values(&[severity.as_str()]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = PrometheusTelemetry::new().unwrap();
        metrics.record_operation(Operation::Load, Duration::from_millis(1), true);
        assert!(!metrics.registry().gather().is_empty());
    }

    #[test]
    fn test_record_operation() {
        let metrics = PrometheusTelemetry::new().unwrap();
        metrics.track_success(Operation::Save, Duration::from_millis(3), "c", "s");
        metrics.track_success(Operation::Save, Duration::from_millis(4), "c", "s");
        let error = EventStoreError::version_conflict("s", 1);
        metrics.track_failure(Operation::Save, Duration::from_millis(1), &error, "c", None);

        let ok = metrics.operations_total.with_label_values(&["save", "success"]).get();
        let failed = metrics.operations_total.with_label_values(&["save", "failure"]).get();
        assert_eq!(ok, 2);
        assert_eq!(failed, 1);
        assert_eq!(metrics.operation_duration.with_label_values(&["save"]).get_sample_count(), 3);
    }

    #[test]
    fn test_record_conflicts_and_length() {
        let metrics = PrometheusTelemetry::new().unwrap();
        metrics.track(Metric::VersionConflict, 1, "c", "s");
        metrics.track(Metric::VersionConflict, 1, "c", "s");
        metrics.track(Metric::StreamTooLong, 1, "c", "s");
        metrics.track(Metric::EmptyStream, 1, "c", "s");

        assert_eq!(metrics.version_conflicts.get(), 2);
        assert_eq!(metrics.streams_too_long.get(), 1);
        assert_eq!(metrics.empty_streams.get(), 1);
    }

    #[test]
    fn test_record_load_shape() {
        let metrics = PrometheusTelemetry::new().unwrap();
        metrics.track(Metric::CommitsPerLoad, 12, "c", "s");
        metrics.track(Metric::BytesPerLoad, 4096, "c", "s");
        metrics.track(Metric::DeserializeTime, 250, "c", "s");

        assert_eq!(metrics.commits_per_load.get_sample_sum(), 12.0);
        assert_eq!(metrics.bytes_per_load.get_sample_count(), 1);
        assert_eq!(
            metrics.codec_duration.with_label_values(&["deserialize"]).get_sample_count(),
            1
        );
    }

    #[test]
    fn test_log_is_counted_by_severity() {
        let metrics = PrometheusTelemetry::new().unwrap();
        metrics.log(LogSeverity::Warning, "stream is getting long", "c", "s");
        metrics.log(LogSeverity::Warning, "stream is getting long", "c", "s");
        metrics.log(LogSeverity::Error, "stream is too long", "c", "s");

        assert_eq!(metrics.log_messages.with_label_values(&["warning"]).get(), 2);
        assert_eq!(metrics.log_messages.with_label_values(&["error"]).get(), 1);
    }
}
