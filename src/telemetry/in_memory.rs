use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{LogSeverity, Metric, Operation, Telemetry};
use crate::event_sourcing::EventStoreError;

#[derive(Debug, Clone, PartialEq)]
pub struct OperationEntry {
    pub operation: Operation,
    pub success: bool,
    pub elapsed: Duration,
    pub correlation_id: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricEntry {
    pub metric: Metric,
    pub value: i64,
    pub correlation_id: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub severity: LogSeverity,
    pub message: String,
    pub correlation_id: String,
    pub recorded_at: DateTime<Utc>,
}

/// Everything recorded for one stream, in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamTelemetry {
    pub operations: Vec<OperationEntry>,
    pub metrics: Vec<MetricEntry>,
    pub logs: Vec<LogEntry>,
}

impl StreamTelemetry {
    pub fn metric_values(&self, metric: Metric) -> Vec<i64> {
        self.metrics
            .iter()
            .filter(|m| m.metric == metric)
            .map(|m| m.value)
            .collect()
    }

    pub fn logs_at(&self, severity: LogSeverity) -> Vec<&LogEntry> {
        self.logs.iter().filter(|l| l.severity == severity).collect()
    }
}

#[derive(Default)]
struct Recorded {
    streams: HashMap<String, StreamTelemetry>,
    failed_without_stream_id: Vec<OperationEntry>,
}

/// Keeps every call in memory, grouped by stream id.
#[derive(Default)]
pub struct InMemoryTelemetry {
    recorded: Mutex<Recorded>,
}

impl InMemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn stream(&self, stream_id: &str) -> Option<StreamTelemetry> {
        self.lock().streams.get(stream_id).cloned()
    }

    pub fn stream_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().streams.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn failures_without_stream_id(&self) -> Vec<OperationEntry> {
        self.lock().failed_without_stream_id.clone()
    }

    pub fn reset(&self) {
        *self.lock() = Recorded::default();
    }

    /// Aggregates everything recorded so far.
    pub fn report(&self) -> TelemetryReport {
        let recorded = self.lock();

        let operations: Vec<&OperationEntry> = recorded
            .streams
            .values()
            .flat_map(|s| s.operations.iter())
            .chain(recorded.failed_without_stream_id.iter())
            .collect();
        let metrics: Vec<&MetricEntry> = recorded.streams.values().flat_map(|s| s.metrics.iter()).collect();

        let mut report = TelemetryReport::default();

        for operation in Operation::ALL {
            let entries: Vec<&&OperationEntry> = operations.iter().filter(|e| e.operation == operation).collect();
            if entries.is_empty() {
                continue;
            }
            let success = entries.iter().filter(|e| e.success).count();
            let millis = entries.iter().map(|e| e.elapsed.as_micros() as f64 / 1000.0).collect();
            let summary = Summary::of(millis);
            report.operations.insert(
                operation,
                OperationStats {
                    success,
                    failure: entries.len() - success,
                    min_ms: summary.min,
                    max_ms: summary.max,
                    avg_ms: summary.avg,
                    median_ms: summary.median,
                    p95_ms: summary.p95,
                },
            );
        }

        let mut by_metric: BTreeMap<Metric, Vec<f64>> = BTreeMap::new();
        for entry in metrics {
            by_metric.entry(entry.metric).or_default().push(entry.value as f64);
        }
        for (metric, values) in by_metric {
            let count = values.len();
            let sum = values.iter().sum();
            let summary = Summary::of(values);
            report.metrics.insert(
                metric,
                MetricStats {
                    count,
                    sum,
                    min: summary.min,
                    max: summary.max,
                    avg: summary.avg,
                    median: summary.median,
                    p95: summary.p95,
                },
            );
        }

        report
    }

    fn with_stream<F>(&self, stream_id: &str, record: F)
    where
        F: FnOnce(&mut StreamTelemetry),
    {
        let mut recorded = self.lock();
        record(recorded.streams.entry(stream_id.to_string()).or_default());
    }
}

impl Telemetry for InMemoryTelemetry {
    fn track_success(&self, operation: Operation, elapsed: Duration, correlation_id: &str, stream_id: &str) {
        let entry = OperationEntry {
            operation,
            success: true,
            elapsed,
            correlation_id: correlation_id.to_string(),
            recorded_at: Utc::now(),
        };
        self.with_stream(stream_id, |s| s.operations.push(entry));
    }

    fn track_failure(
        &self,
        operation: Operation,
        elapsed: Duration,
        _error: &EventStoreError,
        correlation_id: &str,
        stream_id: Option<&str>,
    ) {
        let entry = OperationEntry {
            operation,
            success: false,
            elapsed,
            correlation_id: correlation_id.to_string(),
            recorded_at: Utc::now(),
        };
        match stream_id {
            Some(stream_id) => self.with_stream(stream_id, |s| s.operations.push(entry)),
            None => self.lock().failed_without_stream_id.push(entry),
        }
    }

    fn track(&self, metric: Metric, value: i64, correlation_id: &str, stream_id: &str) {
        let entry = MetricEntry {
            metric,
            value,
            correlation_id: correlation_id.to_string(),
            recorded_at: Utc::now(),
        };
        self.with_stream(stream_id, |s| s.metrics.push(entry));
    }

    fn log(&self, severity: LogSeverity, message: &str, correlation_id: &str, stream_id: &str) {
        let entry = LogEntry {
            severity,
            message: message.to_string(),
            correlation_id: correlation_id.to_string(),
            recorded_at: Utc::now(),
        };
        self.with_stream(stream_id, |s| s.logs.push(entry));
    }
}

// ============================================================================
// Report
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct OperationStats {
    pub success: usize,
    pub failure: usize,
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    pub median_ms: f64,
    pub p95_ms: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricStats {
    pub count: usize,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub median: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryReport {
    pub operations: BTreeMap<Operation, OperationStats>,
    pub metrics: BTreeMap<Metric, MetricStats>,
}

struct Summary {
    min: f64,
    max: f64,
    avg: f64,
    median: f64,
    p95: f64,
}

impl Summary {
    /// `values` must not be empty.
    fn of(mut values: Vec<f64>) -> Self {
        values.sort_by(|a, b| a.total_cmp(b));
        let n = values.len();
        let avg = values.iter().sum::<f64>() / n as f64;
        let median = if n % 2 == 0 {
            (values[n / 2 - 1] + values[n / 2]) / 2.0
        } else {
            values[n / 2]
        };
        // nearest rank
        let rank = ((0.95 * n as f64).ceil() as usize).clamp(1, n);

        Self {
            min: values[0],
            max: values[n - 1],
            avg,
            median,
            p95: values[rank - 1],
        }
    }
}
