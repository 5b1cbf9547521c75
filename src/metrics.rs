//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Sync path attempts and latency
//! - Publishes and dropped envelopes
//! - Broker connection status (publisher and subscriber)
//! - Subscriber state, receives, acknowledgements and redeliveries
//! - Dispatch outcomes and record applies
//! - Replication lag (publish to apply)
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `replication_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! # Usage
//!
//! ```rust,no_run
//! use record_replication::metrics;
//! use std::time::Duration;
//!
//! metrics::record_sync_attempt("delivered", Duration::from_millis(12));
//! metrics::record_dispatch("record-created", "handled", Duration::from_millis(3));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// =============================================================================
// Sync Path
// =============================================================================

/// Record a direct call to the counterpart, labelled by outcome.
pub fn record_sync_attempt(outcome: &str, duration: Duration) {
    counter!("replication_sync_attempts_total", "outcome" => outcome.to_string()).increment(1);
    histogram!("replication_sync_duration_seconds", "outcome" => outcome.to_string())
        .record(duration.as_secs_f64());
}

/// Record a request served by the ingestion endpoint.
pub fn record_ingest(status: u16) {
    counter!("replication_ingest_requests_total", "status" => status.to_string()).increment(1);
}

// =============================================================================
// Publisher
// =============================================================================

/// Record a publish attempt.
pub fn record_publish(stream: &str, success: bool, duration: Duration) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "replication_publishes_total",
        "stream" => stream.to_string(),
        "status" => status
    )
    .increment(1);
    histogram!("replication_publish_duration_seconds", "stream" => stream.to_string())
        .record(duration.as_secs_f64());
}

/// Record an envelope dropped after the reconnect attempt also failed.
pub fn record_publish_dropped(kind: &str) {
    counter!("replication_publish_dropped_total", "kind" => kind.to_string()).increment(1);
}

// =============================================================================
// Broker Connections
// =============================================================================

/// Record a broker connection attempt (`role` = publisher | subscriber).
pub fn record_broker_connection(role: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "replication_broker_connections_total",
        "role" => role.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record that a previously working connection was found broken.
pub fn record_broker_disconnect(role: &str) {
    counter!("replication_broker_disconnects_total", "role" => role.to_string()).increment(1);
}

/// Gauge: 1 while the role holds a live connection.
pub fn set_broker_connected(role: &str, connected: bool) {
    gauge!("replication_broker_connected", "role" => role.to_string())
        .set(if connected { 1.0 } else { 0.0 });
}

// =============================================================================
// Subscriber
// =============================================================================

/// Gauge for subscriber state.
pub fn set_subscriber_state(queue: &str, state: &str) {
    // Numeric encoding for alerting
    let value = match state {
        "Disconnected" => 0.0,
        "Connecting" => 1.0,
        "Bound" => 2.0,
        "Consuming" => 3.0,
        "Stopped" => 4.0,
        _ => -1.0,
    };
    gauge!("replication_subscriber_state", "queue" => queue.to_string()).set(value);
}

/// Record messages returned by one read.
pub fn record_messages_received(queue: &str, count: usize) {
    counter!("replication_messages_received_total", "queue" => queue.to_string())
        .increment(count as u64);
}

/// Record pending messages re-read after a reconnect or transient failure.
pub fn record_redeliveries(queue: &str, count: usize) {
    if count > 0 {
        counter!("replication_redeliveries_total", "queue" => queue.to_string())
            .increment(count as u64);
    }
}

/// Record an acknowledgement.
pub fn record_ack(queue: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "replication_acks_total",
        "queue" => queue.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record a blocking read.
pub fn record_consume_read(queue: &str, duration: Duration) {
    histogram!("replication_consume_read_duration_seconds", "queue" => queue.to_string())
        .record(duration.as_secs_f64());
}

/// Record time from publish to apply, when the envelope carries a timestamp.
pub fn record_replication_lag_ms(queue: &str, lag_ms: u64) {
    gauge!("replication_lag_ms", "queue" => queue.to_string()).set(lag_ms as f64);
    histogram!("replication_lag_seconds", "queue" => queue.to_string())
        .record(lag_ms as f64 / 1000.0);
}

// =============================================================================
// Dispatch and Apply
// =============================================================================

/// Record a dispatch outcome (handled | ignored | rejected | failed).
pub fn record_dispatch(kind: &str, outcome: &str, duration: Duration) {
    counter!(
        "replication_dispatch_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!("replication_dispatch_duration_seconds", "kind" => kind.to_string())
        .record(duration.as_secs_f64());
}

/// Record a handler panic caught by the dispatcher.
pub fn record_handler_panic(kind: &str) {
    counter!("replication_handler_panics_total", "kind" => kind.to_string()).increment(1);
}

/// Record a record apply: `applied = false` means the id was already present.
pub fn record_apply(source: &str, applied: bool) {
    if applied {
        counter!("replication_records_applied_total", "source" => source.to_string())
            .increment(1);
    } else {
        counter!("replication_records_duplicate_total", "source" => source.to_string())
            .increment(1);
    }
}

/// Record store SQLite retry (for SQLITE_BUSY/SQLITE_LOCKED).
pub fn store_retries_total(operation: &str) {
    counter!("replication_store_retries_total", "operation" => operation.to_string())
        .increment(1);
}

/// Record errors by component and type.
pub fn record_error(component: &str, error_type: &str) {
    counter!(
        "replication_errors_total",
        "component" => component.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}
