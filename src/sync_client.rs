// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync replication: a single direct HTTP call to the counterpart.
//!
//! Best effort only. The call is bounded by a timeout, never retried, and
//! its outcome never affects publication; the async path is the source of
//! truth. Failures come back as a [`SyncOutcome`] value rather than an error
//! so callers cannot accidentally short-circuit on them with `?`.

use crate::config::SyncConfig;
use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::record::Record;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Why a direct call did not deliver.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncFailure {
    #[error("timed out")]
    Timeout,
    #[error("counterpart unreachable: {0}")]
    Unreachable(String),
    #[error("counterpart rejected the record with status {status}")]
    Rejected { status: u16 },
    #[error("record could not be encoded: {0}")]
    Encode(String),
}

/// Result of one sync attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Counterpart answered 2xx.
    Delivered,
    Failed(SyncFailure),
    /// Sync replication is disabled by configuration.
    Skipped,
}

impl SyncOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Failed(SyncFailure::Timeout) => "timeout",
            Self::Failed(SyncFailure::Unreachable(_)) => "unreachable",
            Self::Failed(SyncFailure::Rejected { .. }) => "rejected",
            Self::Failed(SyncFailure::Encode(_)) => "encode",
            Self::Skipped => "skipped",
        }
    }
}

/// Type alias for boxed sync futures.
pub type SyncFuture<'a> = Pin<Box<dyn Future<Output = SyncOutcome> + Send + 'a>>;

/// Direct delivery of a record to the counterpart service.
pub trait SyncClient: Send + Sync + 'static {
    fn send(&self, record: &Record) -> SyncFuture<'_>;
}

/// [`SyncClient`] that POSTs the record as JSON.
pub struct HttpSyncClient {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpSyncClient {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let timeout = config.timeout_duration();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReplicationError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint(),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Upper bound applied to every call.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn post(&self, record: &Record) -> SyncOutcome {
        let body = match serde_json::to_vec(record) {
            Ok(body) => body,
            Err(e) => return SyncOutcome::Failed(SyncFailure::Encode(e.to_string())),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => SyncOutcome::Delivered,
            Ok(response) => SyncOutcome::Failed(SyncFailure::Rejected {
                status: response.status().as_u16(),
            }),
            Err(e) if e.is_timeout() => SyncOutcome::Failed(SyncFailure::Timeout),
            Err(e) => SyncOutcome::Failed(SyncFailure::Unreachable(e.to_string())),
        }
    }
}

impl SyncClient for HttpSyncClient {
    fn send(&self, record: &Record) -> SyncFuture<'_> {
        let record = record.clone();
        Box::pin(async move {
            let start = Instant::now();
            let outcome = self.post(&record).await;
            let elapsed = start.elapsed();
            metrics::record_sync_attempt(outcome.label(), elapsed);

            match &outcome {
                SyncOutcome::Failed(failure) => warn!(
                    record_id = record.id,
                    endpoint = %self.endpoint,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %failure,
                    "Could not replicate record synchronously"
                ),
                _ => debug!(
                    record_id = record.id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Record replicated synchronously"
                ),
            }
            outcome
        })
    }
}
