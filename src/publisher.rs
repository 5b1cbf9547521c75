// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Event publisher.
//!
//! Keeps one lazily created, long-lived broker connection and appends
//! envelopes to the exchange stream chosen by the topology.
//!
//! # Connection Lifecycle
//!
//! ```text
//!   publish ──▶ ensure_connected ──▶ XADD ──ok──▶ id
//!                    │                 │
//!               connect fails      fails: mark disconnected
//!                    │                 ▼
//!                    │            reconnect ──▶ XADD once more ──ok──▶ id
//!                    ▼                 │                │
//!                  drop ◀──────────────┴──── fails ─────┘
//! ```
//!
//! "Drop" means the envelope is logged at `error`, counted in
//! `replication_publish_dropped_total`, and the error is returned. The
//! creation path is never blocked beyond the bounded reconnect policy
//! ([`RetryConfig::publisher()`]).
//!
//! The connection lives in an `RwLock<Option<..>>` slot. Callers clone the
//! handle out and release the lock before any I/O; each stored connection
//! carries a generation so a stale failure cannot evict a newer connection.
//! Connecting is serialized by a separate mutex and the slot is re-checked
//! once it is held, so concurrent callers share a single new connection.

use crate::broker::{Broker, BrokerConnection};
use crate::config::BrokerConfig;
use crate::envelope::EventEnvelope;
use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::record::Record;
use crate::resilience::RetryConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

const ROLE: &str = "publisher";

/// Publishes event envelopes to the exchange.
pub struct EventPublisher<B: Broker> {
    broker: B,
    config: BrokerConfig,
    retry: RetryConfig,
    /// Current connection and its generation (None if disconnected).
    conn: RwLock<Option<(u64, B::Connection)>>,
    /// Held while connecting (never while publishing).
    connect_lock: Mutex<()>,
    generation: AtomicU64,
}

impl<B: Broker> EventPublisher<B> {
    /// Create a publisher (not yet connected).
    pub fn new(broker: B, config: &BrokerConfig) -> Self {
        Self {
            broker,
            config: config.clone(),
            retry: RetryConfig::publisher()
                .with_connection_timeout(config.connect_timeout_duration()),
            conn: RwLock::new(None),
            connect_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Override the reconnect policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.read().await.is_some()
    }

    async fn connection(&self) -> Option<(u64, B::Connection)> {
        self.conn.read().await.clone()
    }

    /// Connect with the bounded retry policy and store the connection.
    async fn connect(&self) -> Result<(u64, B::Connection)> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = match timeout(self.retry.connection_timeout, self.broker.connect()).await {
                Ok(result) => result,
                Err(_) => Err(ReplicationError::broker_msg(
                    "CONNECT",
                    format!(
                        "timed out after {}ms",
                        self.retry.connection_timeout.as_millis()
                    ),
                )),
            };

            match result {
                Ok(conn) => {
                    let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
                    *self.conn.write().await = Some((generation, conn.clone()));
                    metrics::record_broker_connection(ROLE, true);
                    metrics::set_broker_connected(ROLE, true);
                    if attempt > 1 {
                        info!(attempt, "Publisher connected to broker after retry");
                    } else {
                        debug!("Publisher connected to broker");
                    }
                    return Ok((generation, conn));
                }
                Err(e) => {
                    metrics::record_broker_connection(ROLE, false);
                    if self.retry.is_exhausted(attempt) {
                        warn!(attempt, error = %e, "Publisher could not connect to broker");
                        return Err(e);
                    }
                    let delay = self.retry.delay_for_attempt(attempt);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Publisher connect failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Reuse the current connection or open one lazily.
    async fn ensure_connected(&self) -> Result<(u64, B::Connection)> {
        if let Some(slot) = self.connection().await {
            return Ok(slot);
        }

        let _connecting = self.connect_lock.lock().await;
        // Another caller may have connected while this one waited
        if let Some(slot) = self.connection().await {
            return Ok(slot);
        }
        self.connect().await
    }

    /// Forget the connection of `generation` so the next publish reconnects.
    async fn mark_disconnected(&self, generation: u64) {
        let mut slot = self.conn.write().await;
        if matches!(slot.as_ref(), Some((current, _)) if *current == generation) {
            *slot = None;
            metrics::record_broker_disconnect(ROLE);
            metrics::set_broker_connected(ROLE, false);
            warn!(generation, "Publisher connection marked as disconnected");
        }
    }

    async fn send(&self, conn: &B::Connection, stream: &str, body: &[u8]) -> Result<String> {
        let start = Instant::now();
        let publish_timeout = self.config.publish_timeout_duration();
        let result = match timeout(
            publish_timeout,
            conn.publish(stream, body, self.config.max_len),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ReplicationError::broker_msg(
                "XADD",
                format!("timed out after {}ms", publish_timeout.as_millis()),
            )),
        };
        metrics::record_publish(stream, result.is_ok(), start.elapsed());
        result
    }

    /// Publish an envelope, reconnecting once if the connection is broken.
    ///
    /// Returns the broker message id. On error the envelope has been dropped.
    pub async fn publish(&self, envelope: &EventEnvelope) -> Result<String> {
        let stamped;
        let envelope = if envelope.published_at.is_none() {
            stamped = envelope.clone().stamped();
            &stamped
        } else {
            envelope
        };
        let body = envelope.to_bytes()?;
        let stream = self.config.stream_for(&envelope.kind);

        let first = match self.ensure_connected().await {
            Ok((generation, conn)) => match self.send(&conn, &stream, &body).await {
                Ok(id) => return Ok(id),
                Err(e) => {
                    warn!(stream = %stream, error = %e, "Publish failed, reconnecting");
                    self.mark_disconnected(generation).await;
                    e
                }
            },
            // ensure_connected already ran the reconnect policy
            Err(e) => {
                self.drop_envelope(envelope, &stream, &e);
                return Err(e);
            }
        };

        let retried = async {
            let (_, conn) = self.ensure_connected().await?;
            self.send(&conn, &stream, &body).await
        }
        .await;

        match retried {
            Ok(id) => {
                info!(stream = %stream, id = %id, "Publish succeeded after reconnect");
                Ok(id)
            }
            Err(e) => {
                debug!(first_error = %first, "First publish attempt error");
                self.drop_envelope(envelope, &stream, &e);
                Err(e)
            }
        }
    }

    /// Publish the `record-created` envelope for a record.
    pub async fn publish_record_created(&self, record: &Record) -> Result<String> {
        let envelope = EventEnvelope::record_created(record)?;
        self.publish(&envelope).await
    }

    fn drop_envelope(&self, envelope: &EventEnvelope, stream: &str, e: &ReplicationError) {
        let record_id = envelope.payload.get("id").and_then(|v| v.as_i64());
        error!(
            kind = %envelope.kind,
            record_id = ?record_id,
            stream = %stream,
            error = %e,
            "Dropping envelope: broker unavailable after reconnect"
        );
        metrics::record_publish_dropped(&envelope.kind);
        metrics::record_error(ROLE, e.kind());
    }

    /// Close the connection (if any).
    pub async fn close(&self) {
        let slot = self.conn.write().await.take();
        if let Some((_, conn)) = slot {
            if let Err(e) = conn.close().await {
                warn!(error = %e, "Error closing publisher connection");
            }
            metrics::set_broker_connected(ROLE, false);
            debug!("Publisher connection closed");
        }
    }
}
