//! Consume loop: connect, bind, drain pending, consume new.
//!
//! The worker runs as a single background task. Every (re)connect goes
//! through the same sequence:
//!
//! 1. `Connecting`: open a broker connection (bounded by the connection timeout)
//! 2. `Bound`: declare the durable queue on every subscribed stream
//! 3. `Consuming`: first re-read this consumer's pending messages (anything
//!    delivered before a crash and never acknowledged), then block on new ones
//!
//! Messages are acknowledged only after the dispatcher has finished with them.
//! A `Failed` outcome leaves the message pending; the worker replays pending
//! messages again after the redelivery delay.
//!
//! # Graceful Shutdown
//!
//! A blocked read is raced against the shutdown signal with `tokio::select!`,
//! so shutdown never waits for the block timeout. A message already being
//! handled is finished and acknowledged first.

use super::types::SubscriberState;
use crate::broker::{Broker, BrokerConnection, ConsumeRequest, Delivery, ReadFrom};
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::envelope::EventEnvelope;
use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::resilience::RetryConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

const ROLE: &str = "subscriber";

/// Counters shared between the worker and health checks.
#[derive(Debug)]
pub(super) struct SubscriberStats {
    started: Instant,
    pub received: AtomicU64,
    pub acked: AtomicU64,
    pub failed: AtomicU64,
    pub reconnects: AtomicU64,
    /// Millis since `started` of the last processed message, plus one (0 = none).
    last_message: AtomicU64,
}

impl SubscriberStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            received: AtomicU64::new(0),
            acked: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            last_message: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let millis = self.started.elapsed().as_millis() as u64;
        self.last_message.store(millis + 1, Ordering::Relaxed);
    }

    pub fn since_last_message(&self) -> Option<Duration> {
        match self.last_message.load(Ordering::Relaxed) {
            0 => None,
            stamp => {
                let now = self.started.elapsed().as_millis() as u64;
                Some(Duration::from_millis(now.saturating_sub(stamp - 1)))
            }
        }
    }
}

/// Why the consume phase ended.
enum Exit {
    Shutdown,
}

/// Everything the background task owns.
pub(super) struct Worker<B: Broker> {
    pub broker: Arc<B>,
    pub dispatcher: Arc<Dispatcher>,
    pub queue: String,
    pub consumer: String,
    pub streams: Vec<String>,
    pub block: Duration,
    pub batch_size: usize,
    pub redelivery_delay: Duration,
    pub retry: RetryConfig,
    pub state_tx: Arc<watch::Sender<SubscriberState>>,
    pub stats: Arc<SubscriberStats>,
}

impl<B: Broker> Worker<B> {
    fn set_state(&self, state: SubscriberState) {
        let _ = self.state_tx.send(state);
        metrics::set_subscriber_state(&self.queue, &state.to_string());
    }

    /// Run until shutdown is signaled or the reconnect budget is spent.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let span = info_span!("subscriber", queue = %self.queue, consumer = %self.consumer);

        async move {
            info!(streams = ?self.streams, "Starting event subscriber");
            let mut attempt = 0usize;

            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                self.set_state(SubscriberState::Connecting);
                match self.connect_and_bind().await {
                    Ok(conn) => {
                        // Backoff resets after every successful bind
                        attempt = 0;
                        let result = self.consume(&conn, &mut shutdown_rx).await;
                        if let Err(e) = conn.close().await {
                            debug!(error = %e, "Error closing subscriber connection");
                        }
                        metrics::set_broker_connected(ROLE, false);

                        match result {
                            Ok(Exit::Shutdown) => break,
                            Err(e) => {
                                self.set_state(SubscriberState::Disconnected);
                                metrics::record_broker_disconnect(ROLE);
                                metrics::record_error(ROLE, e.kind());
                                warn!(error = %e, "Broker connection lost");
                            }
                        }
                    }
                    Err(e) => {
                        self.set_state(SubscriberState::Disconnected);
                        metrics::record_error(ROLE, e.kind());
                        warn!(attempt = attempt + 1, error = %e, "Could not bind subscriber queue");
                    }
                }

                attempt += 1;
                if self.retry.is_exhausted(attempt) {
                    error!(attempt, "Reconnect attempts exhausted, subscriber giving up");
                    break;
                }

                let delay = self.retry.delay_for_attempt(attempt);
                self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting after backoff");

                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            self.set_state(SubscriberState::Stopped);
            info!("Event subscriber stopped");
        }
        .instrument(span)
        .await
    }

    async fn connect_and_bind(&self) -> Result<B::Connection> {
        let conn = match tokio::time::timeout(self.retry.connection_timeout, self.broker.connect()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                metrics::record_broker_connection(ROLE, false);
                return Err(e);
            }
            Err(_) => {
                metrics::record_broker_connection(ROLE, false);
                return Err(ReplicationError::broker_msg(
                    "CONNECT",
                    format!(
                        "timed out after {}ms",
                        self.retry.connection_timeout.as_millis()
                    ),
                ));
            }
        };
        metrics::record_broker_connection(ROLE, true);
        metrics::set_broker_connected(ROLE, true);

        for stream in &self.streams {
            conn.declare_queue(stream, &self.queue).await?;
        }
        self.set_state(SubscriberState::Bound);
        info!(streams = ?self.streams, "Queue bound");
        Ok(conn)
    }

    /// Consuming phase. Returns `Ok` only on shutdown; any broker error ends it.
    async fn consume(
        &self,
        conn: &B::Connection,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<Exit> {
        self.set_state(SubscriberState::Consuming);

        let mut replay_at = self.drain_pending(conn).await?;

        loop {
            if *shutdown_rx.borrow() {
                return Ok(Exit::Shutdown);
            }

            if let Some(at) = replay_at {
                if Instant::now() >= at {
                    replay_at = self.drain_pending(conn).await?;
                    continue;
                }
            }

            let block = read_block(self.block, replay_at, Instant::now());
            let request = self.request(ReadFrom::New, block);
            let read_start = Instant::now();
            let deliveries = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!("Shutdown signal received, interrupting read");
                    return Ok(Exit::Shutdown);
                }
                result = conn.consume(request) => result?,
            };
            metrics::record_consume_read(&self.queue, read_start.elapsed());

            if deliveries.is_empty() {
                continue;
            }
            metrics::record_messages_received(&self.queue, deliveries.len());

            let failed = self.process(conn, deliveries).await?;
            if failed > 0 && replay_at.is_none() {
                replay_at = Some(Instant::now() + self.redelivery_delay);
            }
        }
    }

    /// Re-read and process this consumer's pending messages.
    ///
    /// Returns when a single read is not a full batch of successes, since
    /// pending reads start over at the oldest unacknowledged message. If
    /// anything failed, returns the time the next replay is due.
    async fn drain_pending(&self, conn: &B::Connection) -> Result<Option<Instant>> {
        loop {
            let deliveries = conn
                .consume(self.request(ReadFrom::Pending, Duration::ZERO))
                .await?;
            if deliveries.is_empty() {
                return Ok(None);
            }

            let count = deliveries.len();
            info!(count, "Redelivering pending messages");
            metrics::record_redeliveries(&self.queue, count);
            metrics::record_messages_received(&self.queue, count);

            let failed = self.process(conn, deliveries).await?;
            if failed > 0 {
                return Ok(Some(Instant::now() + self.redelivery_delay));
            }
            if count < self.batch_size {
                return Ok(None);
            }
        }
    }

    fn request(&self, from: ReadFrom, block: Duration) -> ConsumeRequest {
        ConsumeRequest {
            streams: self.streams.clone(),
            queue: self.queue.clone(),
            consumer: self.consumer.clone(),
            from,
            block,
            count: self.batch_size,
        }
    }

    /// Dispatch and ack each delivery in order. Returns how many failed.
    async fn process(&self, conn: &B::Connection, deliveries: Vec<Delivery>) -> Result<usize> {
        let mut failed = 0;

        for delivery in deliveries {
            self.stats.received.fetch_add(1, Ordering::Relaxed);
            let outcome = self.handle(&delivery).await;
            self.stats.touch();

            if !outcome.should_ack() {
                failed += 1;
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            match conn.ack(&delivery.stream, &self.queue, &delivery.id).await {
                Ok(()) => {
                    metrics::record_ack(&self.queue, true);
                    self.stats.acked.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    // The message stays pending and is redelivered after reconnect
                    metrics::record_ack(&self.queue, false);
                    return Err(e);
                }
            }
        }

        Ok(failed)
    }

    async fn handle(&self, delivery: &Delivery) -> DispatchOutcome {
        let Some(body) = delivery.body.as_deref() else {
            error!(
                stream = %delivery.stream,
                id = %delivery.id,
                "Pending message was trimmed from the stream, discarding"
            );
            return DispatchOutcome::Rejected("message trimmed before redelivery".to_string());
        };

        match EventEnvelope::from_bytes(body) {
            Ok(envelope) => {
                if let Some(lag) = envelope.lag_ms(unix_millis()) {
                    metrics::record_replication_lag_ms(&self.queue, lag);
                }
                debug!(id = %delivery.id, kind = %envelope.kind, "Dispatching message");
                self.dispatcher.dispatch(&envelope).await
            }
            Err(e) => self.dispatcher.reject_undecodable(&e, body.len()),
        }
    }
}

/// Shortest blocking read. Brokers treat a zero block as "wait forever".
const MIN_BLOCK: Duration = Duration::from_millis(1);

/// Block time for the next read of new messages: the configured block,
/// cut short so a due replay of pending messages is not delayed.
fn read_block(configured: Duration, replay_at: Option<Instant>, now: Instant) -> Duration {
    let block = match replay_at {
        Some(at) => configured.min(at.saturating_duration_since(now)),
        None => configured,
    };
    block.max(MIN_BLOCK)
}

fn unix_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
