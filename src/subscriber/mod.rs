// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Event subscriber.
//!
//! The long-running consumer side of the async path. It owns:
//! - One broker connection, separate from the publisher's
//! - The [`Dispatcher`] that routes envelopes to handlers
//! - A background task running the consume loop ([`consume`])
//!
//! # Lifecycle
//!
//! 1. [`EventSubscriber::new()`] builds the subscriber (state `Disconnected`)
//! 2. [`EventSubscriber::start()`] spawns the background task
//! 3. The task connects, binds the queue, drains pending messages and consumes
//! 4. [`EventSubscriber::shutdown()`] interrupts it, closes the connection and
//!    leaves the subscriber `Stopped`
//!
//! State changes are published on a `watch` channel
//! ([`EventSubscriber::state_receiver()`]).

mod consume;
mod types;

pub use types::{HealthCheck, SubscriberState};

use crate::broker::Broker;
use crate::config::ReplicationConfig;
use crate::dispatch::Dispatcher;
use crate::error::{ReplicationError, Result};
use crate::metrics;
use consume::{SubscriberStats, Worker};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long shutdown waits for the task before aborting it.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Long-running consumer of the durable queue.
pub struct EventSubscriber<B: Broker> {
    config: ReplicationConfig,
    broker: Arc<B>,
    dispatcher: Arc<Dispatcher>,

    /// Subscriber state (broadcast to watchers)
    state_tx: Arc<watch::Sender<SubscriberState>>,
    state_rx: watch::Receiver<SubscriberState>,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    stats: Arc<SubscriberStats>,
    handle: Option<JoinHandle<()>>,
}

impl<B: Broker> EventSubscriber<B> {
    /// Create a subscriber. Nothing is connected until [`start()`](Self::start).
    pub fn new(config: ReplicationConfig, broker: B, dispatcher: Dispatcher) -> Self {
        let (state_tx, state_rx) = watch::channel(SubscriberState::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            broker: Arc::new(broker),
            dispatcher: Arc::new(dispatcher),
            state_tx: Arc::new(state_tx),
            state_rx,
            shutdown_tx,
            shutdown_rx,
            stats: Arc::new(SubscriberStats::new()),
            handle: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SubscriberState {
        *self.state_rx.borrow()
    }

    /// Receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<SubscriberState> {
        self.state_rx.clone()
    }

    pub fn is_consuming(&self) -> bool {
        self.state() == SubscriberState::Consuming
    }

    pub fn queue(&self) -> &str {
        &self.config.subscriber.queue
    }

    /// Spawn the background consume task.
    ///
    /// Returns immediately; broker failures are retried inside the task and
    /// surface only through [`state()`](Self::state) and logs.
    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() || self.state() == SubscriberState::Stopped {
            return Err(ReplicationError::InvalidState {
                expected: "Disconnected".to_string(),
                actual: if self.handle.is_some() {
                    "Started".to_string()
                } else {
                    self.state().to_string()
                },
            });
        }
        self.config.validate()?;

        let reconnect = &self.config.subscriber.reconnect;
        let worker = Worker {
            broker: Arc::clone(&self.broker),
            dispatcher: Arc::clone(&self.dispatcher),
            queue: self.config.subscriber.queue.clone(),
            consumer: self.config.consumer_name(),
            streams: self.config.subscribed_streams(),
            block: self.config.subscriber.block_timeout_duration(),
            batch_size: self.config.subscriber.batch_size,
            redelivery_delay: self.config.subscriber.redelivery_delay_duration(),
            retry: reconnect.retry_config(self.config.broker.connect_timeout_duration()),
            state_tx: Arc::clone(&self.state_tx),
            stats: Arc::clone(&self.stats),
        };

        info!(
            service = %self.config.service_name,
            queue = %worker.queue,
            consumer = %worker.consumer,
            kinds = ?self.dispatcher.kinds(),
            "Spawning event subscriber"
        );

        let shutdown_rx = self.shutdown_rx.clone();
        self.handle = Some(tokio::spawn(worker.run(shutdown_rx)));
        Ok(())
    }

    /// Wait until the subscriber reaches `state` or `timeout` elapses.
    ///
    /// Returns whether the state was reached.
    pub async fn wait_for_state(&self, state: SubscriberState, timeout: Duration) -> bool {
        let mut rx = self.state_rx.clone();
        tokio::time::timeout(timeout, rx.wait_for(|current| *current == state))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false)
    }

    /// Health snapshot (no broker I/O).
    pub fn health_check(&self) -> HealthCheck {
        let state = self.state();
        HealthCheck {
            state,
            ready: state == SubscriberState::Consuming,
            queue: self.config.subscriber.queue.clone(),
            consumer: self.config.consumer_name(),
            streams: self.config.subscribed_streams(),
            messages_received: self.stats.received.load(Ordering::Relaxed),
            messages_acked: self.stats.acked.load(Ordering::Relaxed),
            messages_failed: self.stats.failed.load(Ordering::Relaxed),
            reconnects: self.stats.reconnects.load(Ordering::Relaxed),
            since_last_message: self.stats.since_last_message(),
        }
    }

    /// Stop consuming and close the connection.
    ///
    /// A blocked read is interrupted. Unacknowledged messages stay pending in
    /// the queue for redelivery.
    pub async fn shutdown(&mut self) {
        info!(queue = %self.config.subscriber.queue, "Shutting down event subscriber");
        let _ = self.shutdown_tx.send(true);

        if let Some(mut handle) = self.handle.take() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => debug!("Subscriber task completed"),
                Ok(Err(e)) => warn!(error = %e, "Subscriber task panicked during shutdown"),
                Err(_) => {
                    warn!("Subscriber task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        let _ = self.state_tx.send(SubscriberState::Stopped);
        metrics::set_subscriber_state(&self.config.subscriber.queue, "Stopped");
    }

    /// Kill the task without a graceful close.
    ///
    /// In-flight messages are neither finished nor acknowledged, exactly as
    /// if the process had crashed.
    pub fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            warn!(queue = %self.config.subscriber.queue, "Subscriber task aborted");
        }
        let _ = self.state_tx.send(SubscriberState::Stopped);
    }
}
