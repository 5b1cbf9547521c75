// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Creation flow: one sync attempt, then an unconditional publish.
//!
//! ```text
//!   replicate(record)
//!        │
//!        ├──▶ SyncClient::send ──▶ SyncOutcome  (best effort, never short-circuits)
//!        │
//!        └──▶ EventPublisher::publish ──▶ message id | dropped
//! ```
//!
//! The two calls are independent: a failed, timed-out or disabled sync call
//! never prevents publication, and a failed publish does not undo a sync
//! call that already succeeded. The caller gets both results in a
//! [`ReplicationReport`] and decides what to do with them.

use crate::broker::Broker;
use crate::publisher::EventPublisher;
use crate::record::Record;
use crate::sync_client::{SyncClient, SyncOutcome};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of one replication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationReport {
    pub record_id: i64,
    pub sync: SyncOutcome,
    /// Broker message id, or the reason the envelope was dropped.
    pub publish: Result<String, String>,
}

impl ReplicationReport {
    pub fn published(&self) -> bool {
        self.publish.is_ok()
    }

    /// True if at least one path reached the counterpart (or will).
    pub fn replicated(&self) -> bool {
        self.published() || self.sync.is_delivered()
    }
}

/// Runs the dual-path replication for newly created records.
pub struct Replicator<B: Broker> {
    /// `None` when sync replication is disabled.
    sync: Option<Arc<dyn SyncClient>>,
    publisher: Arc<EventPublisher<B>>,
}

impl<B: Broker> Replicator<B> {
    pub fn new(sync: Option<Arc<dyn SyncClient>>, publisher: Arc<EventPublisher<B>>) -> Self {
        Self { sync, publisher }
    }

    /// Publish-only replicator.
    pub fn without_sync(publisher: Arc<EventPublisher<B>>) -> Self {
        Self::new(None, publisher)
    }

    pub fn publisher(&self) -> &Arc<EventPublisher<B>> {
        &self.publisher
    }

    pub fn sync_enabled(&self) -> bool {
        self.sync.is_some()
    }

    /// Replicate a newly created record.
    ///
    /// Always attempts the publish, whatever the sync outcome.
    pub async fn replicate(&self, record: &Record) -> ReplicationReport {
        let sync = match &self.sync {
            Some(client) => client.send(record).await,
            None => SyncOutcome::Skipped,
        };

        let publish = self
            .publisher
            .publish_record_created(record)
            .await
            .map_err(|e| e.to_string());

        match &publish {
            Ok(id) => info!(
                record_id = record.id,
                sync = sync.label(),
                message_id = %id,
                "Record replicated"
            ),
            Err(e) => warn!(
                record_id = record.id,
                sync = sync.label(),
                error = %e,
                "Record was not published"
            ),
        }

        ReplicationReport {
            record_id: record.id,
            sync,
            publish,
        }
    }

    /// Release the publisher connection.
    pub async fn close(&self) {
        self.publisher.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::config::BrokerConfig;
    use crate::resilience::RetryConfig;
    use crate::sync_client::{SyncFailure, SyncFuture};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSync {
        outcome: SyncOutcome,
        calls: AtomicUsize,
    }

    impl SyncClient for FixedSync {
        fn send(&self, _record: &Record) -> SyncFuture<'_> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = self.outcome.clone();
            Box::pin(async move { outcome })
        }
    }

    fn replicator(broker: &MemoryBroker, sync: SyncOutcome) -> (Replicator<MemoryBroker>, Arc<FixedSync>) {
        let publisher = EventPublisher::new(broker.clone(), &BrokerConfig::default())
            .with_retry(RetryConfig::testing());
        let client = Arc::new(FixedSync {
            outcome: sync,
            calls: AtomicUsize::new(0),
        });
        let sync: Arc<dyn SyncClient> = client.clone();
        (Replicator::new(Some(sync), Arc::new(publisher)), client)
    }

    #[tokio::test]
    async fn test_publishes_after_successful_sync() {
        let broker = MemoryBroker::new();
        let (replicator, client) = replicator(&broker, SyncOutcome::Delivered);

        let report = replicator.replicate(&Record::new(1, "GCP")).await;
        assert!(report.sync.is_delivered());
        assert!(report.published());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(broker.messages("trigger").len(), 1);
    }

    #[tokio::test]
    async fn test_publishes_after_failed_sync() {
        let broker = MemoryBroker::new();
        let (replicator, _) = replicator(&broker, SyncOutcome::Failed(SyncFailure::Timeout));

        let report = replicator.replicate(&Record::new(1, "GCP")).await;
        assert_eq!(report.sync, SyncOutcome::Failed(SyncFailure::Timeout));
        assert!(report.published());
        assert!(report.replicated());
    }

    #[tokio::test]
    async fn test_sync_disabled_still_publishes() {
        let broker = MemoryBroker::new();
        let publisher = Arc::new(EventPublisher::new(broker.clone(), &BrokerConfig::default()));
        let replicator = Replicator::without_sync(publisher);
        assert!(!replicator.sync_enabled());

        let report = replicator.replicate(&Record::new(1, "GCP")).await;
        assert_eq!(report.sync, SyncOutcome::Skipped);
        assert!(report.published());
    }

    #[tokio::test]
    async fn test_sync_success_survives_publish_failure() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        let (replicator, _) = replicator(&broker, SyncOutcome::Delivered);

        let report = replicator.replicate(&Record::new(1, "GCP")).await;
        assert!(report.sync.is_delivered());
        assert!(!report.published());
        assert!(report.replicated());
        assert_eq!(report.record_id, 1);
    }
}
