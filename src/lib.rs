//! # Record Replication
//!
//! Replicates newly created records from a primary service to a secondary
//! service over two independent paths.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────── primary ─────────────────┐        ┌──────────────── secondary ───────────────┐
//! │                                           │  HTTP  │                                           │
//! │  create ──► Replicator ──► HttpSyncClient ─┼───────►┼─► ingest::router ─┐                      │
//! │                 │          (best effort)  │        │                   ▼                      │
//! │                 │                         │        │            apply_record ──► RecordStore   │
//! │                 ▼                         │        │                   ▲      (insert if absent)
//! │          EventPublisher ──XADD──┐         │        │                   │                      │
//! └─────────────────────────────────┼─────────┘        │  Dispatcher ◄── EventSubscriber          │
//!                                   ▼                  │      ▲          (queue, ack after apply) │
//!                         ┌───────────────────┐        └──────┼────────────────────────────────────┘
//!                         │ exchange (stream) │───XREADGROUP──┘
//!                         └───────────────────┘
//! ```
//!
//! ## Two-Path Replication
//!
//! 1. **Sync path**: one bounded HTTP call to the counterpart. Never retried;
//!    its failure never blocks the async path.
//! 2. **Async path**: the `record-created` envelope is always published to a
//!    durable queue and applied idempotently by the subscriber, which
//!    acknowledges only after the record is stored. This path is the source
//!    of truth: every record eventually converges, exactly once.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use record_replication::{
//!     Dispatcher, EventPublisher, EventSubscriber, HttpSyncClient, MemoryRecordStore,
//!     Record, RecordCreatedHandler, RedisBroker, ReplicationConfig, Replicator, SyncClient,
//!     RECORD_CREATED,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> record_replication::Result<()> {
//!     let config = ReplicationConfig::default();
//!     config.validate()?;
//!
//!     // Primary side
//!     let publisher = EventPublisher::new(RedisBroker::from_config(&config.broker)?, &config.broker);
//!     let sync: Arc<dyn SyncClient> = Arc::new(HttpSyncClient::new(&config.sync)?);
//!     let replicator = Replicator::new(Some(sync), Arc::new(publisher));
//!     let report = replicator.replicate(&Record::new(1, "GCP")).await;
//!     println!("published: {}", report.published());
//!
//!     // Secondary side
//!     let store = Arc::new(MemoryRecordStore::new());
//!     let dispatcher = Dispatcher::new()
//!         .with_handler(RECORD_CREATED, Arc::new(RecordCreatedHandler::new(store)));
//!     let mut subscriber =
//!         EventSubscriber::new(config.clone(), RedisBroker::from_config(&config.broker)?, dispatcher);
//!     subscriber.start()?;
//!
//!     subscriber.shutdown().await;
//!     replicator.close().await;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod metrics;
pub mod publisher;
pub mod record;
pub mod replicator;
pub mod resilience;
pub mod store;
pub mod subscriber;
pub mod sync_client;

// Re-exports for convenience
pub use broker::{Broker, BrokerConnection, MemoryBroker, RedisBroker};
pub use config::{
    BrokerConfig, ExchangeType, ReconnectConfig, ReplicationConfig, SubscriberConfig, SyncConfig,
};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use envelope::{EventEnvelope, LEGACY_RECORD_CREATED, RECORD_CREATED};
pub use error::{ReplicationError, Result};
pub use handlers::{ApplyOutcome, EventHandler, HandlerError, RecordCreatedHandler};
pub use publisher::EventPublisher;
pub use record::{Record, RecordId};
pub use replicator::{ReplicationReport, Replicator};
pub use store::{MemoryRecordStore, RecordStore, SqliteRecordStore};
pub use subscriber::{EventSubscriber, HealthCheck, SubscriberState};
pub use sync_client::{HttpSyncClient, SyncClient, SyncFailure, SyncOutcome};
