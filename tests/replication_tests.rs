// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication behaviour tests against the in-memory broker.
//!
//! Each test wires a real publisher, subscriber and store (and, where the
//! sync path is involved, a real axum ingestion endpoint on localhost).
//!
//! Run with: cargo test --test replication_tests

mod common;

use common::*;
use record_replication::broker::MemoryBroker;
use record_replication::store::{MemoryRecordStore, SqliteRecordStore};
use record_replication::sync_client::{HttpSyncClient, SyncClient, SyncFailure, SyncOutcome};
use record_replication::{
    EventEnvelope, Record, RecordStore, Replicator, SubscriberState, SyncConfig,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn sync_client(base_url: &str, timeout: &str) -> Arc<dyn SyncClient> {
    let config = SyncConfig {
        counterpart_url: base_url.to_string(),
        timeout: timeout.to_string(),
        ..Default::default()
    };
    Arc::new(HttpSyncClient::new(&config).unwrap())
}

// =============================================================================
// Idempotence
// =============================================================================

#[tokio::test]
async fn duplicate_deliveries_apply_once() {
    let broker = MemoryBroker::new();
    let store = Arc::new(MockStore::new());
    let mut sub = subscriber(test_config("cmd"), broker.clone(), Arc::clone(&store));
    sub.start().unwrap();
    assert!(sub.wait_for_state(SubscriberState::Consuming, WAIT).await);

    let record = Record::new(1, "GCP");
    publish_record(&broker, &record).await;
    publish_record(&broker, &record).await;

    assert!(eventually(WAIT, || async { store.insert_calls() == 2 }).await);
    assert_eq!(store.all().await.unwrap(), vec![record]);

    sub.shutdown().await;
    assert_eq!(broker.pending_count("trigger", "cmd-queue"), 0);
    assert_eq!(sub.health_check().messages_acked, 2);
}

#[tokio::test]
async fn sync_then_async_delivery_stores_once() {
    let store = Arc::new(MemoryRecordStore::new());
    let base_url = serve_ingest(Arc::clone(&store)).await;

    let outcome = sync_client(&base_url, "2s")
        .send(&Record::new(1, "GCP"))
        .await;
    assert_eq!(outcome, SyncOutcome::Delivered);

    // The same record arriving by the async path is a no-op
    let broker = MemoryBroker::new();
    let mut sub = subscriber(test_config("cmd"), broker.clone(), Arc::clone(&store));
    sub.start().unwrap();
    publish_record(&broker, &Record::new(1, "GCP")).await;

    assert!(eventually(WAIT, || async { sub.health_check().messages_acked == 1 }).await);
    assert_eq!(store.len(), 1);
    sub.shutdown().await;
}

// =============================================================================
// At-least-once redelivery
// =============================================================================

#[tokio::test]
async fn crash_before_ack_redelivers() {
    let broker = MemoryBroker::new();
    let store = Arc::new(MockStore::with_mode(StoreMode::Hanging));

    let mut first = subscriber(test_config("cmd"), broker.clone(), Arc::clone(&store));
    first.start().unwrap();
    assert!(first.wait_for_state(SubscriberState::Consuming, WAIT).await);

    publish_record(&broker, &Record::new(1, "GCP")).await;
    assert!(eventually(WAIT, || async { store.insert_calls() == 1 }).await);

    // Crash mid-handling: the message was delivered but never acknowledged
    first.abort();
    assert_eq!(broker.pending_count("trigger", "cmd-queue"), 1);
    assert_eq!(store.len(), 0);

    // Restart under the same consumer name
    store.set_mode(StoreMode::Healthy);
    let mut second = subscriber(test_config("cmd"), broker.clone(), Arc::clone(&store));
    second.start().unwrap();

    assert!(wait_for_records(store.as_ref(), 1).await);
    assert!(eventually(WAIT, || async {
        broker.pending_count("trigger", "cmd-queue") == 0
    })
    .await);
    assert_eq!(broker.max_deliveries("trigger", "cmd-queue"), 0);
    second.shutdown().await;
}

#[tokio::test]
async fn store_outage_leaves_message_pending_until_it_applies() {
    let broker = MemoryBroker::new();
    let store = Arc::new(MockStore::with_mode(StoreMode::Failing));
    let mut sub = subscriber(test_config("cmd"), broker.clone(), Arc::clone(&store));
    sub.start().unwrap();
    assert!(sub.wait_for_state(SubscriberState::Consuming, WAIT).await);

    publish_record(&broker, &Record::new(1, "GCP")).await;
    assert!(eventually(WAIT, || async { store.insert_calls() >= 2 }).await);
    assert_eq!(broker.pending_count("trigger", "cmd-queue"), 1);
    assert!(sub.health_check().messages_failed >= 1);

    store.set_mode(StoreMode::Healthy);
    assert!(wait_for_records(store.as_ref(), 1).await);
    assert!(eventually(WAIT, || async {
        broker.pending_count("trigger", "cmd-queue") == 0
    })
    .await);
    sub.shutdown().await;
}

#[tokio::test]
async fn queue_bound_after_publish_still_converges() {
    let broker = MemoryBroker::new();
    let config = test_config("cmd");
    let publisher = publisher(broker.clone(), &config);

    // Nothing is bound yet
    publisher
        .publish_record_created(&Record::new(1, "GCP"))
        .await
        .unwrap();

    let store = Arc::new(MemoryRecordStore::new());
    let mut sub = subscriber(config, broker.clone(), Arc::clone(&store));
    sub.start().unwrap();
    assert!(wait_for_records(store.as_ref(), 1).await);
    sub.shutdown().await;
}

// =============================================================================
// Sync / async independence
// =============================================================================

#[tokio::test]
async fn unreachable_counterpart_does_not_block_publish() {
    let broker = MemoryBroker::new();
    let config = test_config("platform");
    let replicator = Replicator::new(
        Some(sync_client("http://127.0.0.1:1", "500ms")),
        Arc::new(publisher(broker.clone(), &config)),
    );

    let report = replicator.replicate(&Record::new(1, "GCP")).await;
    assert!(matches!(report.sync, SyncOutcome::Failed(_)));
    assert!(report.published());
    assert_eq!(broker.messages("trigger").len(), 1);
}

#[tokio::test]
async fn slow_counterpart_times_out_and_publish_proceeds() {
    let broker = MemoryBroker::new();
    let base_url = serve_slow(Duration::from_secs(3)).await;
    let replicator = Replicator::new(
        Some(sync_client(&base_url, "200ms")),
        Arc::new(publisher(broker.clone(), &test_config("platform"))),
    );

    let started = std::time::Instant::now();
    let report = replicator.replicate(&Record::new(1, "GCP")).await;
    assert_eq!(report.sync, SyncOutcome::Failed(SyncFailure::Timeout));
    assert!(report.published());
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn rejected_sync_call_still_publishes() {
    let store = Arc::new(MemoryRecordStore::new());
    let base_url = serve_ingest(Arc::clone(&store)).await;
    let broker = MemoryBroker::new();
    let replicator = Replicator::new(
        Some(sync_client(&base_url, "2s")),
        Arc::new(publisher(broker.clone(), &test_config("platform"))),
    );

    // Blank name fails validation at the counterpart
    let report = replicator.replicate(&Record::new(5, " ")).await;
    assert_eq!(
        report.sync,
        SyncOutcome::Failed(SyncFailure::Rejected { status: 400 })
    );
    assert!(report.published());
}

// =============================================================================
// Tolerance: unknown kinds, malformed payloads
// =============================================================================

#[tokio::test]
async fn unknown_kind_is_acknowledged_and_ignored() {
    let broker = MemoryBroker::new();
    let store = Arc::new(MemoryRecordStore::new());
    let mut sub = subscriber(test_config("cmd"), broker.clone(), Arc::clone(&store));
    sub.start().unwrap();
    assert!(sub.wait_for_state(SubscriberState::Consuming, WAIT).await);

    let unknown = EventEnvelope::new("record-deleted", json!({"id": 1})).to_bytes().unwrap();
    publish_raw(&broker, "trigger", &unknown).await;
    publish_record(&broker, &Record::new(2, "AWS")).await;

    assert!(wait_for_records(store.as_ref(), 1).await);
    assert!(eventually(WAIT, || async { sub.health_check().messages_acked == 2 }).await);
    assert_eq!(store.get(1).await.unwrap(), None);
    assert_eq!(broker.pending_count("trigger", "cmd-queue"), 0);
    sub.shutdown().await;
}

#[tokio::test]
async fn malformed_messages_are_discarded() {
    let broker = MemoryBroker::new();
    let store = Arc::new(MemoryRecordStore::new());
    let mut sub = subscriber(test_config("cmd"), broker.clone(), Arc::clone(&store));
    sub.start().unwrap();
    assert!(sub.wait_for_state(SubscriberState::Consuming, WAIT).await);

    let bad_payload = EventEnvelope::new("record-created", json!({"name": "no id"}))
        .to_bytes()
        .unwrap();
    publish_raw(&broker, "trigger", &bad_payload).await;
    publish_raw(&broker, "trigger", b"\x00\xffnot json").await;
    publish_raw(&broker, "trigger", br#"{"kind": "", "payload": {}}"#).await;
    publish_record(&broker, &Record::new(3, "Azure")).await;

    assert!(wait_for_records(store.as_ref(), 1).await);
    assert!(eventually(WAIT, || async { sub.health_check().messages_acked == 4 }).await);
    assert_eq!(store.all().await.unwrap(), vec![Record::new(3, "Azure")]);
    assert_eq!(sub.state(), SubscriberState::Consuming);
    sub.shutdown().await;
}

#[tokio::test]
async fn legacy_event_name_is_applied() {
    let broker = MemoryBroker::new();
    let store = Arc::new(MemoryRecordStore::new());
    let mut sub = subscriber(test_config("cmd"), broker.clone(), Arc::clone(&store));
    sub.start().unwrap();

    let legacy = EventEnvelope::new("Platform_Published", json!({"id": 9, "name": "OCI"}))
        .to_bytes()
        .unwrap();
    publish_raw(&broker, "trigger", &legacy).await;

    assert!(wait_for_records(store.as_ref(), 1).await);
    assert_eq!(store.get(9).await.unwrap(), Some(Record::new(9, "OCI")));
    sub.shutdown().await;
}

// =============================================================================
// Reconnect recovery
// =============================================================================

#[tokio::test]
async fn subscriber_recovers_after_broker_outage() {
    let broker = MemoryBroker::new();
    let store = Arc::new(MemoryRecordStore::new());
    let mut sub = subscriber(test_config("cmd"), broker.clone(), Arc::clone(&store));
    sub.start().unwrap();
    assert!(sub.wait_for_state(SubscriberState::Consuming, WAIT).await);

    broker.set_available(false);
    assert!(eventually(WAIT, || async { sub.health_check().reconnects >= 2 }).await);
    assert_ne!(sub.state(), SubscriberState::Consuming);

    broker.set_available(true);
    assert!(sub.wait_for_state(SubscriberState::Consuming, WAIT).await);

    publish_record(&broker, &Record::new(1, "GCP")).await;
    assert!(wait_for_records(store.as_ref(), 1).await);
    sub.shutdown().await;
    assert_eq!(sub.state(), SubscriberState::Stopped);
}

#[tokio::test]
async fn publisher_recovers_after_broker_restart() {
    let broker = MemoryBroker::new();
    let config = test_config("platform");
    let publisher = publisher(broker.clone(), &config);

    publisher
        .publish_record_created(&Record::new(1, "GCP"))
        .await
        .unwrap();
    broker.disconnect_all();
    publisher
        .publish_record_created(&Record::new(2, "AWS"))
        .await
        .unwrap();
    assert_eq!(broker.messages("trigger").len(), 2);
}

// =============================================================================
// End to end
// =============================================================================

/// Primary creates {id: 1, name: "GCP"}; the secondary ends up with exactly
/// one copy, delivered by whichever path gets there first.
#[tokio::test]
async fn end_to_end_record_replicates_once() {
    let broker = MemoryBroker::new();
    let command_store = Arc::new(MemoryRecordStore::new());
    let base_url = serve_ingest(Arc::clone(&command_store)).await;

    let mut sub = subscriber(test_config("cmd"), broker.clone(), Arc::clone(&command_store));
    sub.start().unwrap();
    assert!(sub.wait_for_state(SubscriberState::Consuming, WAIT).await);

    let replicator = Replicator::new(
        Some(sync_client(&base_url, "2s")),
        Arc::new(publisher(broker.clone(), &test_config("platform"))),
    );
    let report = replicator.replicate(&Record::new(1, "GCP")).await;
    assert_eq!(report.sync, SyncOutcome::Delivered);
    assert!(report.published());

    assert!(eventually(WAIT, || async { sub.health_check().messages_acked == 1 }).await);
    assert_eq!(command_store.all().await.unwrap(), vec![Record::new(1, "GCP")]);
    assert_eq!(broker.pending_count("trigger", "cmd-queue"), 0);

    sub.shutdown().await;
    replicator.close().await;
}

#[tokio::test]
async fn end_to_end_with_counterpart_down_converges_via_queue() {
    let broker = MemoryBroker::new();
    let store = Arc::new(MemoryRecordStore::new());

    let replicator = Replicator::new(
        Some(sync_client("http://127.0.0.1:1", "500ms")),
        Arc::new(publisher(broker.clone(), &test_config("platform"))),
    );
    let report = replicator.replicate(&Record::new(1, "GCP")).await;
    assert!(!report.sync.is_delivered());
    assert!(report.published());

    // The secondary comes up later and catches up from the queue
    let mut sub = subscriber(test_config("cmd"), broker.clone(), Arc::clone(&store));
    sub.start().unwrap();
    assert!(wait_for_records(store.as_ref(), 1).await);
    assert_eq!(store.get(1).await.unwrap(), Some(Record::new(1, "GCP")));
    sub.shutdown().await;
}

#[tokio::test]
async fn end_to_end_with_sqlite_store() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("records.db");
    let store = Arc::new(SqliteRecordStore::open(path.to_str().unwrap()).await.unwrap());
    let broker = MemoryBroker::new();

    let mut sub = subscriber(test_config("cmd"), broker.clone(), Arc::clone(&store));
    sub.start().unwrap();

    let record = Record::new(1, "GCP").with_publisher("Google").with_cost("10");
    publish_record(&broker, &record).await;
    publish_record(&broker, &record).await;

    assert!(eventually(WAIT, || async { sub.health_check().messages_acked == 2 }).await);
    assert_eq!(store.all().await.unwrap(), vec![record]);
    sub.shutdown().await;
    store.close().await;
}
