//! Shared test utilities for the replication, chaos and integration suites.
//!
//! This module provides:
//! - Redis testcontainer setup
//! - A controllable record store (fail / hang on demand)
//! - Wiring helpers for subscribers, publishers and the ingestion endpoint

#![allow(dead_code)]

pub mod containers;
pub mod mock_store;

pub use containers::*;
pub use mock_store::*;

use record_replication::broker::{Broker, BrokerConnection, MemoryBroker};
use record_replication::{
    Dispatcher, EventEnvelope, EventPublisher, EventSubscriber, Record, RecordCreatedHandler,
    RecordStore, ReplicationConfig, RECORD_CREATED,
};
use record_replication::resilience::RetryConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Default upper bound for eventual assertions.
pub const WAIT: Duration = Duration::from_secs(5);

/// Config with short timeouts for a service called `name`.
pub fn test_config(name: &str) -> ReplicationConfig {
    ReplicationConfig::for_testing(name)
}

/// Dispatcher with the record-created handler bound to `store`.
pub fn record_dispatcher<S: RecordStore>(store: Arc<S>) -> Dispatcher {
    Dispatcher::new().with_handler(RECORD_CREATED, Arc::new(RecordCreatedHandler::new(store)))
}

/// Subscriber applying records to `store`.
pub fn subscriber<B: Broker, S: RecordStore>(
    config: ReplicationConfig,
    broker: B,
    store: Arc<S>,
) -> EventSubscriber<B> {
    EventSubscriber::new(config, broker, record_dispatcher(store))
}

/// Publisher with fast-fail reconnects.
pub fn publisher<B: Broker>(broker: B, config: &ReplicationConfig) -> EventPublisher<B> {
    EventPublisher::new(broker, &config.broker).with_retry(RetryConfig::testing())
}

/// Append a raw body to `stream`, bypassing the publisher.
pub async fn publish_raw(broker: &MemoryBroker, stream: &str, body: &[u8]) {
    let conn = broker.connect().await.unwrap();
    conn.publish(stream, body, 10_000).await.unwrap();
}

/// Append a record-created envelope for `record` to the default exchange.
pub async fn publish_record(broker: &MemoryBroker, record: &Record) {
    let body = EventEnvelope::record_created(record)
        .unwrap()
        .stamped()
        .to_bytes()
        .unwrap();
    publish_raw(broker, "trigger", &body).await;
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(timeout, async {
        loop {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

/// Wait until `store` holds at least `n` records.
pub async fn wait_for_records<S: RecordStore>(store: &S, n: usize) -> bool {
    eventually(WAIT, || async { store.all().await.map(|r| r.len() >= n).unwrap_or(false) }).await
}

/// Serve the ingestion endpoint for `store` on an ephemeral localhost port.
///
/// Returns the counterpart base URL (without the ingest path).
pub async fn serve_ingest<S: RecordStore>(store: Arc<S>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = record_replication::ingest::router("/api/c/platforms", store);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Serve an endpoint that answers only after `delay`.
pub async fn serve_slow(delay: Duration) -> String {
    use axum::routing::post;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = axum::Router::new().route(
        "/api/c/platforms",
        post(move || async move {
            tokio::time::sleep(delay).await;
            axum::http::StatusCode::OK
        }),
    );
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}
