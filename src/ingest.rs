// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Ingestion endpoint: the receiving end of the sync path.
//!
//! `POST {ingest_path}` with a JSON record applies it through the same
//! idempotent insert as the subscriber, so a record that arrives by both
//! paths is stored once.
//!
//! | Status | Body | When |
//! |--------|------|------|
//! | 200 | `{"applied": true}` | New record stored |
//! | 200 | `{"applied": false}` | Record already present |
//! | 400 | `{"error": ...}` | Body is not a valid record |
//! | 503 | `{"error": ...}` | Store unavailable |

use crate::handlers::{apply_record, ApplyOutcome, HandlerError};
use crate::metrics;
use crate::record::Record;
use crate::store::RecordStore;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

/// State shared with the ingestion handler.
pub struct IngestState<S> {
    pub store: Arc<S>,
}

impl<S> Clone for IngestState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

/// Build the axum router serving `POST {path}`.
pub fn router<S: RecordStore>(path: &str, store: Arc<S>) -> Router {
    Router::new()
        .route(path, post(ingest_record::<S>))
        .with_state(IngestState { store })
}

async fn ingest_record<S: RecordStore>(
    State(state): State<IngestState<S>>,
    body: Result<Json<Record>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    let (status, body) = match body {
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Rejecting undecodable record");
            (
                StatusCode::BAD_REQUEST,
                json!({ "error": rejection.body_text() }),
            )
        }
        Ok(Json(record)) => match apply_record(state.store.as_ref(), record, "ingest").await {
            Ok(outcome) => (
                StatusCode::OK,
                json!({ "applied": outcome == ApplyOutcome::Applied }),
            ),
            Err(HandlerError::Malformed(reason)) => {
                warn!(reason = %reason, "Rejecting invalid record");
                (StatusCode::BAD_REQUEST, json!({ "error": reason }))
            }
            Err(HandlerError::Transient(reason)) => {
                warn!(reason = %reason, "Record store unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": reason }))
            }
        },
    };

    metrics::record_ingest(status.as_u16());
    (status, Json(body))
}
