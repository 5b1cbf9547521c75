// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Event handlers.
//!
//! A handler applies the payload of one envelope kind to local state. The
//! result tells the subscriber whether the message may be acknowledged:
//!
//! | Result | Meaning | Acked |
//! |--------|---------|-------|
//! | `Ok(Applied)` | New record stored | Yes |
//! | `Ok(AlreadyApplied)` | Same id seen before (duplicate delivery) | Yes |
//! | `Err(Malformed)` | Payload can never be applied | Yes (dropped) |
//! | `Err(Transient)` | Store unavailable, retry later | No (redelivered) |

use crate::metrics;
use crate::record::Record;
use crate::store::RecordStore;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

/// Successful application of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The record was already present; nothing changed.
    AlreadyApplied,
}

/// Why a handler could not apply a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// Permanent: the payload is not a valid record.
    #[error("malformed payload: {0}")]
    Malformed(String),
    /// Temporary: the same payload may succeed later.
    #[error("transient failure: {0}")]
    Transient(String),
}

/// Type alias for boxed handler futures.
pub type HandlerFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ApplyOutcome, HandlerError>> + Send + 'a>>;

/// Applies the payload of one envelope kind.
pub trait EventHandler: Send + Sync + 'static {
    fn handle(&self, payload: serde_json::Value) -> HandlerFuture<'_>;
}

/// Insert a record unless its id is already present.
///
/// Shared by the subscriber path and the ingestion endpoint so both apply
/// records the same way. `source` labels the apply metric.
pub async fn apply_record<S>(
    store: &S,
    record: Record,
    source: &str,
) -> Result<ApplyOutcome, HandlerError>
where
    S: RecordStore + ?Sized,
{
    record
        .validate()
        .map_err(|e| HandlerError::Malformed(e.to_string()))?;

    let id = record.id;
    let inserted = store
        .insert_if_absent(record)
        .await
        .map_err(|e| HandlerError::Transient(e.to_string()))?;

    metrics::record_apply(source, inserted);
    if inserted {
        debug!(record_id = id, source, "Record applied");
        Ok(ApplyOutcome::Applied)
    } else {
        debug!(record_id = id, source, "Record already applied, skipping");
        Ok(ApplyOutcome::AlreadyApplied)
    }
}

/// Handler for `record-created`: idempotent insert into the record store.
pub struct RecordCreatedHandler<S> {
    store: Arc<S>,
}

impl<S: RecordStore> RecordCreatedHandler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

impl<S: RecordStore> EventHandler for RecordCreatedHandler<S> {
    fn handle(&self, payload: serde_json::Value) -> HandlerFuture<'_> {
        Box::pin(async move {
            let record =
                Record::from_payload(&payload).map_err(|e| HandlerError::Malformed(e.to_string()))?;
            apply_record(self.store.as_ref(), record, "subscriber").await
        })
    }
}
