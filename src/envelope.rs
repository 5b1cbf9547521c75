// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Event envelope: the unit carried by the broker.
//!
//! ```text
//! { "kind": "record-created", "payload": { "id": 1, "name": "GCP" }, "published_at": 1767225600000 }
//! ```
//!
//! `kind` is a closed vocabulary used for dispatch. `published_at` (epoch
//! millis) is optional and only feeds the lag metric; envelopes without it
//! decode fine.
//!
//! # Kind aliases
//!
//! Older producers name the creation event `Platform_Published`. It is
//! normalized to [`RECORD_CREATED`] on decode so handlers register once.

use crate::error::{ReplicationError, Result};
use crate::record::Record;
use serde::{Deserialize, Serialize};

/// Kind of the envelope published when a record is created.
pub const RECORD_CREATED: &str = "record-created";

/// Legacy name for [`RECORD_CREATED`].
pub const LEGACY_RECORD_CREATED: &str = "Platform_Published";

/// Map known aliases to their canonical kind.
pub fn canonical_kind(kind: &str) -> &str {
    match kind {
        LEGACY_RECORD_CREATED => RECORD_CREATED,
        other => other,
    }
}

/// Message body published to the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub kind: String,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<u64>,
}

impl EventEnvelope {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            published_at: None,
        }
    }

    /// Envelope announcing a newly created record.
    pub fn record_created(record: &Record) -> Result<Self> {
        let payload = serde_json::to_value(record)
            .map_err(|e| ReplicationError::Internal(format!("record encode: {e}")))?;
        Ok(Self::new(RECORD_CREATED, payload))
    }

    /// Set `published_at` to now.
    pub fn stamped(mut self) -> Self {
        self.published_at = Some(chrono::Utc::now().timestamp_millis().max(0) as u64);
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| ReplicationError::Internal(format!("envelope encode: {e}")))
    }

    /// Decode a broker message body.
    ///
    /// Fails on invalid JSON, a missing field, or a blank kind. The kind is
    /// normalized through [`canonical_kind`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut envelope: EventEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| ReplicationError::EnvelopeDecode(e.to_string()))?;
        if envelope.kind.trim().is_empty() {
            return Err(ReplicationError::EnvelopeDecode("blank kind".to_string()));
        }
        let canonical = canonical_kind(&envelope.kind);
        if canonical != envelope.kind {
            envelope.kind = canonical.to_string();
        }
        Ok(envelope)
    }

    /// Milliseconds between publish and `now_ms`, if the envelope was stamped.
    ///
    /// Clock skew between services can put `published_at` in the future;
    /// that reads as zero lag.
    pub fn lag_ms(&self, now_ms: u64) -> Option<u64> {
        self.published_at.map(|at| now_ms.saturating_sub(at))
    }
}
