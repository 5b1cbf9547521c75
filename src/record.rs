// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The replicated record.
//!
//! A record is created once in the primary store, which assigns its `id`.
//! The id never changes afterwards, which is what lets the secondary side
//! apply the same record any number of times with a single effect.

use crate::error::{ReplicationError, Result};
use serde::{Deserialize, Serialize};

/// Identifier assigned by the primary store.
pub type RecordId = i64;

/// A record replicated from the platform service to the command service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Primary-store identifier (immutable once assigned).
    pub id: RecordId,
    /// Human-readable name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<String>,
}

impl Record {
    /// Create a record with only the required fields.
    pub fn new(id: RecordId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            publisher: None,
            cost: None,
        }
    }

    pub fn with_publisher(mut self, publisher: impl Into<String>) -> Self {
        self.publisher = Some(publisher.into());
        self
    }

    pub fn with_cost(mut self, cost: impl Into<String>) -> Self {
        self.cost = Some(cost.into());
        self
    }

    /// Check the record is structurally valid for replication.
    ///
    /// Ids start at 1 in the primary store; anything lower was never assigned.
    pub fn validate(&self) -> Result<()> {
        if self.id < 1 {
            return Err(ReplicationError::PayloadDecode(format!(
                "record id {} was never assigned by the primary store",
                self.id
            )));
        }
        if self.name.trim().is_empty() {
            return Err(ReplicationError::PayloadDecode(format!(
                "record {} has a blank name",
                self.id
            )));
        }
        Ok(())
    }

    /// Decode and validate a record from a JSON payload.
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self> {
        let record: Record = serde_json::from_value(payload.clone())
            .map_err(|e| ReplicationError::PayloadDecode(e.to_string()))?;
        record.validate()?;
        Ok(record)
    }
}
