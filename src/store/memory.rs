// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory record store (development mode and tests).

use super::{RecordStore, StoreFuture};
use crate::record::{Record, RecordId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

/// Record store backed by a concurrent map.
///
/// The per-key entry lock makes `insert_if_absent` atomic per id.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: DashMap<RecordId, Record>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordStore for MemoryRecordStore {
    fn insert_if_absent(&self, record: Record) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let inserted = match self.records.entry(record.id) {
                Entry::Occupied(_) => false,
                Entry::Vacant(slot) => {
                    slot.insert(record);
                    true
                }
            };
            trace!(inserted, "Memory store insert_if_absent");
            Ok(inserted)
        })
    }

    fn get(&self, id: RecordId) -> StoreFuture<'_, Option<Record>> {
        Box::pin(async move { Ok(self.records.get(&id).map(|r| r.value().clone())) })
    }

    fn all(&self) -> StoreFuture<'_, Vec<Record>> {
        Box::pin(async move {
            let mut records: Vec<Record> =
                self.records.iter().map(|r| r.value().clone()).collect();
            records.sort_by_key(|r| r.id);
            Ok(records)
        })
    }
}
