// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record store integration traits.
//!
//! The replication core only needs two things from persistence: an
//! idempotent insert keyed by record id, and a lookup by id. Everything else
//! about the storage engine stays behind this trait.
//!
//! # Example
//!
//! ```rust,no_run
//! use record_replication::store::{RecordStore, StoreFuture};
//! use record_replication::record::{Record, RecordId};
//!
//! struct MyBackend { /* ... */ }
//!
//! impl RecordStore for MyBackend {
//!     fn insert_if_absent(&self, _record: Record) -> StoreFuture<'_, bool> {
//!         Box::pin(async move { Ok(true) })
//!     }
//!
//!     fn get(&self, _id: RecordId) -> StoreFuture<'_, Option<Record>> {
//!         Box::pin(async move { Ok(None) })
//!     }
//!
//!     fn all(&self) -> StoreFuture<'_, Vec<Record>> {
//!         Box::pin(async move { Ok(vec![]) })
//!     }
//! }
//! ```

mod memory;
mod sqlite;

pub use memory::MemoryRecordStore;
pub use sqlite::SqliteRecordStore;

use crate::error::Result;
use crate::record::{Record, RecordId};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Type alias for boxed store futures (reduces trait signature complexity).
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// What the replication core needs from a record store.
///
/// Implementations must make `insert_if_absent` atomic per id: two concurrent
/// inserts of the same id must yield exactly one `true`.
pub trait RecordStore: Send + Sync + 'static {
    /// Insert the record unless one with the same id already exists.
    ///
    /// Returns `true` if the record was inserted, `false` if it was already
    /// present (already applied). An existing record is never overwritten.
    fn insert_if_absent(&self, record: Record) -> StoreFuture<'_, bool>;

    /// Look up a record by id.
    fn get(&self, id: RecordId) -> StoreFuture<'_, Option<Record>>;

    /// All records, ordered by id.
    fn all(&self) -> StoreFuture<'_, Vec<Record>>;
}

impl<S: RecordStore> RecordStore for Arc<S> {
    fn insert_if_absent(&self, record: Record) -> StoreFuture<'_, bool> {
        (**self).insert_if_absent(record)
    }

    fn get(&self, id: RecordId) -> StoreFuture<'_, Option<Record>> {
        (**self).get(id)
    }

    fn all(&self) -> StoreFuture<'_, Vec<Record>> {
        (**self).all()
    }
}
