//! Controllable record store.
//!
//! Wraps a [`MemoryRecordStore`] and can be switched at runtime to fail every
//! insert (store outage) or to hang forever (a consumer stuck mid-message,
//! used to simulate a crash before ack).

use record_replication::store::{MemoryRecordStore, RecordStore, StoreFuture};
use record_replication::{Record, RecordId, ReplicationError};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StoreMode {
    Healthy = 0,
    Failing = 1,
    Hanging = 2,
}

#[derive(Default)]
pub struct MockStore {
    inner: MemoryRecordStore,
    mode: AtomicU8,
    insert_calls: AtomicUsize,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mode: StoreMode) -> Self {
        let store = Self::default();
        store.set_mode(mode);
        store
    }

    pub fn set_mode(&self, mode: StoreMode) {
        self.mode.store(mode as u8, Ordering::SeqCst);
    }

    fn mode(&self) -> StoreMode {
        match self.mode.load(Ordering::SeqCst) {
            1 => StoreMode::Failing,
            2 => StoreMode::Hanging,
            _ => StoreMode::Healthy,
        }
    }

    /// insert_if_absent calls so far, whatever their result.
    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

impl RecordStore for MockStore {
    fn insert_if_absent(&self, record: Record) -> StoreFuture<'_, bool> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            match self.mode() {
                StoreMode::Healthy => self.inner.insert_if_absent(record).await,
                StoreMode::Failing => Err(ReplicationError::Store("store offline".into())),
                StoreMode::Hanging => futures::future::pending().await,
            }
        })
    }

    fn get(&self, id: RecordId) -> StoreFuture<'_, Option<Record>> {
        self.inner.get(id)
    }

    fn all(&self) -> StoreFuture<'_, Vec<Record>> {
        self.inner.all()
    }
}
