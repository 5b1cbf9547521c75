//! Fuzz target for envelope decoding and dispatch.
//!
//! Broker message bodies come from another process, so decoding must never
//! panic, and dispatching any body must end in an acknowledgeable outcome.

#![no_main]

use libfuzzer_sys::fuzz_target;
use record_replication::dispatch::Dispatcher;
use record_replication::envelope::EventEnvelope;
use record_replication::handlers::RecordCreatedHandler;
use record_replication::store::MemoryRecordStore;
use record_replication::RECORD_CREATED;
use std::sync::Arc;

fuzz_target!(|data: &[u8]| {
    // Should never panic
    if let Ok(envelope) = EventEnvelope::from_bytes(data) {
        assert!(!envelope.kind.trim().is_empty());
        let _ = envelope.lag_ms(u64::MAX);
        let _ = envelope.lag_ms(0);
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let store = Arc::new(MemoryRecordStore::new());
    let dispatcher = Dispatcher::new()
        .with_handler(RECORD_CREATED, Arc::new(RecordCreatedHandler::new(store)));
    let outcome = runtime.block_on(dispatcher.dispatch_bytes(data));
    assert!(outcome.should_ack());
});
