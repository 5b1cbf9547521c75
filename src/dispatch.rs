// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Event dispatch: kind → handler.
//!
//! The dispatcher never fails. Every message ends in one
//! [`DispatchOutcome`], and only [`DispatchOutcome::Failed`] keeps a message
//! unacknowledged. A panicking handler is contained here so one poison
//! message cannot take down the receive loop.

use crate::envelope::{canonical_kind, EventEnvelope};
use crate::error::ReplicationError;
use crate::handlers::{ApplyOutcome, EventHandler, HandlerError};
use crate::metrics;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// What happened to one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler applied it (or found it already applied).
    Handled(ApplyOutcome),
    /// No handler for this kind.
    Ignored,
    /// Undecodable envelope, malformed payload, or handler panic.
    Rejected(String),
    /// Transient handler failure; redeliver later.
    Failed(String),
}

impl DispatchOutcome {
    /// Whether the message may be acknowledged.
    pub fn should_ack(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Handled(_) => "handled",
            Self::Ignored => "ignored",
            Self::Rejected(_) => "rejected",
            Self::Failed(_) => "failed",
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Routes envelopes to the handler registered for their kind.
///
/// Built once at startup; read-only afterwards.
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind` (aliases are normalized).
    ///
    /// A later registration for the same kind replaces the earlier one.
    pub fn with_handler(mut self, kind: &str, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers
            .insert(canonical_kind(kind).to_string(), handler);
        self
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Decode a raw message body and dispatch it.
    pub async fn dispatch_bytes(&self, body: &[u8]) -> DispatchOutcome {
        match EventEnvelope::from_bytes(body) {
            Ok(envelope) => self.dispatch(&envelope).await,
            Err(e) => self.reject_undecodable(&e, body.len()),
        }
    }

    /// Outcome for a body that failed to decode (`len` bytes).
    pub fn reject_undecodable(&self, error: &ReplicationError, len: usize) -> DispatchOutcome {
        error!(error = %error, len, "Discarding undecodable message");
        metrics::record_dispatch("undecodable", "rejected", Duration::ZERO);
        DispatchOutcome::Rejected(error.to_string())
    }

    /// Dispatch a decoded envelope.
    pub async fn dispatch(&self, envelope: &EventEnvelope) -> DispatchOutcome {
        let kind = canonical_kind(&envelope.kind);
        let start = Instant::now();

        let outcome = match self.handlers.get(kind) {
            None => {
                warn!(kind = %envelope.kind, "No handler for event kind, ignoring");
                DispatchOutcome::Ignored
            }
            Some(handler) => {
                // `handle` itself runs inside the guard: it may panic before
                // returning its future.
                let payload = envelope.payload.clone();
                let result = AssertUnwindSafe(async move { handler.handle(payload).await })
                    .catch_unwind()
                    .await;
                match result {
                    Ok(Ok(applied)) => {
                        debug!(kind, outcome = ?applied, "Event handled");
                        DispatchOutcome::Handled(applied)
                    }
                    Ok(Err(HandlerError::Malformed(reason))) => {
                        error!(kind, reason = %reason, "Rejecting malformed event payload");
                        DispatchOutcome::Rejected(reason)
                    }
                    Ok(Err(HandlerError::Transient(reason))) => {
                        warn!(kind, reason = %reason, "Event handling failed, will be redelivered");
                        DispatchOutcome::Failed(reason)
                    }
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        error!(kind, panic = %message, "Event handler panicked, rejecting event");
                        metrics::record_handler_panic(kind);
                        DispatchOutcome::Rejected(format!("handler panicked: {message}"))
                    }
                }
            }
        };

        metrics::record_dispatch(kind, outcome.label(), start.elapsed());
        outcome
    }
}
