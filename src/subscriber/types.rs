//! Subscriber state types.
//!
//! # State Transitions
//!
//! ```text
//!                 start()
//! Disconnected ────────────→ Connecting ──(queue declared)──→ Bound
//!      ↑                         │                              │
//!      │      (connect failed,   │                (pending      │
//!      │       backoff)          │                 drained)     ↓
//!      └─────────────────────────┴──────(broker error)─────  Consuming
//!
//!   any state ──shutdown()──→ Stopped
//! ```
//!
//! - **Disconnected**: No broker connection. Initial state, and the state
//!   between a broker error and the next reconnect attempt.
//! - **Connecting**: Opening a broker connection.
//! - **Bound**: Connected; the durable queue is declared on every
//!   subscribed stream.
//! - **Consuming**: Reading and acknowledging messages.
//! - **Stopped**: Shutdown complete (or reconnect budget exhausted).

use std::time::Duration;

/// State of the event subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Disconnected,
    Connecting,
    Bound,
    Consuming,
    Stopped,
}

impl std::fmt::Display for SubscriberState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriberState::Disconnected => write!(f, "Disconnected"),
            SubscriberState::Connecting => write!(f, "Connecting"),
            SubscriberState::Bound => write!(f, "Bound"),
            SubscriberState::Consuming => write!(f, "Consuming"),
            SubscriberState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Health snapshot for readiness/liveness endpoints.
///
/// Built from cached counters and the state channel; no broker I/O.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub state: SubscriberState,
    /// True while consuming.
    pub ready: bool,
    pub queue: String,
    pub consumer: String,
    pub streams: Vec<String>,
    pub messages_received: u64,
    pub messages_acked: u64,
    /// Messages left unacknowledged after a transient failure.
    pub messages_failed: u64,
    /// Reconnect attempts since start.
    pub reconnects: u64,
    /// Time since the last message was processed, if any.
    pub since_last_message: Option<Duration>,
}
