// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Broker transport traits.
//!
//! The publisher and subscriber talk to the broker only through these traits,
//! so the same code runs against Redis Streams in production and the
//! in-memory broker in tests.
//!
//! # Topology on Redis Streams
//!
//! ```text
//!   exchange (fanout)             queue = consumer group
//!   ┌──────────────┐  XREADGROUP  ┌────────────────────┐
//!   │ stream       │─────────────▶│ group "command-…"  │── consumer "cmd-1"
//!   │ "trigger"    │              │ pending (unacked)  │
//!   └──────────────┘◀─── XACK ────└────────────────────┘
//!         ▲
//!         └── XADD MAXLEN ~ n * envelope <json>
//! ```
//!
//! A topic exchange is one stream per kind (`<exchange>.<kind>`); a queue is
//! bound to a kind by creating its group on that stream.
//!
//! # Delivery semantics
//!
//! - [`ReadFrom::New`] hands out messages never delivered to the group and
//!   records them as pending for the reading consumer.
//! - [`ReadFrom::Pending`] re-reads the consumer's own pending messages; this
//!   is how a restarted consumer gets redelivery of what it never acked.
//! - [`BrokerConnection::ack`] removes a message from the pending list.

mod memory;
mod redis_streams;

pub use memory::{MemoryBroker, MemoryConnection};
pub use redis_streams::{RedisBroker, RedisConnection};

use crate::error::Result;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Field under which the envelope body is stored in a stream entry.
pub const ENVELOPE_FIELD: &str = "envelope";

/// Type alias for boxed broker futures (reduces trait signature complexity).
pub type BrokerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Where a consume call starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFrom {
    /// This consumer's delivered-but-unacknowledged messages (never blocks).
    Pending,
    /// Messages not yet delivered to the group (blocks up to the timeout).
    New,
}

/// Parameters of a single read from a queue.
#[derive(Debug, Clone)]
pub struct ConsumeRequest {
    pub streams: Vec<String>,
    pub queue: String,
    pub consumer: String,
    pub from: ReadFrom,
    pub block: Duration,
    pub count: usize,
}

/// A message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Stream the message was read from (needed to ack it).
    pub stream: String,
    /// Broker-assigned message id.
    pub id: String,
    /// Envelope bytes. `None` when a pending message was trimmed from the
    /// stream before it could be redelivered.
    pub body: Option<Vec<u8>>,
}

/// Factory for broker connections.
pub trait Broker: Send + Sync + 'static {
    type Connection: BrokerConnection;

    /// Open a new connection.
    fn connect(&self) -> BrokerFuture<'_, Self::Connection>;
}

/// An open broker connection.
///
/// Connections are cheap handles (`Clone`); callers clone them out of their
/// slot instead of holding a lock across I/O.
pub trait BrokerConnection: Clone + Send + Sync + 'static {
    /// Append a message to `stream`, trimming it to roughly `max_len`.
    /// Returns the broker-assigned id.
    fn publish(&self, stream: &str, body: &[u8], max_len: usize) -> BrokerFuture<'_, String>;

    /// Create `stream` and the durable `queue` bound to it, if missing.
    ///
    /// New queues start at the beginning of the retained stream.
    fn declare_queue(&self, stream: &str, queue: &str) -> BrokerFuture<'_, ()>;

    /// Read messages for a consumer of a queue.
    ///
    /// An empty result means the block timeout elapsed.
    fn consume(&self, request: ConsumeRequest) -> BrokerFuture<'_, Vec<Delivery>>;

    /// Acknowledge a message so it is never redelivered.
    fn ack(&self, stream: &str, queue: &str, id: &str) -> BrokerFuture<'_, ()>;

    /// Release the connection.
    fn close(&self) -> BrokerFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}
