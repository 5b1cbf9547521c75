// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory broker for tests and single-process development.
//!
//! Mirrors the Redis Streams semantics the subscriber depends on: consumer
//! groups start at the beginning of the retained stream, messages stay
//! pending per consumer until acked, and pending reads never block.
//!
//! It also exposes fault hooks:
//!
//! - [`MemoryBroker::disconnect_all()`] breaks every open connection
//!   (blocked reads wake up and fail), as a server restart would.
//! - [`MemoryBroker::set_available()`] makes new connects fail until the
//!   broker is made available again.

use super::{Broker, BrokerConnection, BrokerFuture, ConsumeRequest, Delivery, ReadFrom};
use crate::error::{ReplicationError, Result};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::trace;

#[derive(Debug)]
struct PendingEntry {
    consumer: String,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct GroupState {
    last_delivered: u64,
    pending: BTreeMap<u64, PendingEntry>,
}

#[derive(Debug, Default)]
struct StreamState {
    entries: VecDeque<(u64, Vec<u8>)>,
    last_seq: u64,
    groups: HashMap<String, GroupState>,
}

#[derive(Debug)]
struct State {
    streams: HashMap<String, StreamState>,
    available: bool,
    epoch: u64,
}

struct Shared {
    state: Mutex<State>,
    notify: Notify,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

impl Shared {
    /// Never held across an await.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn message_id(seq: u64) -> String {
    format!("{seq}-0")
}

fn parse_message_id(id: &str) -> Option<u64> {
    id.split('-').next()?.parse().ok()
}

fn no_group(stream: &str, queue: &str) -> ReplicationError {
    ReplicationError::broker_msg(
        "XREADGROUP",
        format!("NOGROUP no consumer group {queue:?} on stream {stream:?}"),
    )
}

/// Shared in-process broker. Clones share state.
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    streams: HashMap::new(),
                    available: true,
                    epoch: 0,
                }),
                notify: Notify::new(),
                connects: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
            }),
        }
    }

    /// Break every open connection. New connects still succeed.
    pub fn disconnect_all(&self) {
        self.shared.lock().epoch += 1;
        self.shared.notify.notify_waiters();
    }

    /// Take the broker down (`false`) or bring it back (`true`).
    ///
    /// Going down also breaks every open connection.
    pub fn set_available(&self, available: bool) {
        {
            let mut state = self.shared.lock();
            state.available = available;
            if !available {
                state.epoch += 1;
            }
        }
        self.shared.notify.notify_waiters();
    }

    /// Successful connects so far.
    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::Acquire)
    }

    /// Connections explicitly closed so far.
    pub fn close_count(&self) -> usize {
        self.shared.closes.load(Ordering::Acquire)
    }

    /// Bodies currently retained in `stream`, oldest first.
    pub fn messages(&self, stream: &str) -> Vec<Vec<u8>> {
        self.shared
            .lock()
            .streams
            .get(stream)
            .map(|s| s.entries.iter().map(|(_, body)| body.clone()).collect())
            .unwrap_or_default()
    }

    /// Delivered but unacknowledged messages of `queue` on `stream`.
    pub fn pending_count(&self, stream: &str, queue: &str) -> usize {
        self.shared
            .lock()
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(queue))
            .map(|g| g.pending.len())
            .unwrap_or(0)
    }

    /// Highest delivery count among pending messages of `queue` on `stream`.
    pub fn max_deliveries(&self, stream: &str, queue: &str) -> u32 {
        self.shared
            .lock()
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(queue))
            .and_then(|g| g.pending.values().map(|p| p.deliveries).max())
            .unwrap_or(0)
    }
}

impl Broker for MemoryBroker {
    type Connection = MemoryConnection;

    fn connect(&self) -> BrokerFuture<'_, MemoryConnection> {
        Box::pin(async move {
            let state = self.shared.lock();
            if !state.available {
                return Err(ReplicationError::broker_msg("CONNECT", "broker unavailable"));
            }
            self.shared.connects.fetch_add(1, Ordering::AcqRel);
            Ok(MemoryConnection {
                shared: Arc::clone(&self.shared),
                epoch: state.epoch,
            })
        })
    }
}

/// Connection to a [`MemoryBroker`].
#[derive(Clone)]
pub struct MemoryConnection {
    shared: Arc<Shared>,
    epoch: u64,
}

impl MemoryConnection {
    fn check(&self, state: &State, operation: &str) -> Result<()> {
        if !state.available || state.epoch != self.epoch {
            return Err(ReplicationError::broker_msg(operation, "connection lost"));
        }
        Ok(())
    }

    fn read_new(&self, state: &mut State, request: &ConsumeRequest) -> Result<Vec<Delivery>> {
        let mut deliveries = Vec::new();
        for stream_name in &request.streams {
            let stream = state
                .streams
                .get_mut(stream_name)
                .ok_or_else(|| no_group(stream_name, &request.queue))?;
            let StreamState { entries, groups, .. } = stream;
            let group = groups
                .get_mut(&request.queue)
                .ok_or_else(|| no_group(stream_name, &request.queue))?;

            for (seq, body) in entries.iter() {
                if deliveries.len() >= request.count {
                    break;
                }
                if *seq <= group.last_delivered {
                    continue;
                }
                group.last_delivered = *seq;
                group.pending.insert(
                    *seq,
                    PendingEntry {
                        consumer: request.consumer.clone(),
                        deliveries: 1,
                    },
                );
                deliveries.push(Delivery {
                    stream: stream_name.clone(),
                    id: message_id(*seq),
                    body: Some(body.clone()),
                });
            }
        }
        Ok(deliveries)
    }

    fn read_pending(&self, state: &mut State, request: &ConsumeRequest) -> Result<Vec<Delivery>> {
        let mut deliveries = Vec::new();
        for stream_name in &request.streams {
            let stream = state
                .streams
                .get_mut(stream_name)
                .ok_or_else(|| no_group(stream_name, &request.queue))?;
            let StreamState { entries, groups, .. } = stream;
            let group = groups
                .get_mut(&request.queue)
                .ok_or_else(|| no_group(stream_name, &request.queue))?;

            for (seq, pending) in group.pending.iter_mut() {
                if deliveries.len() >= request.count {
                    break;
                }
                if pending.consumer != request.consumer {
                    continue;
                }
                pending.deliveries += 1;
                let body = entries
                    .iter()
                    .find(|(entry_seq, _)| entry_seq == seq)
                    .map(|(_, body)| body.clone());
                deliveries.push(Delivery {
                    stream: stream_name.clone(),
                    id: message_id(*seq),
                    body,
                });
            }
        }
        Ok(deliveries)
    }
}

impl BrokerConnection for MemoryConnection {
    fn publish(&self, stream: &str, body: &[u8], max_len: usize) -> BrokerFuture<'_, String> {
        let stream = stream.to_string();
        let body = body.to_vec();
        Box::pin(async move {
            let id = {
                let mut state = self.shared.lock();
                self.check(&state, "XADD")?;
                let entry = state.streams.entry(stream.clone()).or_default();
                entry.last_seq += 1;
                let seq = entry.last_seq;
                entry.entries.push_back((seq, body));
                while entry.entries.len() > max_len.max(1) {
                    entry.entries.pop_front();
                }
                message_id(seq)
            };
            self.shared.notify.notify_waiters();
            trace!(stream = %stream, id = %id, "Memory broker publish");
            Ok(id)
        })
    }

    fn declare_queue(&self, stream: &str, queue: &str) -> BrokerFuture<'_, ()> {
        let stream = stream.to_string();
        let queue = queue.to_string();
        Box::pin(async move {
            let mut state = self.shared.lock();
            self.check(&state, "XGROUP CREATE")?;
            state
                .streams
                .entry(stream)
                .or_default()
                .groups
                .entry(queue)
                .or_default();
            Ok(())
        })
    }

    fn consume(&self, request: ConsumeRequest) -> BrokerFuture<'_, Vec<Delivery>> {
        Box::pin(async move {
            let deadline = tokio::time::Instant::now() + request.block;
            loop {
                // Register interest before checking so a publish between the
                // check and the wait is not missed.
                let notified = self.shared.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                {
                    let mut state = self.shared.lock();
                    self.check(&state, "XREADGROUP")?;
                    let deliveries = match request.from {
                        ReadFrom::Pending => self.read_pending(&mut state, &request)?,
                        ReadFrom::New => self.read_new(&mut state, &request)?,
                    };
                    if !deliveries.is_empty() || request.from == ReadFrom::Pending {
                        return Ok(deliveries);
                    }
                }

                if tokio::time::timeout_at(deadline, notified).await.is_err() {
                    return Ok(Vec::new());
                }
            }
        })
    }

    fn ack(&self, stream: &str, queue: &str, id: &str) -> BrokerFuture<'_, ()> {
        let stream = stream.to_string();
        let queue = queue.to_string();
        let seq = parse_message_id(id);
        Box::pin(async move {
            let mut state = self.shared.lock();
            self.check(&state, "XACK")?;
            // Unknown ids ack nothing, as XACK returns 0
            if let (Some(seq), Some(group)) = (
                seq,
                state
                    .streams
                    .get_mut(&stream)
                    .and_then(|s| s.groups.get_mut(&queue)),
            ) {
                group.pending.remove(&seq);
            }
            Ok(())
        })
    }

    fn close(&self) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            self.shared.closes.fetch_add(1, Ordering::AcqRel);
            Ok(())
        })
    }
}
