//! Redis Streams broker.
//!
//! Uses `redis::aio::ConnectionManager`, which is multiplexed and cheap to
//! clone. Publisher and subscriber each open their own manager so a blocking
//! `XREADGROUP` never delays a publish.

use super::{Broker, BrokerConnection, BrokerFuture, ConsumeRequest, Delivery, ReadFrom, ENVELOPE_FIELD};
use crate::error::{ReplicationError, Result};
use redis::aio::ConnectionManager;
use redis::streams::{StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Broker backed by a Redis server.
#[derive(Clone)]
pub struct RedisBroker {
    client: Client,
    connect_timeout: Duration,
}

impl RedisBroker {
    /// Create a broker for the given URL (no connection is made yet).
    pub fn new(url: &str, connect_timeout: Duration) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| ReplicationError::Config(format!("Invalid broker URL: {}", e)))?;
        Ok(Self {
            client,
            connect_timeout,
        })
    }

    /// Create a broker from config.
    pub fn from_config(config: &crate::config::BrokerConfig) -> Result<Self> {
        Self::new(&config.url, config.connect_timeout_duration())
    }
}

impl Broker for RedisBroker {
    type Connection = RedisConnection;

    fn connect(&self) -> BrokerFuture<'_, RedisConnection> {
        Box::pin(async move {
            // Wrap connection attempt in a timeout to avoid hanging on unreachable hosts
            match timeout(self.connect_timeout, self.client.get_connection_manager()).await {
                Ok(Ok(conn)) => Ok(RedisConnection { conn }),
                Ok(Err(e)) => Err(ReplicationError::broker("CONNECT", e)),
                Err(_) => Err(ReplicationError::broker_msg(
                    "CONNECT",
                    format!("timed out after {}ms", self.connect_timeout.as_millis()),
                )),
            }
        })
    }
}

/// A live Redis connection.
#[derive(Clone)]
pub struct RedisConnection {
    conn: ConnectionManager,
}

impl BrokerConnection for RedisConnection {
    fn publish(&self, stream: &str, body: &[u8], max_len: usize) -> BrokerFuture<'_, String> {
        let stream = stream.to_string();
        let body = body.to_vec();
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let id: String = conn
                .xadd_maxlen(
                    &stream,
                    StreamMaxlen::Approx(max_len),
                    "*",
                    &[(ENVELOPE_FIELD, body.as_slice())],
                )
                .await
                .map_err(|e| ReplicationError::broker("XADD", e))?;
            trace!(stream = %stream, id = %id, "Published message");
            Ok(id)
        })
    }

    fn declare_queue(&self, stream: &str, queue: &str) -> BrokerFuture<'_, ()> {
        let stream = stream.to_string();
        let queue = queue.to_string();
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let created: redis::RedisResult<()> =
                conn.xgroup_create_mkstream(&stream, &queue, "0").await;
            match created {
                Ok(()) => {
                    debug!(stream = %stream, queue = %queue, "Created consumer group");
                    Ok(())
                }
                // Group already exists: queue is durable, nothing to do
                Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
                Err(e) => Err(ReplicationError::broker("XGROUP CREATE", e)),
            }
        })
    }

    fn consume(&self, request: ConsumeRequest) -> BrokerFuture<'_, Vec<Delivery>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let mut opts = StreamReadOptions::default()
                .group(&request.queue, &request.consumer)
                .count(request.count);
            let start_id = match request.from {
                ReadFrom::New => {
                    opts = opts.block(block_millis(request.block));
                    ">"
                }
                ReadFrom::Pending => "0",
            };
            let ids: Vec<&str> = request.streams.iter().map(|_| start_id).collect();

            // XREADGROUP GROUP queue consumer [BLOCK ms] COUNT n STREAMS s.. id..
            let reply: StreamReadReply = conn
                .xread_options(&request.streams, &ids, &opts)
                .await
                .map_err(|e| ReplicationError::broker("XREADGROUP", e))?;

            let mut deliveries = Vec::new();
            for stream_key in reply.keys {
                for entry in stream_key.ids {
                    let body = envelope_field(&entry.map);
                    if body.is_none() && !entry.map.is_empty() {
                        warn!(
                            stream = %stream_key.key,
                            id = %entry.id,
                            "Stream entry has no envelope field"
                        );
                    }
                    deliveries.push(Delivery {
                        stream: stream_key.key.clone(),
                        id: entry.id,
                        body,
                    });
                }
            }
            Ok(deliveries)
        })
    }

    fn ack(&self, stream: &str, queue: &str, id: &str) -> BrokerFuture<'_, ()> {
        let stream = stream.to_string();
        let queue = queue.to_string();
        let id = id.to_string();
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let _acked: i64 = conn
                .xack(&stream, &queue, &[&id])
                .await
                .map_err(|e| ReplicationError::broker("XACK", e))?;
            Ok(())
        })
    }
}

/// `BLOCK` argument for a blocking read.
///
/// `BLOCK 0` waits forever, so sub-millisecond blocks round up to 1ms.
fn block_millis(block: Duration) -> usize {
    usize::try_from(block.as_millis()).unwrap_or(usize::MAX).max(1)
}

/// Extract the envelope bytes from a stream entry.
///
/// Pending entries whose message was trimmed come back with no fields.
fn envelope_field(fields: &HashMap<String, redis::Value>) -> Option<Vec<u8>> {
    match fields.get(ENVELOPE_FIELD)? {
        redis::Value::BulkString(bytes) => Some(bytes.clone()),
        redis::Value::SimpleString(s) => Some(s.as_bytes().to_vec()),
        _ => None,
    }
}
