//! Configuration for record replication.
//!
//! Configuration is passed to [`Replicator::new()`](crate::Replicator::new),
//! [`EventPublisher::new()`](crate::EventPublisher::new) and
//! [`EventSubscriber::new()`](crate::EventSubscriber::new), and can be
//! constructed programmatically or deserialized from YAML/JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use record_replication::config::{ReplicationConfig, ExchangeType};
//!
//! let mut config = ReplicationConfig::for_testing("platform-service");
//! config.broker.exchange_type = ExchangeType::Topic;
//! config.sync.counterpart_url = "http://command-service:6000".into();
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ReplicationConfig
//! ├── service_name: String          # Used in logs and as default consumer name
//! ├── broker: BrokerConfig          # Exchange (stream) topology and timeouts
//! ├── sync: SyncConfig              # Direct HTTP call to the counterpart
//! └── subscriber: SubscriberConfig  # Durable queue (consumer group) settings
//!     └── reconnect: ReconnectConfig
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! service_name: "command-service"
//!
//! broker:
//!   url: "redis://broker:6379"
//!   exchange: "trigger"
//!   exchange_type: fanout
//!
//! sync:
//!   enabled: true
//!   counterpart_url: "http://command-service:6000"
//!   timeout: "2s"
//!
//! subscriber:
//!   queue: "command-service"
//!   block_timeout: "2s"
//!   reconnect:
//!     initial_delay: "100ms"
//!     max_delay: "30s"
//! ```

use crate::error::{ReplicationError, Result};
use crate::resilience::RetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level replication config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Name of the service running this side of the replication.
    /// Used in log fields and as the default consumer name.
    pub service_name: String,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub subscriber: SubscriberConfig,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            service_name: "platform-service".to_string(),
            broker: BrokerConfig::default(),
            sync: SyncConfig::default(),
            subscriber: SubscriberConfig::default(),
        }
    }
}

impl ReplicationConfig {
    /// Create a minimal config for testing (short timeouts, fast reconnect).
    pub fn for_testing(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            broker: BrokerConfig {
                connect_timeout: "1s".to_string(),
                publish_timeout: "1s".to_string(),
                ..Default::default()
            },
            sync: SyncConfig {
                timeout: "500ms".to_string(),
                ..Default::default()
            },
            subscriber: SubscriberConfig {
                queue: format!("{}-queue", service_name),
                consumer_name: Some(format!("{}-1", service_name)),
                block_timeout: "50ms".to_string(),
                redelivery_delay: "50ms".to_string(),
                reconnect: ReconnectConfig::for_testing(),
                ..Default::default()
            },
        }
    }

    /// Name this process registers under in the consumer group.
    pub fn consumer_name(&self) -> String {
        self.subscriber
            .consumer_name
            .clone()
            .unwrap_or_else(|| self.service_name.clone())
    }

    /// Streams the subscriber reads, one per binding.
    pub fn subscribed_streams(&self) -> Vec<String> {
        let mut streams: Vec<String> = self
            .subscriber
            .bindings
            .iter()
            .map(|kind| self.broker.stream_for(kind))
            .collect();
        streams.sort();
        streams.dedup();
        streams
    }

    /// Check the config for values that would only fail later at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.service_name.trim().is_empty() {
            return Err(ReplicationError::Config("service_name is empty".into()));
        }
        self.broker.validate()?;
        self.sync.validate()?;
        self.subscriber.validate()?;
        Ok(())
    }
}

/// Parse a human duration string, reporting the field on failure.
fn check_duration(field: &str, value: &str) -> Result<()> {
    humantime::parse_duration(value)
        .map(|_| ())
        .map_err(|e| ReplicationError::Config(format!("{field}: invalid duration {value:?}: {e}")))
}

fn default_true() -> bool {
    true
}

// ═══════════════════════════════════════════════════════════════════════════════
// BrokerConfig: exchange topology
// ═══════════════════════════════════════════════════════════════════════════════

/// How envelopes are routed from the exchange to queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeType {
    /// Every bound queue sees every envelope (single stream).
    #[default]
    Fanout,
    /// Envelopes are routed by kind (one stream per kind).
    Topic,
}

/// Broker connection and exchange settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Redis URL of the broker.
    #[serde(default = "default_broker_url")]
    pub url: String,

    /// Exchange name. With `fanout` this is the stream key; with `topic`
    /// streams are named `<exchange>.<kind>`.
    #[serde(default = "default_exchange")]
    pub exchange: String,

    #[serde(default)]
    pub exchange_type: ExchangeType,

    /// Approximate cap on retained messages per stream (`XADD MAXLEN ~`).
    #[serde(default = "default_max_len")]
    pub max_len: usize,

    /// Timeout for establishing a broker connection (e.g., "5s").
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,

    /// Timeout for a single publish (e.g., "2s").
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout: String,
}

fn default_broker_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_exchange() -> String {
    "trigger".to_string()
}

fn default_max_len() -> usize {
    10_000
}

fn default_connect_timeout() -> String {
    "5s".to_string()
}

fn default_publish_timeout() -> String {
    "2s".to_string()
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            exchange: default_exchange(),
            exchange_type: ExchangeType::Fanout,
            max_len: default_max_len(),
            connect_timeout: default_connect_timeout(),
            publish_timeout: default_publish_timeout(),
        }
    }
}

impl BrokerConfig {
    /// Stream an envelope of the given kind is published to.
    pub fn stream_for(&self, kind: &str) -> String {
        match self.exchange_type {
            ExchangeType::Fanout => self.exchange.clone(),
            ExchangeType::Topic => format!("{}.{}", self.exchange, kind),
        }
    }

    pub fn connect_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.connect_timeout).unwrap_or(Duration::from_secs(5))
    }

    pub fn publish_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.publish_timeout).unwrap_or(Duration::from_secs(2))
    }

    fn validate(&self) -> Result<()> {
        if self.exchange.trim().is_empty() {
            return Err(ReplicationError::Config("broker.exchange is empty".into()));
        }
        if self.max_len == 0 {
            return Err(ReplicationError::Config("broker.max_len must be > 0".into()));
        }
        check_duration("broker.connect_timeout", &self.connect_timeout)?;
        check_duration("broker.publish_timeout", &self.publish_timeout)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SyncConfig: direct call to the counterpart
// ═══════════════════════════════════════════════════════════════════════════════

/// Sync replication (direct HTTP call) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Whether the direct call is attempted at all.
    /// Publication happens regardless.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Base URL of the counterpart service.
    #[serde(default = "default_counterpart_url")]
    pub counterpart_url: String,

    /// Path of the counterpart's ingestion endpoint.
    #[serde(default = "default_ingest_path")]
    pub ingest_path: String,

    /// Upper bound on the whole call (e.g., "2s").
    #[serde(default = "default_sync_timeout")]
    pub timeout: String,
}

fn default_counterpart_url() -> String {
    "http://localhost:6000".to_string()
}

fn default_ingest_path() -> String {
    "/api/c/platforms".to_string()
}

fn default_sync_timeout() -> String {
    "2s".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            counterpart_url: default_counterpart_url(),
            ingest_path: default_ingest_path(),
            timeout: default_sync_timeout(),
        }
    }
}

impl SyncConfig {
    /// Full URL of the counterpart's ingestion endpoint.
    pub fn endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.counterpart_url.trim_end_matches('/'),
            self.ingest_path.trim_start_matches('/')
        )
    }

    pub fn timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.timeout).unwrap_or(Duration::from_secs(2))
    }

    fn validate(&self) -> Result<()> {
        if self.enabled && !self.counterpart_url.starts_with("http") {
            return Err(ReplicationError::Config(format!(
                "sync.counterpart_url must be an http(s) URL, got {:?}",
                self.counterpart_url
            )));
        }
        check_duration("sync.timeout", &self.timeout)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SubscriberConfig: durable queue and receive loop
// ═══════════════════════════════════════════════════════════════════════════════

/// Subscriber settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberConfig {
    /// Durable queue name (consumer group).
    #[serde(default = "default_queue")]
    pub queue: String,

    /// Consumer name within the group. Defaults to the service name.
    /// Must be stable across restarts for pending messages to be redelivered.
    #[serde(default)]
    pub consumer_name: Option<String>,

    /// Kinds the queue is bound to. Only matters for `topic` exchanges.
    #[serde(default = "default_bindings")]
    pub bindings: Vec<String>,

    /// How long a single blocking read waits (e.g., "2s").
    #[serde(default = "default_block_timeout")]
    pub block_timeout: String,

    /// Maximum messages per read.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Wait before re-reading pending messages after a transient failure.
    #[serde(default = "default_redelivery_delay")]
    pub redelivery_delay: String,

    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_queue() -> String {
    "command-service".to_string()
}

fn default_bindings() -> Vec<String> {
    vec![crate::envelope::RECORD_CREATED.to_string()]
}

fn default_block_timeout() -> String {
    "2s".to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_redelivery_delay() -> String {
    "1s".to_string()
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            queue: default_queue(),
            consumer_name: None,
            bindings: default_bindings(),
            block_timeout: default_block_timeout(),
            batch_size: default_batch_size(),
            redelivery_delay: default_redelivery_delay(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl SubscriberConfig {
    pub fn block_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.block_timeout).unwrap_or(Duration::from_secs(2))
    }

    pub fn redelivery_delay_duration(&self) -> Duration {
        humantime::parse_duration(&self.redelivery_delay).unwrap_or(Duration::from_secs(1))
    }

    fn validate(&self) -> Result<()> {
        if self.queue.trim().is_empty() {
            return Err(ReplicationError::Config("subscriber.queue is empty".into()));
        }
        if self.bindings.is_empty() {
            return Err(ReplicationError::Config(
                "subscriber.bindings must name at least one kind".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ReplicationError::Config(
                "subscriber.batch_size must be > 0".into(),
            ));
        }
        check_duration("subscriber.block_timeout", &self.block_timeout)?;
        // A zero block means "wait forever" to XREADGROUP
        if self.block_timeout_duration() < Duration::from_millis(1) {
            return Err(ReplicationError::Config(
                "subscriber.block_timeout must be at least 1ms".into(),
            ));
        }
        check_duration("subscriber.redelivery_delay", &self.redelivery_delay)?;
        self.reconnect.validate()
    }
}

/// Subscriber reconnect policy.
///
/// Delay for attempt n = min(initial_delay * factor^n, max_delay).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_initial")]
    pub initial_delay: String,

    #[serde(default = "default_reconnect_max")]
    pub max_delay: String,

    #[serde(default = "default_reconnect_factor")]
    pub factor: f64,

    /// Give up after this many consecutive attempts (`None` = never).
    #[serde(default)]
    pub max_attempts: Option<usize>,
}

fn default_reconnect_initial() -> String {
    "100ms".to_string()
}

fn default_reconnect_max() -> String {
    "30s".to_string()
}

fn default_reconnect_factor() -> f64 {
    2.0
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: default_reconnect_initial(),
            max_delay: default_reconnect_max(),
            factor: default_reconnect_factor(),
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Fast reconnects for tests.
    pub fn for_testing() -> Self {
        Self {
            initial_delay: "10ms".to_string(),
            max_delay: "100ms".to_string(),
            factor: 2.0,
            max_attempts: None,
        }
    }

    /// Build the retry policy used by the subscriber's reconnect loop.
    ///
    /// Starts from [`RetryConfig::daemon()`]; unparseable durations keep the
    /// daemon values.
    pub fn retry_config(&self, connection_timeout: Duration) -> RetryConfig {
        let daemon = RetryConfig::daemon();
        RetryConfig {
            max_attempts: self.max_attempts.unwrap_or(daemon.max_attempts),
            initial_delay: humantime::parse_duration(&self.initial_delay)
                .unwrap_or(daemon.initial_delay),
            max_delay: humantime::parse_duration(&self.max_delay).unwrap_or(daemon.max_delay),
            backoff_factor: self.factor,
            connection_timeout,
        }
    }

    fn validate(&self) -> Result<()> {
        check_duration("subscriber.reconnect.initial_delay", &self.initial_delay)?;
        check_duration("subscriber.reconnect.max_delay", &self.max_delay)?;
        if !(self.factor >= 1.0) {
            return Err(ReplicationError::Config(
                "subscriber.reconnect.factor must be >= 1.0".into(),
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
