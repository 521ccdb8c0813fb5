//! The four sinks the Distributor fans each alarm out to (spec §4.K):
//! history persistence, websocket topics, pub/sub topics, and the Sync
//! Service. Each is a thin [`Sink`] adapter over an existing component;
//! the retry/circuit/bulkhead/timeout decoration happens once, in
//! [`crate::build_distributor`], not here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fw_distributor::{Sink, SinkError};
use fw_history::{HistoryBackend, HistoryStore};
use fw_protocol::AlarmEvent;
use fw_queue::Producer;
use fw_sync::SyncService;

pub struct HistorySink<B: HistoryBackend> {
    store: Arc<HistoryStore<B>>,
}

impl<B: HistoryBackend> HistorySink<B> {
    pub fn new(store: Arc<HistoryStore<B>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<B: HistoryBackend + 'static> Sink for HistorySink<B> {
    fn name(&self) -> &str {
        "history"
    }

    async fn send(&self, alarm: &AlarmEvent, _deadline: Duration) -> Result<(), SinkError> {
        let timestamp_ms = fw_protocol::parse_iso8601(&alarm.timestamp).unwrap_or_default();
        self.store
            .record(alarm.id, timestamp_ms, alarm)
            .await
            .map_err(|e| SinkError::Failed("history".to_string(), e.to_string()))
    }
}

/// Publishes to websocket topics `alarm/all` and `alarm/{severity}` (spec
/// §6). The gateway that actually terminates dashboard websocket
/// connections subscribes to these same queue topics; this sink only
/// publishes into the queue abstraction that fronts them.
pub struct WebsocketSink {
    producer: Arc<dyn Producer>,
}

impl WebsocketSink {
    pub fn new(producer: Arc<dyn Producer>) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl Sink for WebsocketSink {
    fn name(&self) -> &str {
        "websocket"
    }

    async fn send(&self, alarm: &AlarmEvent, _deadline: Duration) -> Result<(), SinkError> {
        publish_to_topic_suffixes(&self.producer, "websocket", alarm).await
    }
}

/// Publishes to pub/sub topics `alarm/all` and `alarm/{severity}` (spec §6),
/// the same envelope and suffix scheme as the websocket sink but on a
/// distinct channel for out-of-process subscribers.
pub struct PubSubSink {
    producer: Arc<dyn Producer>,
}

impl PubSubSink {
    pub fn new(producer: Arc<dyn Producer>) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl Sink for PubSubSink {
    fn name(&self) -> &str {
        "pubsub"
    }

    async fn send(&self, alarm: &AlarmEvent, _deadline: Duration) -> Result<(), SinkError> {
        publish_to_topic_suffixes(&self.producer, "pubsub", alarm).await
    }
}

async fn publish_to_topic_suffixes(producer: &Arc<dyn Producer>, sink_name: &str, alarm: &AlarmEvent) -> Result<(), SinkError> {
    let payload = serde_json::to_vec(alarm).expect("AlarmEvent always serializes");
    for suffix in alarm.topic_suffixes() {
        producer
            .send(&format!("alarm/{suffix}"), payload.clone())
            .await
            .map_err(|e| SinkError::Failed(sink_name.to_string(), e.to_string()))?;
    }
    Ok(())
}

/// Notifies the Sync Service so push subscribers and the next snapshot
/// observe this alarm (spec §4.N: "every successfully distributed alarm is
/// broadcast").
pub struct SyncSink {
    sync: Arc<SyncService>,
}

impl SyncSink {
    pub fn new(sync: Arc<SyncService>) -> Self {
        Self { sync }
    }
}

#[async_trait]
impl Sink for SyncSink {
    fn name(&self) -> &str {
        "sync"
    }

    async fn send(&self, alarm: &AlarmEvent, _deadline: Duration) -> Result<(), SinkError> {
        let timestamp_ms = fw_protocol::parse_iso8601(&alarm.timestamp).unwrap_or_default();
        self.sync.notify(alarm.clone(), timestamp_ms);
        Ok(())
    }
}

/// Publishes the Sync Service's periodic bootstrap snapshot to the
/// `snapshot` topic (spec §4.N).
pub struct TopicSnapshotPublisher {
    producer: Arc<dyn Producer>,
}

impl TopicSnapshotPublisher {
    pub fn new(producer: Arc<dyn Producer>) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl fw_sync::SnapshotPublisher for TopicSnapshotPublisher {
    async fn publish_snapshot(&self, events: &[AlarmEvent]) {
        let payload = serde_json::to_vec(events).expect("snapshot always serializes");
        if let Err(e) = self.producer.send("snapshot", payload).await {
            tracing::warn!(error = %e, "snapshot broadcast failed");
        }
    }
}
