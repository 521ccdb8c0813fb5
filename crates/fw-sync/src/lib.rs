//! Component N: the Sync Service (spec §4.N).
//!
//! A hybrid push/pull model over a bounded in-memory window of recently
//! distributed alarms:
//!
//! - push: [`SyncService::notify`] broadcasts every distributed alarm to
//!   any live subscriber via a [`tokio::sync::broadcast`] channel;
//! - pull (snapshot): [`SyncService::snapshot`] returns events since a
//!   watermark, bounded by `max_events_per_snapshot`, and advances the
//!   client's watermark;
//! - pull (delta): [`SyncService::delta`] returns events since the
//!   client's last snapshot/delta call;
//! - broadcast snapshot: [`SyncService::broadcast_snapshot`] periodically
//!   pushes a bounded snapshot for bootstrapping joiners.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use fw_protocol::AlarmEvent;
use tokio::sync::broadcast;

const DEFAULT_SINCE_LOOKBACK_MS: i64 = 60 * 60 * 1000;

#[derive(Clone)]
struct TimestampedAlarm {
    timestamp_ms: i64,
    alarm: AlarmEvent,
}

/// Delivery of a periodic bootstrap snapshot to the `snapshot` topic.
#[async_trait]
pub trait SnapshotPublisher: Send + Sync {
    async fn publish_snapshot(&self, events: &[AlarmEvent]);
}

pub struct SyncServiceConfig {
    pub buffer_capacity: usize,
    pub max_events_per_snapshot: usize,
    pub snapshot_interval_ms: i64,
}

impl Default for SyncServiceConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 10_000,
            max_events_per_snapshot: 1000,
            snapshot_interval_ms: 60_000,
        }
    }
}

pub struct SyncService {
    config: SyncServiceConfig,
    recent: Mutex<VecDeque<TimestampedAlarm>>,
    watermarks: Mutex<HashMap<String, i64>>,
    snapshot_cache: Mutex<HashMap<String, (i64, Vec<AlarmEvent>)>>,
    push_tx: broadcast::Sender<AlarmEvent>,
}

impl SyncService {
    pub fn new(config: SyncServiceConfig) -> Self {
        let (push_tx, _) = broadcast::channel(config.buffer_capacity.max(16));
        Self {
            config,
            recent: Mutex::new(VecDeque::new()),
            watermarks: Mutex::new(HashMap::new()),
            snapshot_cache: Mutex::new(HashMap::new()),
            push_tx,
        }
    }

    /// Subscribes to the push channel (spec §4.N: "every successfully
    /// distributed alarm is broadcast"). Lagging subscribers drop the
    /// oldest unread events rather than block the broadcaster.
    pub fn subscribe(&self) -> broadcast::Receiver<AlarmEvent> {
        self.push_tx.subscribe()
    }

    /// Records `alarm` into the recent window and broadcasts it to push
    /// subscribers. Absence of subscribers is not an error.
    pub fn notify(&self, alarm: AlarmEvent, timestamp_ms: i64) {
        {
            let mut recent = self.recent.lock().unwrap();
            if recent.len() >= self.config.buffer_capacity {
                recent.pop_front();
            }
            recent.push_back(TimestampedAlarm {
                timestamp_ms,
                alarm: alarm.clone(),
            });
        }
        let _ = self.push_tx.send(alarm);
    }

    /// `snapshot(client_id, since)` (spec §4.N): at most
    /// `max_events_per_snapshot` alarms since `since` (default one hour
    /// ago), with the client's cached snapshot reused until it expires
    /// after `snapshot_interval_ms`.
    pub fn snapshot(&self, client_id: &str, since_ms: Option<i64>, now_ms: i64) -> Vec<AlarmEvent> {
        if let Some((cached_at, events)) = self.snapshot_cache.lock().unwrap().get(client_id) {
            if now_ms - cached_at < self.config.snapshot_interval_ms {
                return events.clone();
            }
        }

        let since = since_ms.unwrap_or(now_ms - DEFAULT_SINCE_LOOKBACK_MS);
        let events = self.events_since(since);
        let watermark = events.last().map(|e| e.0).unwrap_or(now_ms);

        self.watermarks.lock().unwrap().insert(client_id.to_string(), watermark);
        let alarms: Vec<AlarmEvent> = events.into_iter().map(|(_, a)| a).collect();
        self.snapshot_cache
            .lock()
            .unwrap()
            .insert(client_id.to_string(), (now_ms, alarms.clone()));
        alarms
    }

    /// `delta(client_id)` (spec §4.N): alarms since the client's last
    /// snapshot/delta watermark. A client with no watermark yet (never
    /// called `snapshot`) gets nothing back, since it has no baseline.
    pub fn delta(&self, client_id: &str, now_ms: i64) -> Vec<AlarmEvent> {
        let since = match self.watermarks.lock().unwrap().get(client_id).copied() {
            Some(watermark) => watermark,
            None => return Vec::new(),
        };
        let events = self.events_since(since);
        let watermark = events.last().map(|e| e.0).unwrap_or(since);
        self.watermarks.lock().unwrap().insert(client_id.to_string(), watermark);
        events.into_iter().map(|(_, a)| a).collect()
    }

    /// Periodically pushes a bounded snapshot to the `snapshot` topic for
    /// bootstrapping joiners (spec §4.N).
    pub async fn broadcast_snapshot(&self, publisher: &dyn SnapshotPublisher) {
        let events: Vec<AlarmEvent> = {
            let recent = self.recent.lock().unwrap();
            recent
                .iter()
                .rev()
                .take(self.config.max_events_per_snapshot)
                .map(|t| t.alarm.clone())
                .collect()
        };
        publisher.publish_snapshot(&events).await;
    }

    fn events_since(&self, since_ms: i64) -> Vec<(i64, AlarmEvent)> {
        let recent = self.recent.lock().unwrap();
        recent
            .iter()
            .filter(|t| t.timestamp_ms > since_ms)
            .take(self.config.max_events_per_snapshot)
            .map(|t| (t.timestamp_ms, t.alarm.clone()))
            .collect()
    }
}
