//! Component L: the History Store (spec §4.L).
//!
//! Each alarm is indexed four times: a global time-scored index plus
//! secondary indices by device, severity, and alarm type, all scored by the
//! alarm's millisecond-epoch timestamp. When the backend is unreachable,
//! writes and reads degrade to a bounded in-memory ring (§4.L "fallback");
//! the ring is never back-filled once the backend recovers.

pub mod in_memory;
pub mod redis_store;

use async_trait::async_trait;
use fw_protocol::{AlarmEvent, Severity};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use in_memory::FallbackRing;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("failed to decode stored record: {0}")]
    Decode(String),
}

pub const GLOBAL_INDEX: &str = "history:global";

pub fn device_index(device_id: &str) -> String {
    format!("history:device:{device_id}")
}

pub fn severity_index(severity: Severity) -> String {
    format!("history:severity:{}", severity.as_topic_suffix())
}

pub fn type_index(alarm_type: &str) -> String {
    format!("history:type:{alarm_type}")
}

/// A stored alarm together with the identifiers used for indexing and
/// pagination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmRecord {
    pub id: u64,
    pub timestamp_ms: i64,
    pub alarm: AlarmEvent,
}

/// The time-scored-index primitive the history store needs: every backend
/// (Redis sorted sets, or any other store) implements this directly rather
/// than exposing its native query language.
#[async_trait]
pub trait HistoryBackend: Send + Sync {
    async fn index_write(&self, index: &str, score: i64, record: &AlarmRecord) -> Result<(), HistoryError>;
    async fn index_recent(&self, index: &str, limit: usize) -> Result<Vec<AlarmRecord>, HistoryError>;
    async fn index_range(
        &self,
        index: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<AlarmRecord>, HistoryError>;
    async fn index_page(&self, index: &str, offset: usize, limit: usize) -> Result<Vec<AlarmRecord>, HistoryError>;
    async fn index_cursor(
        &self,
        index: &str,
        before_ms: i64,
        limit: usize,
    ) -> Result<Vec<AlarmRecord>, HistoryError>;
    async fn trim_older_than(&self, index: &str, cutoff_ms: i64) -> Result<u64, HistoryError>;
    async fn ping(&self) -> Result<(), HistoryError>;
}

pub struct HistoryStoreConfig {
    pub retention_ms: i64,
    pub fallback_capacity: usize,
}

impl Default for HistoryStoreConfig {
    fn default() -> Self {
        Self {
            retention_ms: 30 * 24 * 60 * 60 * 1000,
            fallback_capacity: 1000,
        }
    }
}

pub struct HistoryStore<B: HistoryBackend> {
    backend: B,
    config: HistoryStoreConfig,
    fallback: FallbackRing,
}

impl<B: HistoryBackend> HistoryStore<B> {
    pub fn new(backend: B, config: HistoryStoreConfig) -> Self {
        let capacity = config.fallback_capacity;
        Self {
            backend,
            config,
            fallback: FallbackRing::new(capacity),
        }
    }

    /// Writes `alarm` into the global index and its three secondary
    /// indices. On backend failure, falls back to the in-memory ring
    /// (spec §4.L) so delivery of the write never blocks on backend health.
    pub async fn record(&self, id: u64, timestamp_ms: i64, alarm: &AlarmEvent) -> Result<(), HistoryError> {
        let record = AlarmRecord {
            id,
            timestamp_ms,
            alarm: alarm.clone(),
        };
        let indices = [
            GLOBAL_INDEX.to_string(),
            device_index(&alarm.device_id),
            severity_index(alarm.severity),
            type_index(&alarm.alarm_type),
        ];

        let mut backend_ok = true;
        for index in &indices {
            if let Err(err) = self.backend.index_write(index, timestamp_ms, &record).await {
                tracing::warn!(error = %err, index = %index, "history backend write failed, degrading to fallback ring");
                backend_ok = false;
                break;
            }
        }
        if !backend_ok {
            self.fallback.push(record);
        }
        Ok(())
    }

    pub async fn recent(&self, limit: usize) -> Vec<AlarmRecord> {
        self.read_or_fallback(|| self.backend.index_recent(GLOBAL_INDEX, limit), || self.fallback.recent(limit))
            .await
    }

    pub async fn in_window(&self, start_ms: i64, end_ms: i64) -> Vec<AlarmRecord> {
        self.read_or_fallback(
            || self.backend.index_range(GLOBAL_INDEX, start_ms, end_ms),
            || self.fallback.in_window(start_ms, end_ms),
        )
        .await
    }

    pub async fn by_device(&self, device_id: &str, limit: usize) -> Vec<AlarmRecord> {
        let index = device_index(device_id);
        self.read_or_fallback(
            || self.backend.index_recent(&index, limit),
            || self.fallback.filter_recent(limit, |r| r.alarm.device_id == device_id),
        )
        .await
    }

    pub async fn by_severity(&self, severity: Severity, limit: usize) -> Vec<AlarmRecord> {
        let index = severity_index(severity);
        self.read_or_fallback(
            || self.backend.index_recent(&index, limit),
            || self.fallback.filter_recent(limit, |r| r.alarm.severity == severity),
        )
        .await
    }

    pub async fn by_type(&self, alarm_type: &str, limit: usize) -> Vec<AlarmRecord> {
        let index = type_index(alarm_type);
        self.read_or_fallback(
            || self.backend.index_recent(&index, limit),
            || self.fallback.filter_recent(limit, |r| r.alarm.alarm_type == alarm_type),
        )
        .await
    }

    pub async fn page(&self, offset: usize, limit: usize) -> Vec<AlarmRecord> {
        self.read_or_fallback(
            || self.backend.index_page(GLOBAL_INDEX, offset, limit),
            || self.fallback.page(offset, limit),
        )
        .await
    }

    pub async fn cursor(&self, before_ms: i64, limit: usize) -> Vec<AlarmRecord> {
        self.read_or_fallback(
            || self.backend.index_cursor(GLOBAL_INDEX, before_ms, limit),
            || self.fallback.cursor(before_ms, limit),
        )
        .await
    }

    /// Removes index entries older than `now_ms - retention_ms` across all
    /// four indices. Idempotent: re-running with the same `now_ms` removes
    /// nothing further.
    pub async fn sweep_retention(&self, now_ms: i64, device_ids: &[String], alarm_types: &[String]) -> u64 {
        let cutoff = now_ms - self.config.retention_ms;
        let mut indices = vec![GLOBAL_INDEX.to_string()];
        indices.extend(device_ids.iter().map(|d| device_index(d)));
        for sev in [Severity::Low, Severity::Medium, Severity::High] {
            indices.push(severity_index(sev));
        }
        indices.extend(alarm_types.iter().map(|t| type_index(t)));

        let mut total = 0u64;
        for index in &indices {
            match self.backend.trim_older_than(index, cutoff).await {
                Ok(n) => total += n,
                Err(err) => tracing::warn!(error = %err, index = %index, "retention sweep failed for index"),
            }
        }
        self.fallback.evict_older_than(cutoff);
        total
    }

    /// Availability probe (spec §4.L): a trivial existence check against
    /// the backend, used by the `/healthz`-adjacent surface.
    pub async fn is_available(&self) -> bool {
        self.backend.ping().await.is_ok()
    }

    async fn read_or_fallback<F, G, Fut>(&self, backend_read: F, fallback_read: G) -> Vec<AlarmRecord>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<AlarmRecord>, HistoryError>>,
        G: FnOnce() -> Vec<AlarmRecord>,
    {
        match backend_read().await {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(error = %err, "history backend read failed, serving from fallback ring");
                fallback_read()
            }
        }
    }
}
