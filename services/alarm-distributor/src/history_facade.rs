//! A trait-object seam over [`HistoryStore`] so the HTTP surface and
//! `AppState` don't need to be generic over the backend type (Redis in
//! production, an in-memory fake in tests).

use async_trait::async_trait;
use fw_history::{AlarmRecord, HistoryBackend, HistoryStore};
use fw_protocol::Severity;

#[async_trait]
pub trait HistoryFacade: Send + Sync {
    async fn recent(&self, limit: usize) -> Vec<AlarmRecord>;
    async fn in_window(&self, start_ms: i64, end_ms: i64) -> Vec<AlarmRecord>;
    async fn by_device(&self, device_id: &str, limit: usize) -> Vec<AlarmRecord>;
    async fn by_severity(&self, severity: Severity, limit: usize) -> Vec<AlarmRecord>;
    async fn by_type(&self, alarm_type: &str, limit: usize) -> Vec<AlarmRecord>;
    async fn page(&self, offset: usize, limit: usize) -> Vec<AlarmRecord>;
    async fn cursor(&self, before_ms: i64, limit: usize) -> Vec<AlarmRecord>;
    async fn is_available(&self) -> bool;
}

#[async_trait]
impl<B: HistoryBackend + 'static> HistoryFacade for HistoryStore<B> {
    async fn recent(&self, limit: usize) -> Vec<AlarmRecord> {
        HistoryStore::recent(self, limit).await
    }

    async fn in_window(&self, start_ms: i64, end_ms: i64) -> Vec<AlarmRecord> {
        HistoryStore::in_window(self, start_ms, end_ms).await
    }

    async fn by_device(&self, device_id: &str, limit: usize) -> Vec<AlarmRecord> {
        HistoryStore::by_device(self, device_id, limit).await
    }

    async fn by_severity(&self, severity: Severity, limit: usize) -> Vec<AlarmRecord> {
        HistoryStore::by_severity(self, severity, limit).await
    }

    async fn by_type(&self, alarm_type: &str, limit: usize) -> Vec<AlarmRecord> {
        HistoryStore::by_type(self, alarm_type, limit).await
    }

    async fn page(&self, offset: usize, limit: usize) -> Vec<AlarmRecord> {
        HistoryStore::page(self, offset, limit).await
    }

    async fn cursor(&self, before_ms: i64, limit: usize) -> Vec<AlarmRecord> {
        HistoryStore::cursor(self, before_ms, limit).await
    }

    async fn is_available(&self) -> bool {
        HistoryStore::is_available(self).await
    }
}
