//! Redis-backed [`HistoryBackend`]: each index is a sorted set scored by
//! millisecond-epoch timestamp, with the JSON-encoded [`AlarmRecord`] as
//! the member. `ZADD`/`ZREVRANGE`/`ZREVRANGEBYSCORE`/`ZREMRANGEBYSCORE` map
//! directly onto recent/range/page/cursor/trim.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::{AlarmRecord, HistoryBackend, HistoryError};

#[derive(Clone)]
pub struct RedisHistoryBackend {
    conn: ConnectionManager,
}

impl RedisHistoryBackend {
    pub async fn connect(redis_url: &str) -> Result<Self, HistoryError> {
        let client = redis::Client::open(redis_url).map_err(|e| HistoryError::Unavailable(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| HistoryError::Unavailable(e.to_string()))?;
        Ok(Self { conn })
    }

    fn decode(raw: &str) -> Result<AlarmRecord, HistoryError> {
        serde_json::from_str(raw).map_err(|e| HistoryError::Decode(e.to_string()))
    }
}

#[async_trait]
impl HistoryBackend for RedisHistoryBackend {
    async fn index_write(&self, index: &str, score: i64, record: &AlarmRecord) -> Result<(), HistoryError> {
        let payload = serde_json::to_string(record).map_err(|e| HistoryError::Decode(e.to_string()))?;
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(index, payload, score)
            .await
            .map_err(|e| HistoryError::Unavailable(e.to_string()))
    }

    async fn index_recent(&self, index: &str, limit: usize) -> Result<Vec<AlarmRecord>, HistoryError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn
            .zrevrange(index, 0, limit.saturating_sub(1) as isize)
            .await
            .map_err(|e| HistoryError::Unavailable(e.to_string()))?;
        raw.iter().map(|r| Self::decode(r)).collect()
    }

    async fn index_range(
        &self,
        index: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<AlarmRecord>, HistoryError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn
            .zrangebyscore(index, start_ms, end_ms)
            .await
            .map_err(|e| HistoryError::Unavailable(e.to_string()))?;
        raw.iter().rev().map(|r| Self::decode(r)).collect()
    }

    async fn index_page(&self, index: &str, offset: usize, limit: usize) -> Result<Vec<AlarmRecord>, HistoryError> {
        let mut conn = self.conn.clone();
        let start = offset as isize;
        let stop = (offset + limit).saturating_sub(1) as isize;
        let raw: Vec<String> = conn
            .zrevrange(index, start, stop)
            .await
            .map_err(|e| HistoryError::Unavailable(e.to_string()))?;
        raw.iter().map(|r| Self::decode(r)).collect()
    }

    async fn index_cursor(
        &self,
        index: &str,
        before_ms: i64,
        limit: usize,
    ) -> Result<Vec<AlarmRecord>, HistoryError> {
        let mut conn = self.conn.clone();
        let max = format!("({before_ms}");
        let raw: Vec<String> = conn
            .zrevrangebyscore_limit(index, max, "-inf", 0, limit as isize)
            .await
            .map_err(|e| HistoryError::Unavailable(e.to_string()))?;
        raw.iter().map(|r| Self::decode(r)).collect()
    }

    async fn trim_older_than(&self, index: &str, cutoff_ms: i64) -> Result<u64, HistoryError> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn
            .zrembyscore(index, "-inf", format!("({cutoff_ms}"))
            .await
            .map_err(|e| HistoryError::Unavailable(e.to_string()))?;
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), HistoryError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| HistoryError::Unavailable(e.to_string()))
    }
}
