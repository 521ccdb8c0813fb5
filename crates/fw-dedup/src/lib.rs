//! Component H: the deduplicator (spec §4.H).
//!
//! Suppresses repeat alarms for the same fingerprint within a sliding
//! window: `is_new(fingerprint, now_ms)` records the fingerprint's
//! last-seen time and returns `true` iff no prior occurrence fell inside
//! `dedup.window_seconds`. The backing store is a key-value cache with
//! per-key TTL (Redis in production); a failure there fails *open* — dedup
//! is an optimization, not a correctness invariant (spec §7) — so every
//! fingerprint is treated as new rather than blocking the pipeline.

pub mod cardinality;

use async_trait::async_trait;
use fw_protocol::Fingerprint;
use thiserror::Error;

use cardinality::CardinalityEstimator;

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("backing store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Minimal key-value contract the deduplicator needs: "has this key been
/// seen, and if not, mark it seen with a TTL".
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Atomically: if `key` is absent, set it with `ttl_ms` and return
    /// `true` (newly set). If present, return `false` without touching TTL.
    async fn set_if_absent(&self, key: &str, ttl_ms: u64) -> Result<bool, DedupError>;
}

pub struct Deduplicator<S: DedupStore> {
    store: S,
    window_ms: u64,
    pub cardinality: CardinalityEstimator,
}

impl<S: DedupStore> Deduplicator<S> {
    pub fn new(store: S, window_seconds: u64) -> Self {
        Self {
            store,
            window_ms: window_seconds * 1000,
            cardinality: CardinalityEstimator::new(),
        }
    }

    /// `is_new(fingerprint) -> bool` (spec §4.H). Fails open: a store error
    /// is logged and treated as "new" rather than propagated, since
    /// suppressing downstream delivery because the dedup cache hiccuped
    /// would violate the at-least-once delivery goal.
    pub async fn is_new(&self, fingerprint: &Fingerprint) -> bool {
        let key = dedup_key(fingerprint);
        let is_new = match self.store.set_if_absent(&key, self.window_ms).await {
            Ok(was_absent) => was_absent,
            Err(err) => {
                tracing::warn!(fingerprint = %fingerprint, error = %err, "dedup store unavailable, failing open");
                true
            }
        };
        self.cardinality.record(&key, is_new);
        is_new
    }

    pub fn unique_count(&self) -> u64 {
        self.cardinality.unique_count()
    }

    pub fn dedup_rate(&self) -> f64 {
        self.cardinality.dedup_rate()
    }
}

fn dedup_key(fingerprint: &Fingerprint) -> String {
    format!("dedup:{fingerprint}")
}

/// In-process [`DedupStore`], used by tests and the single-binary dev build.
pub mod in_memory {
    use super::{DedupError, DedupStore};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[derive(Default)]
    pub struct InMemoryDedupStore {
        entries: Mutex<HashMap<String, i64>>,
    }

    #[async_trait]
    impl DedupStore for InMemoryDedupStore {
        async fn set_if_absent(&self, key: &str, ttl_ms: u64) -> Result<bool, DedupError> {
            let now = now_ms();
            let mut entries = self.entries.lock().unwrap();
            match entries.get(key) {
                Some(&expires_at) if expires_at > now => Ok(false),
                _ => {
                    entries.insert(key.to_string(), now + ttl_ms as i64);
                    Ok(true)
                }
            }
        }
    }

    fn now_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before Unix epoch")
            .as_millis() as i64
    }
}

/// Redis-backed [`DedupStore`]: `SET key 1 PX ttl_ms NX`, which is exactly
/// the atomic "set if absent with TTL" primitive the dedup window needs.
pub mod redis_store {
    use super::{DedupError, DedupStore};
    use async_trait::async_trait;
    use redis::aio::ConnectionManager;
    use redis::AsyncCommands;

    #[derive(Clone)]
    pub struct RedisDedupStore {
        conn: ConnectionManager,
    }

    impl RedisDedupStore {
        pub async fn connect(redis_url: &str) -> Result<Self, DedupError> {
            let client = redis::Client::open(redis_url)
                .map_err(|e| DedupError::StoreUnavailable(e.to_string()))?;
            let conn = client
                .get_connection_manager()
                .await
                .map_err(|e| DedupError::StoreUnavailable(e.to_string()))?;
            Ok(Self { conn })
        }
    }

    #[async_trait]
    impl DedupStore for RedisDedupStore {
        async fn set_if_absent(&self, key: &str, ttl_ms: u64) -> Result<bool, DedupError> {
            let mut conn = self.conn.clone();
            let opts = redis::SetOptions::default()
                .conditional_set(redis::ExistenceCheck::NX)
                .with_expiration(redis::SetExpiry::PX(ttl_ms as usize));
            let result: Option<String> = conn
                .set_options(key, "1", opts)
                .await
                .map_err(|e| DedupError::StoreUnavailable(e.to_string()))?;
            Ok(result.is_some())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::in_memory::InMemoryDedupStore;
    use super::*;

    fn fp(rule: &str) -> Fingerprint {
        Fingerprint {
            rule_id: rule.to_string(),
            device_id: "d1".to_string(),
            sensor_type: "smoke".to_string(),
        }
    }

    #[tokio::test]
    async fn first_occurrence_is_new_second_within_window_is_not() {
        let dedup = Deduplicator::new(InMemoryDedupStore::default(), 300);
        assert!(dedup.is_new(&fp("r1")).await);
        assert!(!dedup.is_new(&fp("r1")).await);
    }

    #[tokio::test]
    async fn distinct_fingerprints_are_independent() {
        let dedup = Deduplicator::new(InMemoryDedupStore::default(), 300);
        assert!(dedup.is_new(&fp("r1")).await);
        assert!(dedup.is_new(&fp("r2")).await);
    }

    #[tokio::test]
    async fn dedup_rate_increases_as_repeats_are_suppressed() {
        let dedup = Deduplicator::new(InMemoryDedupStore::default(), 300);
        dedup.is_new(&fp("r1")).await;
        dedup.is_new(&fp("r1")).await;
        dedup.is_new(&fp("r1")).await;
        assert!(dedup.dedup_rate() > 0.5);
    }

    struct AlwaysFailsStore;

    #[async_trait::async_trait]
    impl DedupStore for AlwaysFailsStore {
        async fn set_if_absent(&self, _key: &str, _ttl_ms: u64) -> Result<bool, DedupError> {
            Err(DedupError::StoreUnavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn store_failure_fails_open_and_treats_fingerprint_as_new() {
        let dedup = Deduplicator::new(AlwaysFailsStore, 300);
        assert!(dedup.is_new(&fp("r1")).await);
        assert!(dedup.is_new(&fp("r1")).await);
    }
}
