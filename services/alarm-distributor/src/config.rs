//! Environment-driven configuration (spec §6's `suppression.*`,
//! `history.*`, `distributor.*`, `sync.*` keys), loaded the same way as
//! every other service in this workspace: typed fields with explicit
//! defaults, no file-based format.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AlarmDistributorConfig {
    pub redis_url: String,
    pub bind_addr: String,
    pub alarm_events_partitions: u32,
    pub consumer_concurrency: usize,

    pub suppression_auto_expire_seconds: i64,
    pub suppression_lock_wait: Duration,

    pub history_retention_days: i64,
    pub history_fallback_capacity: usize,

    pub distributor_retry_max_attempts: u32,
    pub distributor_retry_backoff_ms: u64,
    pub distributor_retry_max_backoff_ms: u64,
    pub distributor_circuit_failure_threshold: u32,
    pub distributor_circuit_cooldown_ms: u64,
    pub distributor_bulkhead_concurrency: usize,
    pub distributor_timeout_ms: u64,
    pub distributor_per_sink_deadline_ms: u64,

    pub sync_snapshot_interval_seconds: i64,
    pub sync_max_events_per_snapshot: usize,
    pub sync_broadcast_interval_seconds: u64,
}

impl AlarmDistributorConfig {
    pub fn from_env() -> Self {
        Self {
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:8081"),
            alarm_events_partitions: env_parsed("ALARM_EVENTS_PARTITIONS", 3),
            consumer_concurrency: env_parsed("QUEUE_CONSUMER_CONCURRENCY", 8),

            suppression_auto_expire_seconds: env_parsed("SUPPRESSION_AUTO_EXPIRE_SECONDS", 1800),
            suppression_lock_wait: Duration::from_millis(env_parsed("SUPPRESSION_LOCK_WAIT_MS", 2000)),

            history_retention_days: env_parsed("HISTORY_RETENTION_DAYS", 30),
            history_fallback_capacity: env_parsed("HISTORY_IN_MEMORY_FALLBACK_SIZE", 1000),

            distributor_retry_max_attempts: env_parsed("DISTRIBUTOR_RETRY_MAX_ATTEMPTS", 3),
            distributor_retry_backoff_ms: env_parsed("DISTRIBUTOR_RETRY_BACKOFF_MS", 100),
            distributor_retry_max_backoff_ms: env_parsed("DISTRIBUTOR_RETRY_MAX_BACKOFF_MS", 2000),
            distributor_circuit_failure_threshold: env_parsed("DISTRIBUTOR_CIRCUIT_FAILURE_THRESHOLD", 5),
            distributor_circuit_cooldown_ms: env_parsed("DISTRIBUTOR_CIRCUIT_COOLDOWN_MS", 30_000),
            distributor_bulkhead_concurrency: env_parsed("DISTRIBUTOR_BULKHEAD_CONCURRENCY", 16),
            distributor_timeout_ms: env_parsed("DISTRIBUTOR_TIMEOUT_MS", 2000),
            distributor_per_sink_deadline_ms: env_parsed("DISTRIBUTOR_PER_SINK_DEADLINE_MS", 2500),

            sync_snapshot_interval_seconds: env_parsed("SYNC_SNAPSHOT_INTERVAL_SECONDS", 300),
            sync_max_events_per_snapshot: env_parsed("SYNC_MAX_EVENTS_PER_SNAPSHOT", 1000),
            sync_broadcast_interval_seconds: env_parsed("SYNC_BROADCAST_INTERVAL_SECONDS", 60),
        }
    }

    pub fn history_retention_ms(&self) -> i64 {
        self.history_retention_days * 24 * 60 * 60 * 1000
    }

    pub fn suppression_auto_expire_ms(&self) -> i64 {
        self.suppression_auto_expire_seconds * 1000
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_configuration_keys() {
        std::env::remove_var("SUPPRESSION_AUTO_EXPIRE_SECONDS");
        std::env::remove_var("HISTORY_RETENTION_DAYS");
        let config = AlarmDistributorConfig::from_env();
        assert_eq!(config.suppression_auto_expire_seconds, 1800);
        assert_eq!(config.suppression_auto_expire_ms(), 1_800_000);
        assert_eq!(config.history_retention_ms(), 30 * 24 * 60 * 60 * 1000);
        assert_eq!(config.sync_max_events_per_snapshot, 1000);
    }
}
