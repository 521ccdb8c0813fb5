//! Environment-driven configuration (spec §6's `queue.*`, `dedup.*`,
//! `id.node_id` keys), loaded the way [`device_gateway::GatewayConfig`] is:
//! typed fields with explicit defaults, no file-based format.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct StreamProcessorConfig {
    pub redis_url: String,
    pub node_id: u16,
    pub sensor_data_partitions: u32,
    pub alarm_events_partitions: u32,
    pub normal_concurrency: usize,
    pub backpressure_concurrency: usize,
    pub backpressure_batch_size: usize,
    pub backpressure_batch_interval: Duration,
    pub dedup_window_seconds: u64,
    pub dedup_enabled: bool,
    pub evaluator_epsilon: f64,
}

impl StreamProcessorConfig {
    pub fn from_env() -> Self {
        Self {
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
            node_id: env_parsed("ID_NODE_ID", 1),
            sensor_data_partitions: env_parsed("QUEUE_PARTITIONS", 3),
            alarm_events_partitions: env_parsed("ALARM_EVENTS_PARTITIONS", 3),
            normal_concurrency: env_parsed("QUEUE_CONSUMER_NORMAL_CONCURRENCY", 8),
            backpressure_concurrency: env_parsed("QUEUE_CONSUMER_BACKPRESSURE_CONCURRENCY", 2),
            backpressure_batch_size: env_parsed("QUEUE_CONSUMER_BACKPRESSURE_BATCH_SIZE", 50),
            backpressure_batch_interval: Duration::from_millis(env_parsed(
                "QUEUE_CONSUMER_BACKPRESSURE_BATCH_INTERVAL_MS",
                1000,
            )),
            dedup_window_seconds: env_parsed("DEDUP_WINDOW_SECONDS", 300),
            dedup_enabled: env_parsed("DEDUP_ENABLED", true),
            evaluator_epsilon: env_parsed("EVALUATOR_EPSILON", 0.0),
        }
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
        std::env::remove_var("DEDUP_WINDOW_SECONDS");
        let config = StreamProcessorConfig::from_env();
        assert_eq!(config.dedup_window_seconds, 300);
        assert!(config.dedup_enabled);
        assert_eq!(config.sensor_data_partitions, 3);
    }
}
