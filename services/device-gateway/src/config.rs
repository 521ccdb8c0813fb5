//! Environment-driven configuration for the session layer (spec §6's
//! `session.*` keys), loaded the way `services/forwarder/src/config.rs`
//! loads its TOML config: parse into typed fields with explicit defaults,
//! fail fast on an invalid value.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: String,
    pub idle_timeout: Duration,
    pub max_pending_writes: usize,
    pub redis_url: String,
    pub node_id: u16,
    pub sensor_data_partitions: u32,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_or("GATEWAY_BIND_ADDR", "0.0.0.0:7000"),
            idle_timeout: Duration::from_secs(env_parsed("SESSION_IDLE_SECONDS", 10)),
            max_pending_writes: env_parsed("SESSION_MAX_PENDING_WRITES", 64),
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
            node_id: env_parsed("ID_NODE_ID", 1),
            sensor_data_partitions: env_parsed("QUEUE_PARTITIONS", 3),
        }
    }

    /// TTL for the device-status publish on `Authenticated` entry: slightly
    /// greater than the idle timeout (spec §4.C), so a device that is merely
    /// between heartbeats is never reported disconnected by expiry alone.
    pub fn device_status_ttl(&self) -> Duration {
        self.idle_timeout + Duration::from_secs(5)
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
