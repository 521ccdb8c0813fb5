//! Redis-backed [`HotspotStore`]. Atomicity of the read-modify-write in
//! `activate_suppression` comes from the per-device lock held by
//! [`super::DeviceLockRegistry`] around every call into this store, not
//! from Redis itself, so each method here is a single round-trip:
//! device state and the suppression record are JSON blobs under a
//! `hotspot:` prefix, counters a hash, and history a capped list.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{Counters, DeviceState, HotspotError, HotspotStore, SuppressionRecord};
use fw_protocol::{SuppressionActivatedEvent, SuppressionType};

const MAX_HISTORY: isize = 100;

fn device_state_key(device_id: &str) -> String {
    format!("hotspot:device:{device_id}")
}

fn suppression_key(device_id: &str) -> String {
    format!("hotspot:suppression:{device_id}")
}

fn counters_key(device_id: &str) -> String {
    format!("hotspot:counters:{device_id}")
}

fn history_key(device_id: &str) -> String {
    format!("hotspot:history:{device_id}")
}

#[derive(Clone)]
pub struct RedisHotspotStore {
    conn: ConnectionManager,
}

impl RedisHotspotStore {
    pub async fn connect(redis_url: &str) -> Result<Self, HotspotError> {
        let client = redis::Client::open(redis_url).map_err(|e| HotspotError::Backend(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| HotspotError::Backend(e.to_string()))?;
        Ok(Self { conn })
    }

    /// Seeds `device_id`'s state, since unlike the in-memory test double this
    /// store has no implicit "missing unless set" default to fall back on
    /// in production: device records are provisioned by the device registry,
    /// not invented here.
    pub async fn set_device_state(&self, device_id: &str, state: DeviceState) -> Result<(), HotspotError> {
        let mut conn = self.conn.clone();
        let raw = encode_device_state(state);
        conn.set::<_, _, ()>(device_state_key(device_id), raw)
            .await
            .map_err(|e| HotspotError::Backend(e.to_string()))
    }
}

#[async_trait]
impl HotspotStore for RedisHotspotStore {
    async fn device_state(&self, device_id: &str) -> Result<DeviceState, HotspotError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(device_state_key(device_id))
            .await
            .map_err(|e| HotspotError::Backend(e.to_string()))?;
        Ok(raw.as_deref().map(decode_device_state).unwrap_or(DeviceState::Missing))
    }

    async fn load_suppression(&self, device_id: &str) -> Result<Option<SuppressionRecord>, HotspotError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(suppression_key(device_id))
            .await
            .map_err(|e| HotspotError::Backend(e.to_string()))?;
        raw.map(|r| serde_json::from_str(&r).map_err(|e| HotspotError::Backend(e.to_string())))
            .transpose()
    }

    async fn save_suppression(&self, device_id: &str, record: SuppressionRecord) -> Result<(), HotspotError> {
        let payload = serde_json::to_string(&record).map_err(|e| HotspotError::Backend(e.to_string()))?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(suppression_key(device_id), payload)
            .await
            .map_err(|e| HotspotError::Backend(e.to_string()))
    }

    async fn bump_counters(
        &self,
        device_id: &str,
        suppression_type: SuppressionType,
        now_ms: i64,
    ) -> Result<(), HotspotError> {
        let mut conn = self.conn.clone();
        let field = match suppression_type {
            SuppressionType::Water => "water",
            SuppressionType::Foam => "foam",
            SuppressionType::Gas => "gas",
        };
        let key = counters_key(device_id);
        conn.hincr::<_, _, _, ()>(&key, "total", 1)
            .await
            .map_err(|e| HotspotError::Backend(e.to_string()))?;
        conn.hincr::<_, _, _, ()>(&key, field, 1)
            .await
            .map_err(|e| HotspotError::Backend(e.to_string()))?;
        conn.hset::<_, _, _, ()>(&key, "last_activation_ms", now_ms)
            .await
            .map_err(|e| HotspotError::Backend(e.to_string()))
    }

    async fn counters(&self, device_id: &str) -> Result<Counters, HotspotError> {
        let mut conn = self.conn.clone();
        let fields: Vec<(String, i64)> = conn
            .hgetall(counters_key(device_id))
            .await
            .map_err(|e| HotspotError::Backend(e.to_string()))?;
        let mut counters = Counters::default();
        for (field, value) in fields {
            match field.as_str() {
                "total" => counters.total = value as u64,
                "water" => counters.water = value as u64,
                "foam" => counters.foam = value as u64,
                "gas" => counters.gas = value as u64,
                "last_activation_ms" => counters.last_activation_ms = Some(value),
                _ => {}
            }
        }
        Ok(counters)
    }

    async fn push_history(&self, device_id: &str, event: SuppressionActivatedEvent) -> Result<(), HotspotError> {
        let payload = serde_json::to_string(&event).map_err(|e| HotspotError::Backend(e.to_string()))?;
        let mut conn = self.conn.clone();
        let key = history_key(device_id);
        conn.lpush::<_, _, ()>(&key, payload)
            .await
            .map_err(|e| HotspotError::Backend(e.to_string()))?;
        conn.ltrim::<_, ()>(&key, 0, MAX_HISTORY - 1)
            .await
            .map_err(|e| HotspotError::Backend(e.to_string()))
    }

    async fn history(&self, device_id: &str) -> Result<Vec<SuppressionActivatedEvent>, HotspotError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn
            .lrange(history_key(device_id), 0, MAX_HISTORY - 1)
            .await
            .map_err(|e| HotspotError::Backend(e.to_string()))?;
        raw.iter()
            .rev()
            .map(|r| serde_json::from_str(r).map_err(|e| HotspotError::Backend(e.to_string())))
            .collect()
    }
}

fn encode_device_state(state: DeviceState) -> &'static str {
    match state {
        DeviceState::Active => "active",
        DeviceState::Disabled => "disabled",
        DeviceState::Disconnected => "disconnected",
        DeviceState::Missing => "missing",
    }
}

fn decode_device_state(raw: &str) -> DeviceState {
    match raw {
        "active" => DeviceState::Active,
        "disabled" => DeviceState::Disabled,
        "disconnected" => DeviceState::Disconnected,
        _ => DeviceState::Missing,
    }
}
