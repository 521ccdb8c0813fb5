//! The device status cache (spec §4.C, §8 scenario 1: "status cache has
//! `device-1: connected=true` with TTL >= 30s"). Mirrors [`fw_auth`]'s
//! `TokenStore` shape: a key-value cache with per-key TTL, Redis in
//! production, an in-process map in tests. Every transition is also
//! published as a [`DeviceStatusEvent`] on the device status topic so other
//! services (dashboards, the sync service) can react without polling this
//! cache directly.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use fw_protocol::DeviceStatusEvent;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceStatusError {
    #[error("device status store unavailable: {0}")]
    StoreUnavailable(String),
}

#[async_trait]
pub trait DeviceStatusStore: Send + Sync {
    async fn set_connected(&self, device_id: &str, last_seen: i64, ttl: Duration) -> Result<(), DeviceStatusError>;
    async fn set_disconnected(&self, device_id: &str) -> Result<(), DeviceStatusError>;
    async fn is_connected(&self, device_id: &str) -> Result<bool, DeviceStatusError>;
}

fn key(device_id: &str) -> String {
    format!("device:status:{device_id}")
}

/// Redis-backed [`DeviceStatusStore`].
pub mod redis_store {
    use super::{key, DeviceStatusError, DeviceStatusStore};
    use async_trait::async_trait;
    use redis::aio::ConnectionManager;
    use redis::AsyncCommands;
    use std::time::Duration;

    #[derive(Clone)]
    pub struct RedisDeviceStatusStore {
        conn: ConnectionManager,
    }

    impl RedisDeviceStatusStore {
        pub async fn connect(redis_url: &str) -> Result<Self, DeviceStatusError> {
            let client =
                redis::Client::open(redis_url).map_err(|e| DeviceStatusError::StoreUnavailable(e.to_string()))?;
            let conn = client
                .get_connection_manager()
                .await
                .map_err(|e| DeviceStatusError::StoreUnavailable(e.to_string()))?;
            Ok(Self { conn })
        }
    }

    #[async_trait]
    impl DeviceStatusStore for RedisDeviceStatusStore {
        async fn set_connected(&self, device_id: &str, last_seen: i64, ttl: Duration) -> Result<(), DeviceStatusError> {
            let mut conn = self.conn.clone();
            conn.set_ex::<_, _, ()>(key(device_id), last_seen, ttl.as_secs().max(1))
                .await
                .map_err(|e| DeviceStatusError::StoreUnavailable(e.to_string()))
        }

        async fn set_disconnected(&self, device_id: &str) -> Result<(), DeviceStatusError> {
            let mut conn = self.conn.clone();
            conn.del::<_, ()>(key(device_id))
                .await
                .map_err(|e| DeviceStatusError::StoreUnavailable(e.to_string()))
        }

        async fn is_connected(&self, device_id: &str) -> Result<bool, DeviceStatusError> {
            let mut conn = self.conn.clone();
            let exists: bool = conn
                .exists(key(device_id))
                .await
                .map_err(|e| DeviceStatusError::StoreUnavailable(e.to_string()))?;
            Ok(exists)
        }
    }
}

/// In-process [`DeviceStatusStore`], used by tests and the single-binary dev
/// build. TTL is advisory only here (no background expiry loop); tests that
/// care about expiry drive a [`fw_id`]-style fake clock instead.
#[derive(Default)]
pub struct InMemoryDeviceStatusStore {
    connected: Mutex<HashMap<String, i64>>,
}

#[async_trait]
impl DeviceStatusStore for InMemoryDeviceStatusStore {
    async fn set_connected(&self, device_id: &str, last_seen: i64, _ttl: Duration) -> Result<(), DeviceStatusError> {
        self.connected.lock().unwrap().insert(device_id.to_string(), last_seen);
        Ok(())
    }

    async fn set_disconnected(&self, device_id: &str) -> Result<(), DeviceStatusError> {
        self.connected.lock().unwrap().remove(device_id);
        Ok(())
    }

    async fn is_connected(&self, device_id: &str) -> Result<bool, DeviceStatusError> {
        Ok(self.connected.lock().unwrap().contains_key(device_id))
    }
}

/// Publishes a connect/disconnect transition to the device status topic
/// (spec §4.C) via a plain [`fw_queue::Producer`] — the topic carries no TTL
/// of its own; that lives in the [`DeviceStatusStore`] above.
pub async fn publish_status_event(
    producer: &dyn fw_queue::Producer,
    event: &DeviceStatusEvent,
) -> Result<(), fw_queue::QueueError> {
    let payload = serde_json::to_vec(event).expect("DeviceStatusEvent always serializes");
    producer.send(&event.device_id, payload).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use fw_queue::Topic;

    #[tokio::test]
    async fn set_connected_then_is_connected_is_true() {
        let store = InMemoryDeviceStatusStore::default();
        store.set_connected("device-1", 1000, Duration::from_secs(15)).await.unwrap();
        assert!(store.is_connected("device-1").await.unwrap());
    }

    #[tokio::test]
    async fn set_disconnected_removes_the_entry() {
        let store = InMemoryDeviceStatusStore::default();
        store.set_connected("device-1", 1000, Duration::from_secs(15)).await.unwrap();
        store.set_disconnected("device-1").await.unwrap();
        assert!(!store.is_connected("device-1").await.unwrap());
    }

    #[tokio::test]
    async fn publish_status_event_sends_on_the_device_id_key() {
        let topic = fw_queue::in_process::InProcessTopic::new(1);
        let producer = topic.producer();
        let mut consumer = topic.consumer("test", 0);

        publish_status_event(producer.as_ref(), &DeviceStatusEvent::connected("device-1", 1000))
            .await
            .unwrap();

        let msg = consumer.recv().await.unwrap();
        assert_eq!(msg.key, "device-1");
        let decoded: DeviceStatusEvent = serde_json::from_slice(&msg.payload).unwrap();
        assert!(decoded.connected);
    }
}
