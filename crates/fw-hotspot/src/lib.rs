//! Component M: hotspot primitives (spec §4.M).
//!
//! Two scripted read-modify-write operations — `activate_suppression` and
//! `increment_suppression_counter` — plus a per-device lock that protects
//! any general-purpose counter path not already encapsulated by them. Both
//! operations MUST be atomic w.r.t. other concurrent suppression
//! operations on the same device; here that's enforced by holding a
//! per-device lock for the duration of the read-modify-write, rather than
//! relying on the backend to script it.

pub mod in_memory;
pub mod redis_store;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fw_protocol::{SuppressionActivatedEvent, SuppressionType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HotspotError {
    #[error("device {0} not found")]
    DeviceMissing(String),
    #[error("device {0} is disabled")]
    DeviceDisabled(String),
    #[error("device {0} is disconnected")]
    DeviceDisconnected(String),
    #[error("lock acquisition timed out for {0}")]
    LockTimeout(String),
    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Active,
    Disabled,
    Disconnected,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationOutcome {
    Activated,
    Updated,
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuppressionRecord {
    pub zone_id: String,
    pub suppression_type: SuppressionType,
    pub intensity: u8,
    pub activated_at: i64,
    pub last_updated: i64,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub total: u64,
    pub water: u64,
    pub foam: u64,
    pub gas: u64,
    pub last_activation_ms: Option<i64>,
}

impl Counters {
    fn bump(&mut self, suppression_type: SuppressionType, now_ms: i64) {
        self.total += 1;
        match suppression_type {
            SuppressionType::Water => self.water += 1,
            SuppressionType::Foam => self.foam += 1,
            SuppressionType::Gas => self.gas += 1,
        }
        self.last_activation_ms = Some(now_ms);
    }
}

/// The per-device state a device record needs to expose for suppression
/// activation (spec §4.M step 1: "Load device record; fail if
/// missing/disabled/disconnected").
#[async_trait]
pub trait HotspotStore: Send + Sync {
    async fn device_state(&self, device_id: &str) -> Result<DeviceState, HotspotError>;
    /// A device has at most one active suppression (spec §3), so this is
    /// keyed by `device_id` alone; `zone_id` lives inside the record.
    async fn load_suppression(&self, device_id: &str) -> Result<Option<SuppressionRecord>, HotspotError>;
    async fn save_suppression(&self, device_id: &str, record: SuppressionRecord) -> Result<(), HotspotError>;
    async fn bump_counters(
        &self,
        device_id: &str,
        suppression_type: SuppressionType,
        now_ms: i64,
    ) -> Result<(), HotspotError>;
    async fn counters(&self, device_id: &str) -> Result<Counters, HotspotError>;
    async fn push_history(&self, device_id: &str, event: SuppressionActivatedEvent) -> Result<(), HotspotError>;
    async fn history(&self, device_id: &str) -> Result<Vec<SuppressionActivatedEvent>, HotspotError>;
}

/// Delivery of the `suppression_activated` event (spec §4.M step 4). Kept
/// as its own boundary so this crate doesn't need to depend on the queue
/// crate directly; the caller wires a publisher backed by whatever topic
/// it pleases.
#[async_trait]
pub trait SuppressionEventPublisher: Send + Sync {
    async fn publish(&self, event: &SuppressionActivatedEvent);
}

/// No-op publisher, useful for tests and for deployments that don't care
/// about the notification.
pub struct NoopPublisher;

#[async_trait]
impl SuppressionEventPublisher for NoopPublisher {
    async fn publish(&self, _event: &SuppressionActivatedEvent) {}
}

/// A lock per `(device, counter_name)` with bounded wait. Release is
/// automatic: the guard is dropped (and the lock released) whenever the
/// holding future completes or is cancelled, satisfying "operations
/// interrupted by cancellation must release locks" (spec §5) for free.
#[derive(Default)]
pub struct DeviceLockRegistry {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DeviceLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(
        &self,
        key: &str,
        wait: Duration,
    ) -> Result<tokio::sync::OwnedMutexGuard<()>, HotspotError> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap();
            Arc::clone(
                locks
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        tokio::time::timeout(wait, mutex.lock_owned())
            .await
            .map_err(|_| HotspotError::LockTimeout(key.to_string()))
    }
}

pub struct HotspotPrimitivesConfig {
    pub lock_wait: Duration,
    pub auto_expire_ceiling_ms: i64,
}

impl Default for HotspotPrimitivesConfig {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_secs(2),
            auto_expire_ceiling_ms: 30 * 60 * 1000,
        }
    }
}

pub struct HotspotPrimitives<S: HotspotStore, P: SuppressionEventPublisher> {
    store: S,
    publisher: P,
    locks: DeviceLockRegistry,
    config: HotspotPrimitivesConfig,
}

impl<S: HotspotStore, P: SuppressionEventPublisher> HotspotPrimitives<S, P> {
    pub fn new(store: S, publisher: P, config: HotspotPrimitivesConfig) -> Self {
        Self {
            store,
            publisher,
            locks: DeviceLockRegistry::new(),
            config,
        }
    }

    /// `activate_suppression(device, zone, type, intensity, now)` (spec
    /// §4.M). Atomic w.r.t. other suppression operations on `device` via
    /// the per-device lock held for the full read-modify-write.
    pub async fn activate_suppression(
        &self,
        device_id: &str,
        zone_id: &str,
        suppression_type: SuppressionType,
        intensity: u8,
        now_ms: i64,
    ) -> Result<ActivationOutcome, HotspotError> {
        let _guard = self.locks.acquire(device_id, self.config.lock_wait).await?;

        match self.store.device_state(device_id).await? {
            DeviceState::Missing => return Err(HotspotError::DeviceMissing(device_id.to_string())),
            DeviceState::Disabled => return Err(HotspotError::DeviceDisabled(device_id.to_string())),
            DeviceState::Disconnected => return Err(HotspotError::DeviceDisconnected(device_id.to_string())),
            DeviceState::Active => {}
        }

        match self.store.load_suppression(device_id).await? {
            Some(existing) if existing.suppression_type != suppression_type => Ok(ActivationOutcome::Conflict),
            Some(mut existing) => {
                existing.zone_id = zone_id.to_string();
                existing.intensity = intensity;
                existing.last_updated = now_ms;
                self.store.save_suppression(device_id, existing).await?;
                Ok(ActivationOutcome::Updated)
            }
            None => {
                let record = SuppressionRecord {
                    zone_id: zone_id.to_string(),
                    suppression_type,
                    intensity,
                    activated_at: now_ms,
                    last_updated: now_ms,
                    expires_at: now_ms + self.config.auto_expire_ceiling_ms,
                };
                self.store.save_suppression(device_id, record).await?;
                self.store.bump_counters(device_id, suppression_type, now_ms).await?;

                let event = SuppressionActivatedEvent::new(device_id, zone_id, suppression_type, intensity, now_ms);
                self.store.push_history(device_id, event.clone()).await?;
                self.publisher.publish(&event).await;
                Ok(ActivationOutcome::Activated)
            }
        }
    }

    /// `increment_suppression_counter(device, type, now)` (spec §4.M).
    pub async fn increment_suppression_counter(
        &self,
        device_id: &str,
        suppression_type: SuppressionType,
        now_ms: i64,
    ) -> Result<(), HotspotError> {
        let _guard = self.locks.acquire(device_id, self.config.lock_wait).await?;
        self.store.bump_counters(device_id, suppression_type, now_ms).await
    }

    pub async fn counters(&self, device_id: &str) -> Result<Counters, HotspotError> {
        self.store.counters(device_id).await
    }

    pub async fn history(&self, device_id: &str) -> Result<Vec<SuppressionActivatedEvent>, HotspotError> {
        self.store.history(device_id).await
    }
}
