//! In-process [`HotspotStore`], used by tests and the single-binary dev
//! build. Device state defaults to [`DeviceState::Active`] unless a test
//! overrides it via [`InMemoryHotspotStore::set_device_state`].

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use fw_protocol::{SuppressionActivatedEvent, SuppressionType};

use super::{Counters, DeviceState, HotspotError, HotspotStore, SuppressionRecord};

const MAX_HISTORY: usize = 100;

#[derive(Default)]
pub struct InMemoryHotspotStore {
    states: Mutex<HashMap<String, DeviceState>>,
    suppressions: Mutex<HashMap<String, SuppressionRecord>>,
    counters: Mutex<HashMap<String, Counters>>,
    history: Mutex<HashMap<String, VecDeque<SuppressionActivatedEvent>>>,
}

impl InMemoryHotspotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_device_state(&self, device_id: &str, state: DeviceState) {
        self.states.lock().unwrap().insert(device_id.to_string(), state);
    }
}

#[async_trait]
impl HotspotStore for InMemoryHotspotStore {
    async fn device_state(&self, device_id: &str) -> Result<DeviceState, HotspotError> {
        Ok(self
            .states
            .lock()
            .unwrap()
            .get(device_id)
            .copied()
            .unwrap_or(DeviceState::Missing))
    }

    async fn load_suppression(&self, device_id: &str) -> Result<Option<SuppressionRecord>, HotspotError> {
        Ok(self.suppressions.lock().unwrap().get(device_id).cloned())
    }

    async fn save_suppression(&self, device_id: &str, record: SuppressionRecord) -> Result<(), HotspotError> {
        self.suppressions.lock().unwrap().insert(device_id.to_string(), record);
        Ok(())
    }

    async fn bump_counters(
        &self,
        device_id: &str,
        suppression_type: SuppressionType,
        now_ms: i64,
    ) -> Result<(), HotspotError> {
        self.counters
            .lock()
            .unwrap()
            .entry(device_id.to_string())
            .or_default()
            .bump(suppression_type, now_ms);
        Ok(())
    }

    async fn counters(&self, device_id: &str) -> Result<Counters, HotspotError> {
        Ok(self.counters.lock().unwrap().get(device_id).copied().unwrap_or_default())
    }

    async fn push_history(&self, device_id: &str, event: SuppressionActivatedEvent) -> Result<(), HotspotError> {
        let mut history = self.history.lock().unwrap();
        let entries = history.entry(device_id.to_string()).or_default();
        if entries.len() >= MAX_HISTORY {
            entries.pop_front();
        }
        entries.push_back(event);
        Ok(())
    }

    async fn history(&self, device_id: &str) -> Result<Vec<SuppressionActivatedEvent>, HotspotError> {
        Ok(self
            .history
            .lock()
            .unwrap()
            .get(device_id)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default())
    }
}
