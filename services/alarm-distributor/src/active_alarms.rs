//! The in-memory active-alarms index the Alarm Consumer maintains (spec
//! §4.J step a): every alarm is recorded here on arrival and removed on
//! resolution. Acknowledgement is a flag flip; resolution removes the
//! entry and records who resolved it and when.

use std::collections::HashMap;
use std::sync::Mutex;

use fw_protocol::AlarmEvent;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActiveAlarmError {
    #[error("alarm {0} not found for device {1}")]
    NotFound(u64, String),
}

#[derive(Default)]
pub struct ActiveAlarmIndex {
    by_device: Mutex<HashMap<String, HashMap<u64, AlarmEvent>>>,
}

impl ActiveAlarmIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, alarm: AlarmEvent) {
        self.by_device
            .lock()
            .unwrap()
            .entry(alarm.device_id.clone())
            .or_default()
            .insert(alarm.id, alarm);
    }

    pub fn acknowledge(&self, device_id: &str, alarm_id: u64) -> Result<(), ActiveAlarmError> {
        let mut by_device = self.by_device.lock().unwrap();
        let alarm = by_device
            .get_mut(device_id)
            .and_then(|alarms| alarms.get_mut(&alarm_id))
            .ok_or_else(|| ActiveAlarmError::NotFound(alarm_id, device_id.to_string()))?;
        alarm.acknowledged = true;
        Ok(())
    }

    /// Removes `alarm_id` from the active index, stamping it resolved with
    /// the resolver's identity (spec §4.J: "resolving removes from active
    /// and records resolver identity and time").
    pub fn resolve(&self, device_id: &str, alarm_id: u64, resolved_by: &str, now_iso8601: &str) -> Result<AlarmEvent, ActiveAlarmError> {
        let mut by_device = self.by_device.lock().unwrap();
        let alarms = by_device
            .get_mut(device_id)
            .ok_or_else(|| ActiveAlarmError::NotFound(alarm_id, device_id.to_string()))?;
        let mut alarm = alarms
            .remove(&alarm_id)
            .ok_or_else(|| ActiveAlarmError::NotFound(alarm_id, device_id.to_string()))?;
        alarm.resolved = true;
        alarm.notes = Some(format!("resolved by {resolved_by} at {now_iso8601}"));
        Ok(alarm)
    }

    pub fn active_for_device(&self, device_id: &str) -> Vec<AlarmEvent> {
        self.by_device
            .lock()
            .unwrap()
            .get(device_id)
            .map(|alarms| alarms.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn active_count(&self) -> usize {
        self.by_device.lock().unwrap().values().map(HashMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fw_protocol::{Location, Severity};

    fn alarm(id: u64, device_id: &str) -> AlarmEvent {
        AlarmEvent {
            id,
            device_id: device_id.to_string(),
            alarm_type: "SMOKE".to_string(),
            severity: Severity::High,
            value: 90.0,
            unit: "ppm".to_string(),
            timestamp: "2024-01-01T00:00:00.000Z".to_string(),
            location: Location::default(),
            acknowledged: false,
            resolved: false,
            notes: None,
            metadata: None,
        }
    }

    #[test]
    fn recorded_alarm_is_active_and_acknowledgeable() {
        let index = ActiveAlarmIndex::new();
        index.record(alarm(1, "d1"));
        index.acknowledge("d1", 1).unwrap();
        let active = index.active_for_device("d1");
        assert_eq!(active.len(), 1);
        assert!(active[0].acknowledged);
    }

    #[test]
    fn resolving_removes_from_active_and_stamps_resolver() {
        let index = ActiveAlarmIndex::new();
        index.record(alarm(1, "d1"));
        let resolved = index.resolve("d1", 1, "operator-1", "2024-01-01T00:05:00.000Z").unwrap();
        assert!(resolved.resolved);
        assert!(resolved.notes.unwrap().contains("operator-1"));
        assert!(index.active_for_device("d1").is_empty());
    }

    #[test]
    fn resolving_unknown_alarm_fails() {
        let index = ActiveAlarmIndex::new();
        assert!(index.resolve("d1", 99, "operator-1", "now").is_err());
    }
}
