//! Component J: the Alarm Consumer (spec §4.J).

use std::sync::Arc;

use fw_distributor::Distributor;
use fw_hotspot::{ActivationOutcome, HotspotError, HotspotPrimitives, HotspotStore, SuppressionEventPublisher};
use fw_protocol::{AlarmEvent, Severity, SuppressionType};
use thiserror::Error;

use crate::active_alarms::{ActiveAlarmError, ActiveAlarmIndex};

#[derive(Debug, Error)]
pub enum AlarmConsumerError {
    #[error(transparent)]
    ActiveAlarm(#[from] ActiveAlarmError),
}

/// Full suppression intensity applied when a `FIRE`/`HIGH` alarm triggers
/// automatic activation (spec §4.J).
const FULL_INTENSITY: u8 = 100;

pub struct AlarmConsumer<S: HotspotStore, P: SuppressionEventPublisher> {
    active: Arc<ActiveAlarmIndex>,
    hotspot: Arc<HotspotPrimitives<S, P>>,
    distributor: Arc<Distributor>,
}

impl<S: HotspotStore, P: SuppressionEventPublisher> AlarmConsumer<S, P> {
    pub fn new(active: Arc<ActiveAlarmIndex>, hotspot: Arc<HotspotPrimitives<S, P>>, distributor: Arc<Distributor>) -> Self {
        Self {
            active,
            hotspot,
            distributor,
        }
    }

    /// Consumes one alarm off `alarm-events` (spec §4.J): records it active,
    /// triggers suppression for a qualifying FIRE/HIGH alarm, and hands it
    /// to the Distributor. A suppression conflict or failure is logged, not
    /// propagated — distribution must still happen (spec §7: `StoreUnavailable`
    /// and similar degrade; they never block alarm delivery to live channels).
    pub async fn consume(&self, alarm: AlarmEvent, now_ms: i64) -> Result<(), AlarmConsumerError> {
        self.active.record(alarm.clone());

        if alarm.severity == Severity::High && alarm.alarm_type == "FIRE" {
            self.activate_suppression(&alarm, now_ms).await;
        }

        let report = self.distributor.distribute(&alarm).await;
        if report.all_failed() {
            tracing::warn!(alarm_id = alarm.id, device_id = %alarm.device_id, "all distributor sinks failed for alarm");
        }
        Ok(())
    }

    async fn activate_suppression(&self, alarm: &AlarmEvent, now_ms: i64) {
        let room = alarm.location.room.as_deref().unwrap_or("");
        let suppression_type = SuppressionType::from_room_tag(room);
        let zone_id = alarm.location.zone.clone().unwrap_or_else(|| alarm.device_id.clone());

        match self
            .hotspot
            .activate_suppression(&alarm.device_id, &zone_id, suppression_type, FULL_INTENSITY, now_ms)
            .await
        {
            Ok(ActivationOutcome::Activated) => {
                tracing::info!(device_id = %alarm.device_id, ?suppression_type, "suppression activated");
            }
            Ok(ActivationOutcome::Updated) => {
                tracing::info!(device_id = %alarm.device_id, ?suppression_type, "suppression updated");
            }
            Ok(ActivationOutcome::Conflict) => {
                tracing::warn!(device_id = %alarm.device_id, ?suppression_type, "suppression type conflict, leaving existing suppression active");
            }
            Err(HotspotError::DeviceMissing(_) | HotspotError::DeviceDisabled(_) | HotspotError::DeviceDisconnected(_)) => {
                tracing::warn!(device_id = %alarm.device_id, "suppression skipped, device unavailable");
            }
            Err(e) => {
                tracing::error!(device_id = %alarm.device_id, error = %e, "suppression activation failed");
            }
        }
    }

    pub fn ack(&self, device_id: &str, alarm_id: u64) -> Result<(), AlarmConsumerError> {
        self.active.acknowledge(device_id, alarm_id).map_err(Into::into)
    }

    pub fn resolve(&self, device_id: &str, alarm_id: u64, resolved_by: &str, now_iso8601: &str) -> Result<AlarmEvent, AlarmConsumerError> {
        self.active.resolve(device_id, alarm_id, resolved_by, now_iso8601).map_err(Into::into)
    }

    pub fn active_alarms(&self) -> Arc<ActiveAlarmIndex> {
        self.active.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fw_hotspot::in_memory::InMemoryHotspotStore;
    use fw_hotspot::{HotspotPrimitivesConfig, NoopPublisher};
    use fw_protocol::{Location, Severity};
    use std::time::Duration;

    fn fire_alarm(room: &str) -> AlarmEvent {
        AlarmEvent {
            id: 1,
            device_id: "d1".to_string(),
            alarm_type: "FIRE".to_string(),
            severity: Severity::High,
            value: 100.0,
            unit: "ppm".to_string(),
            timestamp: "2024-01-01T00:00:00.000Z".to_string(),
            location: Location {
                room: Some(room.to_string()),
                ..Default::default()
            },
            acknowledged: false,
            resolved: false,
            notes: None,
            metadata: None,
        }
    }

    fn consumer() -> AlarmConsumer<InMemoryHotspotStore, NoopPublisher> {
        let store = InMemoryHotspotStore::new();
        store.set_device_state("d1", fw_hotspot::DeviceState::Active);
        let hotspot = Arc::new(HotspotPrimitives::new(store, NoopPublisher, HotspotPrimitivesConfig::default()));
        let distributor = Arc::new(Distributor::new(vec![], Duration::from_secs(1)));
        AlarmConsumer::new(Arc::new(ActiveAlarmIndex::new()), hotspot, distributor)
    }

    #[tokio::test]
    async fn fire_high_alarm_activates_gas_suppression_in_a_server_room() {
        let consumer = consumer();
        consumer.consume(fire_alarm("Server Room 2"), 1000).await.unwrap();
        assert_eq!(consumer.active_alarms().active_count(), 1);
    }

    #[tokio::test]
    async fn non_fire_alarm_does_not_attempt_suppression() {
        let consumer = consumer();
        let mut alarm = fire_alarm("Server Room 2");
        alarm.alarm_type = "SMOKE".to_string();
        consumer.consume(alarm, 1000).await.unwrap();
        assert_eq!(consumer.active_alarms().active_count(), 1);
    }

    #[tokio::test]
    async fn resolving_an_active_alarm_removes_it() {
        let consumer = consumer();
        consumer.consume(fire_alarm("Hallway"), 1000).await.unwrap();
        consumer.resolve("d1", 1, "operator-1", "2024-01-01T00:05:00.000Z").unwrap();
        assert_eq!(consumer.active_alarms().active_count(), 0);
    }
}
