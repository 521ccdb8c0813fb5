//! Spec §4.J / §4.M / §8 scenario 5: a FIRE/HIGH alarm in a server room
//! activates gas suppression on first delivery and updates it (without
//! double-counting) on a second delivery for the same device.

use std::sync::Arc;
use std::time::Duration;

use alarm_distributor::active_alarms::ActiveAlarmIndex;
use alarm_distributor::AlarmConsumer;
use fw_distributor::Distributor;
use fw_hotspot::in_memory::InMemoryHotspotStore;
use fw_hotspot::{DeviceState, HotspotPrimitives, HotspotPrimitivesConfig, NoopPublisher, SuppressionType};
use fw_protocol::{AlarmEvent, Location, Severity};

fn fire_alarm(id: u64, device_id: &str, room: &str) -> AlarmEvent {
    AlarmEvent {
        id,
        device_id: device_id.to_string(),
        alarm_type: "FIRE".to_string(),
        severity: Severity::High,
        value: 100.0,
        unit: "ppm".to_string(),
        timestamp: "2024-01-01T00:00:00.000Z".to_string(),
        location: Location {
            room: Some(room.to_string()),
            zone: Some("zone-1".to_string()),
            ..Default::default()
        },
        acknowledged: false,
        resolved: false,
        notes: None,
        metadata: None,
    }
}

#[tokio::test]
async fn first_alarm_activates_and_second_alarm_updates_without_double_counting() {
    let store = InMemoryHotspotStore::new();
    store.set_device_state("device-1", DeviceState::Active);
    let hotspot = Arc::new(HotspotPrimitives::new(store, NoopPublisher, HotspotPrimitivesConfig::default()));
    let distributor = Arc::new(Distributor::new(vec![], Duration::from_secs(1)));
    let consumer = AlarmConsumer::new(Arc::new(ActiveAlarmIndex::new()), hotspot.clone(), distributor);

    consumer.consume(fire_alarm(1, "device-1", "Server Room A"), 1_000).await.unwrap();
    let counters = hotspot.counters("device-1").await.unwrap();
    assert_eq!(counters.total, 1);
    assert_eq!(counters.gas, 1);
    assert_eq!(counters.water, 0);

    // A second FIRE alarm for the same device/suppression type updates the
    // existing record (spec §4.M ActivationOutcome::Updated) rather than
    // bumping the counters again.
    consumer.consume(fire_alarm(2, "device-1", "Server Room A"), 2_000).await.unwrap();
    let counters = hotspot.counters("device-1").await.unwrap();
    assert_eq!(counters.total, 1, "an update must not re-bump the activation counter");

    assert_eq!(consumer.active_alarms().active_count(), 2);
}

#[tokio::test]
async fn a_conflicting_suppression_type_leaves_the_existing_suppression_untouched() {
    let store = InMemoryHotspotStore::new();
    store.set_device_state("device-1", DeviceState::Active);
    let hotspot = Arc::new(HotspotPrimitives::new(store, NoopPublisher, HotspotPrimitivesConfig::default()));
    let distributor = Arc::new(Distributor::new(vec![], Duration::from_secs(1)));
    let consumer = AlarmConsumer::new(Arc::new(ActiveAlarmIndex::new()), hotspot.clone(), distributor);

    // "Server Room" maps to SuppressionType::Gas.
    consumer.consume(fire_alarm(1, "device-1", "Server Room A"), 1_000).await.unwrap();
    // "Kitchen" maps to SuppressionType::Foam -- a conflicting type for the
    // same device, so activation must report Conflict and leave gas alone.
    consumer.consume(fire_alarm(2, "device-1", "Kitchen"), 2_000).await.unwrap();

    let counters = hotspot.counters("device-1").await.unwrap();
    assert_eq!(counters.total, 1);
    assert_eq!(counters.gas, 1);
    assert_eq!(counters.foam, 0, "conflicting suppression type must not be applied");

    let suppression_type = SuppressionType::from_room_tag("Server Room A");
    assert_eq!(suppression_type, SuppressionType::Gas);
}
