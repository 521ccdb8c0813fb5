//! Spec §4.L / §8 scenario 6: with the history backing store unavailable,
//! alarms still record successfully and stay readable through the
//! in-memory fallback ring.

use firewatch_core::{DevStack, DevStackConfig};
use fw_protocol::{AlarmEvent, Location, Severity};

fn alarm(id: u64) -> AlarmEvent {
    AlarmEvent {
        id,
        device_id: "device-1".to_string(),
        alarm_type: "SMOKE".to_string(),
        severity: Severity::High,
        value: 80.0,
        unit: "ppm".to_string(),
        timestamp: "2024-01-01T00:00:00.000Z".to_string(),
        location: Location::default(),
        acknowledged: false,
        resolved: false,
        notes: None,
        metadata: None,
    }
}

#[tokio::test]
async fn five_alarms_with_no_backend_are_all_served_from_the_fallback_ring() {
    let stack = DevStack::build(DevStackConfig::default());
    assert!(!stack.history.is_available().await, "dev stack history backend is never available");

    for id in 1..=5 {
        stack.history.record(id, 1_000 * id as i64, &alarm(id)).await.unwrap();
    }

    let recent = stack.history.recent(10).await;
    assert_eq!(recent.len(), 5);
    let mut ids: Vec<u64> = recent.iter().map(|r| r.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn fallback_records_are_still_queryable_by_device_and_severity() {
    let stack = DevStack::build(DevStackConfig::default());
    stack.history.record(1, 1_000, &alarm(1)).await.unwrap();

    let by_device = stack.history.by_device("device-1", 10).await;
    assert_eq!(by_device.len(), 1);

    let by_severity = stack.history.by_severity(Severity::High, 10).await;
    assert_eq!(by_severity.len(), 1);

    let by_severity_low = stack.history.by_severity(Severity::Low, 10).await;
    assert!(by_severity_low.is_empty());
}
