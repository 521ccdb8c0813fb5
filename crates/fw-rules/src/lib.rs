//! Component F: the rule store (spec §4.F).
//!
//! Holds the authoritative `rule_id -> Rule` map plus a denormalized hot
//! path, `(device_id, sensor_type) -> [(rule_id, threshold)]`, consulted by
//! the evaluator's fast path. On any mutation the hot path is updated
//! *before* the change notification is published, so a reader that wakes on
//! the notification never observes a stale threshold — this is what keeps
//! the update-to-visible latency requirement (200 ms p95, spec §4.F) honest
//! even though the full snapshot rebuild is comparatively heavy.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use fw_protocol::Rule;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum RuleStoreError {
    #[error("rule {0} not found")]
    NotFound(String),
    #[error("rule {0} already exists")]
    AlreadyExists(String),
}

#[derive(Debug, Clone, Copy)]
pub struct HotThreshold {
    pub threshold: f64,
}

/// An immutable, point-in-time view of all rules plus the hot path,
/// distributed to evaluators via a `watch` channel.
#[derive(Debug, Clone, Default)]
pub struct RuleSnapshot {
    pub rules: HashMap<String, Rule>,
}

impl RuleSnapshot {
    pub fn enabled_rules_for(&self, device_id: &str, sensor_type: &str) -> Vec<&Rule> {
        self.rules
            .values()
            .filter(|r| r.enabled && r.device_id == device_id && r.sensor_type == sensor_type)
            .collect()
    }
}

pub struct RuleStore {
    rules: RwLock<HashMap<String, Rule>>,
    hot_path: RwLock<HashMap<(String, String), HashMap<String, HotThreshold>>>,
    snapshot_tx: watch::Sender<Arc<RuleSnapshot>>,
}

impl RuleStore {
    pub fn new() -> Self {
        let (snapshot_tx, _rx) = watch::channel(Arc::new(RuleSnapshot::default()));
        Self {
            rules: RwLock::new(HashMap::new()),
            hot_path: RwLock::new(HashMap::new()),
            snapshot_tx,
        }
    }

    /// Evaluators subscribe here; the channel always holds the latest
    /// snapshot and wakes the receiver on every change.
    pub fn subscribe(&self) -> watch::Receiver<Arc<RuleSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    pub fn get(&self, rule_id: &str) -> Option<Rule> {
        self.rules.read().unwrap().get(rule_id).cloned()
    }

    pub fn list(&self) -> Vec<Rule> {
        self.rules.read().unwrap().values().cloned().collect()
    }

    pub fn create(&self, rule: Rule) -> Result<(), RuleStoreError> {
        {
            let rules = self.rules.read().unwrap();
            if rules.contains_key(&rule.id) {
                return Err(RuleStoreError::AlreadyExists(rule.id.clone()));
            }
        }
        self.upsert(rule);
        Ok(())
    }

    pub fn update(&self, rule: Rule) -> Result<(), RuleStoreError> {
        {
            let rules = self.rules.read().unwrap();
            if !rules.contains_key(&rule.id) {
                return Err(RuleStoreError::NotFound(rule.id.clone()));
            }
        }
        self.upsert(rule);
        Ok(())
    }

    pub fn delete(&self, rule_id: &str) -> Result<(), RuleStoreError> {
        let removed = self.rules.write().unwrap().remove(rule_id);
        let rule = removed.ok_or_else(|| RuleStoreError::NotFound(rule_id.to_string()))?;

        let hot_key = (rule.device_id.clone(), rule.sensor_type.clone());
        if let Some(bucket) = self.hot_path.write().unwrap().get_mut(&hot_key) {
            bucket.remove(rule_id);
        }
        self.publish_snapshot();
        Ok(())
    }

    /// Writes the hot-path threshold, then publishes the refreshed
    /// snapshot — in that order, per the ordering requirement in spec §4.F.
    fn upsert(&self, rule: Rule) {
        let hot_key = (rule.device_id.clone(), rule.sensor_type.clone());
        self.hot_path
            .write()
            .unwrap()
            .entry(hot_key)
            .or_default()
            .insert(
                rule.id.clone(),
                HotThreshold {
                    threshold: rule.threshold,
                },
            );

        self.rules.write().unwrap().insert(rule.id.clone(), rule);
        self.publish_snapshot();
    }

    fn publish_snapshot(&self) {
        let rules = self.rules.read().unwrap().clone();
        self.snapshot_tx.send_replace(Arc::new(RuleSnapshot { rules }));
    }

    /// Fast-path threshold lookup, bypassing the full snapshot.
    pub fn hot_path_thresholds(&self, device_id: &str, sensor_type: &str) -> Vec<f64> {
        self.hot_path
            .read()
            .unwrap()
            .get(&(device_id.to_string(), sensor_type.to_string()))
            .map(|bucket| bucket.values().map(|t| t.threshold).collect())
            .unwrap_or_default()
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fw_protocol::{Location, Operator, Severity};

    fn sample_rule(id: &str, threshold: f64) -> Rule {
        Rule {
            id: id.to_string(),
            name: "smoke-high".to_string(),
            device_id: "d1".to_string(),
            sensor_type: "smoke".to_string(),
            operator: Operator::Gt,
            threshold,
            window_seconds: 60,
            severity: Severity::High,
            alarm_type: "SMOKE".to_string(),
            location: None,
            enabled: true,
            metadata: None,
        }
    }

    #[test]
    fn create_then_get_round_trips() {
        let store = RuleStore::new();
        store.create(sample_rule("r1", 50.0)).unwrap();
        assert_eq!(store.get("r1").unwrap().threshold, 50.0);
    }

    #[test]
    fn create_rejects_duplicate_id() {
        let store = RuleStore::new();
        store.create(sample_rule("r1", 50.0)).unwrap();
        assert!(matches!(
            store.create(sample_rule("r1", 60.0)),
            Err(RuleStoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn hot_path_threshold_is_visible_before_caller_reads_the_snapshot() {
        let store = RuleStore::new();
        store.create(sample_rule("r1", 50.0)).unwrap();

        // Simulate a threshold change; the hot path must already reflect it
        // by the time `upsert` returns (it is always written first).
        store.update(sample_rule("r1", 100.0)).unwrap();
        assert_eq!(store.hot_path_thresholds("d1", "smoke"), vec![100.0]);
    }

    #[tokio::test]
    async fn subscribers_observe_rule_changes() {
        let store = RuleStore::new();
        let mut rx = store.subscribe();
        store.create(sample_rule("r1", 50.0)).unwrap();
        rx.changed().await.unwrap();
        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.rules.len(), 1);
    }

    #[test]
    fn delete_removes_rule_and_hot_path_entry() {
        let store = RuleStore::new();
        store.create(sample_rule("r1", 50.0)).unwrap();
        store.delete("r1").unwrap();
        assert!(store.get("r1").is_none());
        assert!(store.hot_path_thresholds("d1", "smoke").is_empty());
    }
}
