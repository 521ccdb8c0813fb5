//! Component G: the stream evaluator (spec §4.G).
//!
//! Matches a forwarded reading against every enabled rule for its
//! `(device_id, sensor_type)` key and emits a [`CandidateAlarm`] per match.
//! Rules with `window_seconds > 0` fire at most once per window per
//! fingerprint (first-match-in-window). The rule snapshot is read through a
//! `watch` channel so the hot path never blocks a concurrent rule update.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use fw_protocol::{CandidateAlarm, Fingerprint, Reading};
use fw_rules::RuleSnapshot;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Default)]
pub struct EvaluatorStats {
    pub candidates_emitted: AtomicU64,
    pub rule_panics_contained: AtomicU64,
}

pub struct Evaluator {
    snapshot_rx: watch::Receiver<Arc<RuleSnapshot>>,
    /// Last emission time (epoch ms) per fingerprint, for window dedup.
    last_emitted_ms: Mutex<HashMap<Fingerprint, i64>>,
    /// Rules whose evaluation panicked; skipped until explicitly cleared.
    unhealthy_rules: Mutex<std::collections::HashSet<String>>,
    epsilon: f64,
    pub stats: EvaluatorStats,
}

impl Evaluator {
    pub fn new(snapshot_rx: watch::Receiver<Arc<RuleSnapshot>>, epsilon: f64) -> Self {
        Self {
            snapshot_rx,
            last_emitted_ms: Mutex::new(HashMap::new()),
            unhealthy_rules: Mutex::new(std::collections::HashSet::new()),
            epsilon,
            stats: EvaluatorStats::default(),
        }
    }

    /// Evaluates one reading, returning every candidate alarm produced by
    /// rules that matched and were not suppressed by the window policy.
    pub fn evaluate(&self, reading: &Reading, now_ms: i64) -> Vec<CandidateAlarm> {
        let snapshot = self.snapshot_rx.borrow().clone();
        let matching = snapshot.enabled_rules_for(&reading.device_id, &reading.sensor_type);

        let mut candidates = Vec::new();
        for rule in matching {
            if self.unhealthy_rules.lock().unwrap().contains(&rule.id) {
                continue;
            }

            let rule_id = rule.id.clone();
            let operator = rule.operator;
            let threshold = rule.threshold;
            let value = reading.value;
            let epsilon = self.epsilon;

            let matched = catch_unwind(AssertUnwindSafe(|| operator.evaluate(value, threshold, epsilon)));
            let matched = match matched {
                Ok(m) => m,
                Err(_) => {
                    tracing::error!(rule_id = %rule_id, "rule evaluation panicked; marking unhealthy");
                    self.unhealthy_rules.lock().unwrap().insert(rule_id.clone());
                    self.stats.rule_panics_contained.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            if !matched {
                continue;
            }

            let fingerprint = Fingerprint {
                rule_id: rule.id.clone(),
                device_id: reading.device_id.clone(),
                sensor_type: reading.sensor_type.clone(),
            };

            if rule.window_seconds > 0 && !self.window_allows(&fingerprint, rule.window_seconds, now_ms) {
                continue;
            }

            self.stats.candidates_emitted.fetch_add(1, Ordering::Relaxed);
            candidates.push(CandidateAlarm {
                rule_id: rule.id.clone(),
                device_id: reading.device_id.clone(),
                sensor_type: reading.sensor_type.clone(),
                alarm_type: rule.alarm_type.clone(),
                severity: rule.severity,
                value: reading.value,
                unit: reading.unit.clone(),
                timestamp: reading.timestamp,
                location: rule.location.clone(),
                metadata: reading.metadata.clone(),
            });
        }
        candidates
    }

    fn window_allows(&self, fingerprint: &Fingerprint, window_seconds: u64, now_ms: i64) -> bool {
        let mut last_emitted = self.last_emitted_ms.lock().unwrap();
        let window_ms = window_seconds as i64 * 1000;
        match last_emitted.get(fingerprint) {
            Some(&last) if now_ms - last < window_ms => false,
            _ => {
                last_emitted.insert(fingerprint.clone(), now_ms);
                true
            }
        }
    }

    /// Clears the unhealthy flag for a rule, e.g. after an admin fixes and
    /// re-saves it.
    pub fn clear_unhealthy(&self, rule_id: &str) {
        self.unhealthy_rules.lock().unwrap().remove(rule_id);
    }
}
