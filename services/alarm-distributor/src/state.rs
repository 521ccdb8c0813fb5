use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fw_sync::SyncService;

use crate::history_facade::HistoryFacade;

/// Plain counters the `/metrics` handler reads. No exporter integration is
/// wired up; this is the narrow observability slice the core is scoped to
/// serve directly (spec §1 non-goals exclude a full metrics pipeline).
#[derive(Default)]
pub struct DistributorMetrics {
    pub alarms_consumed: AtomicU64,
    pub suppression_conflicts: AtomicU64,
    pub distribution_all_failed: AtomicU64,
}

impl DistributorMetrics {
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "alarms_consumed": self.alarms_consumed.load(Ordering::Relaxed),
            "suppression_conflicts": self.suppression_conflicts.load(Ordering::Relaxed),
            "distribution_all_failed": self.distribution_all_failed.load(Ordering::Relaxed),
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub history: Arc<dyn HistoryFacade>,
    pub sync: Arc<SyncService>,
    pub metrics: Arc<DistributorMetrics>,
}
