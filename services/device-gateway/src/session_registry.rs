//! At-most-one-session-per-device enforcement (spec §4.C: "a new auth for
//! the same `device_id` closes the prior session").
//!
//! Each registration is tagged with a generation. `unregister` only removes
//! the map entry when the generation it was given still matches the one
//! currently on file — otherwise a stale session's own cleanup, running
//! after it has already been preempted by a newer auth, would delete the
//! newer session's registration out from under it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::oneshot;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, (u64, oneshot::Sender<()>)>>,
    next_generation: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session for `device_id`, closing any prior session
    /// (signalling its preempt receiver) in the same step. Returns this
    /// session's generation and the receiver it should select on to learn
    /// when it has itself been preempted.
    pub fn register(&self, device_id: &str) -> (u64, oneshot::Receiver<()>) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let mut sessions = self.sessions.lock().unwrap();
        if let Some((_, prior_tx)) = sessions.insert(device_id.to_string(), (generation, tx)) {
            let _ = prior_tx.send(());
        }
        (generation, rx)
    }

    /// Removes `device_id`'s registration, but only if `generation` is still
    /// the current one — a session preempted by a newer auth must not clobber
    /// the newer session's entry when it runs its own cleanup.
    pub fn unregister(&self, device_id: &str, generation: u64) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some((current_generation, _)) = sessions.get(device_id) {
            if *current_generation == generation {
                sessions.remove(device_id);
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}
