// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Trailing-edge debounce window for state refreshes.
///
/// Docker emits bursts of events (a compose `up` produces dozens within
/// milliseconds); one refresh per burst per resource kind is enough.
pub const DEBOUNCE_DELAY: Duration = Duration::from_millis(200);

struct Pending {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Per-channel trailing-edge timers. `trigger` resets any pending timer for
/// the channel and schedules the action to run after the configured delay,
/// so only the last trigger of a burst fires.
pub struct Debouncer {
    delay: Duration,
    pending: Arc<Mutex<HashMap<String, Pending>>>,
    next_generation: AtomicU64,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Schedule `action` to run after the delay, superseding any timer
    /// already pending on `channel`.
    pub fn trigger<F>(&self, channel: &str, action: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let pending = Arc::clone(&self.pending);
        let delay = self.delay;
        let key = channel.to_owned();

        let task_key = key.clone();
        let task_pending = Arc::clone(&self.pending);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Only the newest timer for the channel may fire; an older one
            // that lost the race to an abort call simply steps aside.
            {
                let mut map = task_pending.lock();
                match map.get(&task_key) {
                    Some(p) if p.generation == generation => {
                        map.remove(&task_key);
                    }
                    _ => return,
                }
            }
            action.await;
        });

        let mut map = pending.lock();
        if let Some(old) = map.insert(key, Pending { generation, handle }) {
            old.handle.abort();
        }
    }

    /// Cancel every pending timer.
    pub fn stop(&self) {
        let mut map = self.pending.lock();
        for (_, p) in map.drain() {
            p.handle.abort();
        }
    }

    /// Number of timers currently pending (test hook).
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
#[path = "debounce_tests.rs"]
mod tests;
