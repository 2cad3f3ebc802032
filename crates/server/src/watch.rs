// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem watcher on the stacks directory. Any change under it nudges
//! the `stacks` channel; the debouncer coalesces editor save storms.

use std::path::Path;
use std::sync::Arc;

use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::broadcast::{self, Channel};
use crate::state::Core;

pub fn spawn_watcher(core: Arc<Core>) {
    tokio::spawn(async move {
        let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
        let watcher = setup_watcher(&core.config.stacks_dir, wake_tx);
        if watcher.is_none() {
            tracing::warn!(
                dir = %core.config.stacks_dir.display(),
                "stacks watcher unavailable; stack list refreshes only on request"
            );
        }

        loop {
            tokio::select! {
                _ = core.shutdown.cancelled() => break,
                wake = wake_rx.recv() => {
                    if wake.is_none() {
                        break;
                    }
                    broadcast::trigger(&core, Channel::Stacks);
                }
            }
        }
        drop(watcher);
    });
}

/// The watcher handle must stay alive for events to keep flowing.
fn setup_watcher(
    dir: &Path,
    wake_tx: mpsc::Sender<()>,
) -> Option<notify::RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |_: notify::Result<notify::Event>| {
        // Full queue means a wake-up is already pending.
        let _ = wake_tx.try_send(());
    })
    .ok()?;
    watcher.watch(dir, RecursiveMode::Recursive).ok()?;
    Some(watcher)
}

#[cfg(test)]
#[path = "watch_tests.rs"]
mod tests;
