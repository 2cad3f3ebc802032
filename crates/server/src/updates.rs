// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic image-update checks: compare each service's local image digest
//! against the registry manifest, persist the results, and nudge the
//! `updates` channel when a sweep finishes.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;

use crate::broadcast::{self, Channel};
use crate::compose::ServiceSpec;
use crate::stack::{self, Stack};
use crate::state::Core;
use crate::store::UpdateRecord;

/// Give the stacks directory and daemon a moment before the first sweep.
const STARTUP_DELAY: Duration = Duration::from_secs(5);
/// Concurrent digest checks per sweep.
const WORKERS: usize = 3;
const DEFAULT_INTERVAL_HOURS: u64 = 6;

/// Settings keys, re-read on every tick so changes apply without a restart.
pub const SETTING_ENABLED: &str = "checkImageUpdates";
pub const SETTING_INTERVAL_HOURS: &str = "imageUpdateIntervalHours";

async fn enabled(core: &Arc<Core>) -> bool {
    core.store
        .get_setting(SETTING_ENABLED)
        .await
        .and_then(|v| v.as_bool())
        .unwrap_or(true)
}

async fn interval(core: &Arc<Core>) -> Duration {
    let hours = core
        .store
        .get_setting(SETTING_INTERVAL_HOURS)
        .await
        .and_then(|v| v.as_u64())
        .filter(|h| *h > 0)
        .unwrap_or(DEFAULT_INTERVAL_HOURS);
    Duration::from_secs(hours * 3600)
}

/// False when shutdown interrupted the sleep.
async fn sleep_or_shutdown(core: &Arc<Core>, duration: Duration) -> bool {
    tokio::select! {
        _ = core.shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Long-running scheduler task. Resumes the cadence from the persisted
/// last-sweep timestamp, so a restart does not hammer registries.
pub async fn run_scheduler(core: Arc<Core>) {
    if !sleep_or_shutdown(&core, STARTUP_DELAY).await {
        return;
    }

    if let Some(last) = core.store.last_check().await {
        let elapsed = chrono::Utc::now().timestamp().saturating_sub(last).max(0) as u64;
        let period = interval(&core).await.as_secs();
        if elapsed < period
            && !sleep_or_shutdown(&core, Duration::from_secs(period - elapsed)).await
        {
            return;
        }
    }

    loop {
        if core.shutdown.is_cancelled() {
            return;
        }
        if enabled(&core).await {
            sweep_all(&core).await;
            if let Err(e) = core.store.set_last_check(chrono::Utc::now().timestamp()).await {
                tracing::warn!(err = %e, "failed to persist last update check");
            }
            broadcast::trigger(&core, Channel::Updates);
        }
        if !sleep_or_shutdown(&core, interval(&core).await).await {
            return;
        }
    }
}

/// One full sweep across every stack in the stacks directory.
pub async fn sweep_all(core: &Arc<Core>) {
    for (name, _) in stack::scan(&core.config.stacks_dir).await {
        sweep_stack(core, &name).await;
    }
}

/// Check one stack's services with bounded concurrency. Services labeled
/// out of update checking get their stale records purged instead.
pub async fn sweep_stack(core: &Arc<Core>, stack_name: &str) {
    let stack = match Stack::load(&core.config.stacks_dir, stack_name).await {
        Ok(stack) => stack,
        Err(e) => {
            tracing::warn!(stack = stack_name, err = %e, "update check: stack unreadable");
            return;
        }
    };

    let (checkable, opted_out): (Vec<ServiceSpec>, Vec<ServiceSpec>) = stack
        .services()
        .into_iter()
        .filter(|s| !s.image.is_empty() || !s.updates_check_enabled())
        .partition(|s| !s.image.is_empty() && s.updates_check_enabled());

    futures_util::stream::iter(checkable)
        .for_each_concurrent(WORKERS, |service| {
            let core = Arc::clone(core);
            let stack_name = stack_name.to_owned();
            async move {
                check_service(&core, &stack_name, &service).await;
            }
        })
        .await;

    for service in opted_out {
        if let Err(e) = core.store.remove_update(stack_name, &service.name).await {
            tracing::warn!(stack = stack_name, service = %service.name, err = %e,
                "failed to purge opted-out update record");
        }
    }
}

/// Digest comparison for one service. Failures log and leave the digest
/// empty; the sweep never aborts on a single service.
async fn check_service(core: &Arc<Core>, stack_name: &str, service: &ServiceSpec) {
    let local = match core.docker.local_digest(&service.image).await {
        Ok(digest) => digest.unwrap_or_default(),
        Err(e) => {
            tracing::debug!(image = %service.image, err = %e, "local digest lookup failed");
            String::new()
        }
    };
    let remote = match core.docker.remote_digest(&service.image).await {
        Ok(digest) => digest.unwrap_or_default(),
        Err(e) => {
            tracing::debug!(image = %service.image, err = %e, "remote digest lookup failed");
            String::new()
        }
    };

    let has_update = !local.is_empty() && !remote.is_empty() && local != remote;
    let record = UpdateRecord {
        image: service.image.clone(),
        local_digest: local,
        remote_digest: remote,
        has_update,
        last_checked: chrono::Utc::now().timestamp(),
    };
    if let Err(e) = core.store.upsert_update(stack_name, &service.name, record).await {
        tracing::warn!(stack = stack_name, service = %service.name, err = %e,
            "failed to store update record");
    }
}

#[cfg(test)]
#[path = "updates_tests.rs"]
mod tests;
