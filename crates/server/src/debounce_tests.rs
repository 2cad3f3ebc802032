// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn burst_coalesces_to_one_fire() {
    let debouncer = Debouncer::new(Duration::from_millis(50));
    let fired = Arc::new(AtomicUsize::new(0));

    for _ in 0..10 {
        let fired = Arc::clone(&fired);
        debouncer.trigger("containers", async move {
            fired.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(debouncer.pending_count(), 0);
}

#[tokio::test]
async fn channels_fire_independently() {
    let debouncer = Debouncer::new(Duration::from_millis(30));
    let fired = Arc::new(AtomicUsize::new(0));

    for channel in ["containers", "networks", "volumes"] {
        let fired = Arc::clone(&fired);
        debouncer.trigger(channel, async move {
            fired.fetch_add(1, Ordering::SeqCst);
        });
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn stop_cancels_pending() {
    let debouncer = Debouncer::new(Duration::from_millis(30));
    let fired = Arc::new(AtomicUsize::new(0));

    {
        let fired = Arc::clone(&fired);
        debouncer.trigger("images", async move {
            fired.fetch_add(1, Ordering::SeqCst);
        });
    }
    debouncer.stop();

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}
