// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Combined-log pipeline: one follow reader per container, merged through a
//! bounded channel into batched terminal writes, with run-boundary banners
//! when a container restarts.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::broadcast::fnv1a64;
use crate::docker::EventKind;
use crate::state::Core;
use crate::term::Terminal;

/// Bounded hand-off between readers and the flusher.
const LINE_CHANNEL_CAPACITY: usize = 256;
/// One terminal write per tick keeps the socket message rate bounded.
const FLUSH_INTERVAL: Duration = Duration::from_millis(50);
/// History replayed when a subscriber first joins.
const HISTORY_TAIL: u64 = 100;

const RESET: &str = "\x1b[0m";
/// Bold on magenta, for run-boundary banners.
const BANNER_STYLE: &str = "\x1b[1;45m";

/// Prefix palette, assigned per service.
const COLORS: [&str; 8] = [
    "\x1b[36m", "\x1b[33m", "\x1b[32m", "\x1b[35m",
    "\x1b[34m", "\x1b[91m", "\x1b[96m", "\x1b[93m",
];

/// Start the pipeline feeding a `combined--<stack>` terminal. The returned
/// token is stored on the terminal as its cancel handle; cancelling it stops
/// every reader and the flusher.
pub fn spawn_pipeline(core: &Arc<Core>, stack: &str, terminal: &Arc<Terminal>) -> CancellationToken {
    let token = CancellationToken::new();
    terminal.set_cancel(token.clone());

    let core = Arc::clone(core);
    let stack = stack.to_owned();
    let terminal = Arc::clone(terminal);
    let run_token = token.clone();
    tokio::spawn(async move {
        run_pipeline(core, stack, terminal, run_token).await;
    });
    token
}

async fn run_pipeline(core: Arc<Core>, stack: String, terminal: Arc<Terminal>, token: CancellationToken) {
    let containers = match core.docker.list_containers(Some(&stack)).await {
        Ok(list) => list,
        Err(e) => {
            tracing::warn!(stack, err = %e, "combined log: container list failed");
            Vec::new()
        }
    };

    // Stable prefix layout: services sorted at startup pick their palette
    // slot; services appearing later fall back to a name hash.
    let mut services: Vec<String> = containers.iter().map(|c| c.service_name()).collect();
    services.sort();
    services.dedup();
    let pad = services.iter().map(String::len).max().unwrap_or(0);
    let palette = Arc::new(Palette::new(services));

    let (line_tx, line_rx) = mpsc::channel::<String>(LINE_CHANNEL_CAPACITY);
    let active: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

    for container in &containers {
        active.lock().insert(container.id.clone());
        spawn_reader(
            &core,
            container.id.clone(),
            prefix_for(&palette, &container.service_name(), pad),
            Some(HISTORY_TAIL),
            line_tx.clone(),
            token.clone(),
        );
    }

    spawn_restart_watcher(
        &core,
        stack,
        Arc::clone(&palette),
        pad,
        Arc::clone(&active),
        line_tx.clone(),
        token.clone(),
    );
    drop(line_tx);

    flush_loop(terminal, line_rx, token).await;
}

/// Service → color mapping, frozen at pipeline start.
struct Palette {
    assigned: Vec<String>,
}

impl Palette {
    fn new(services: Vec<String>) -> Self {
        Self { assigned: services }
    }

    fn color(&self, service: &str) -> &'static str {
        match self.assigned.iter().position(|s| s == service) {
            Some(index) => COLORS[index % COLORS.len()],
            None => COLORS[(fnv1a64(service.as_bytes()) as usize) % COLORS.len()],
        }
    }
}

fn prefix_for(palette: &Palette, service: &str, pad: usize) -> String {
    let color = palette.color(service);
    format!("{color}{service:<pad$} |{RESET} ")
}

/// One follow reader: line-splits the stream and forwards prefixed lines.
/// Blocks on the bounded channel under the pipeline token.
fn spawn_reader(
    core: &Arc<Core>,
    container_id: String,
    prefix: String,
    tail: Option<u64>,
    line_tx: mpsc::Sender<String>,
    token: CancellationToken,
) {
    let docker = Arc::clone(&core.docker);
    tokio::spawn(async move {
        let mut stream = docker.follow_logs(&container_id, tail);
        let mut partial = Vec::new();
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                item = stream.next() => {
                    let chunk = match item {
                        Some(Ok(chunk)) => chunk,
                        Some(Err(e)) => {
                            tracing::debug!(container = %container_id, err = %e, "log stream error");
                            break;
                        }
                        None => break,
                    };
                    partial.extend_from_slice(&chunk);
                    while let Some(pos) = partial.iter().position(|b| *b == b'\n') {
                        let raw: Vec<u8> = partial.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
                        let line = line.trim_end_matches('\r');
                        let formatted = format!("{prefix}{line}\n");
                        tokio::select! {
                            _ = token.cancelled() => return,
                            sent = line_tx.send(formatted) => {
                                if sent.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        }
    });
}

/// Watch daemon events for container starts in this stack: enqueue a run
/// banner and, for container ids this pipeline has not seen, a tail-0
/// reader (the old reader already replayed the history).
fn spawn_restart_watcher(
    core: &Arc<Core>,
    stack: String,
    palette: Arc<Palette>,
    pad: usize,
    active: Arc<Mutex<HashSet<String>>>,
    line_tx: mpsc::Sender<String>,
    token: CancellationToken,
) {
    let core = Arc::clone(core);
    tokio::spawn(async move {
        let mut events = core.docker.events();
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                item = events.next() => {
                    let event = match item {
                        Some(Ok(event)) => event,
                        Some(Err(_)) | None => break,
                    };
                    if event.kind != EventKind::Container
                        || event.action != "start"
                        || event.project() != Some(stack.as_str())
                    {
                        continue;
                    }

                    let service = event.service().unwrap_or("?").to_owned();
                    let clock = match core.docker.container_started_at(&event.actor_id).await {
                        Ok(Some(at)) => at.format("%H:%M:%S").to_string(),
                        _ => "??:??:??".to_owned(),
                    };
                    let banner = format!(
                        "\n{BANNER_STYLE} \u{25B6} CONTAINER START \u{2014} {service} ({clock}) {RESET}\n\n"
                    );
                    if line_tx.send(banner).await.is_err() {
                        break;
                    }

                    let is_new = active.lock().insert(event.actor_id.clone());
                    if is_new {
                        spawn_reader(
                            &core,
                            event.actor_id.clone(),
                            prefix_for(&palette, &service, pad),
                            Some(0),
                            line_tx.clone(),
                            token.clone(),
                        );
                    }
                }
            }
        }
    });
}

/// Drain the line channel on a fixed tick and issue one terminal write per
/// batch. On cancellation, whatever is still queued is flushed first.
async fn flush_loop(
    terminal: Arc<Terminal>,
    mut line_rx: mpsc::Receiver<String>,
    token: CancellationToken,
) {
    let mut tick = tokio::time::interval(FLUSH_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                flush_pending(&terminal, &mut line_rx);
                break;
            }
            _ = tick.tick() => {
                flush_pending(&terminal, &mut line_rx);
            }
        }
    }
}

fn flush_pending(terminal: &Terminal, line_rx: &mut mpsc::Receiver<String>) {
    let mut batch = String::new();
    while let Ok(line) = line_rx.try_recv() {
        batch.push_str(&line);
    }
    if !batch.is_empty() {
        terminal.write(batch.as_bytes());
    }
}

#[cfg(test)]
#[path = "logs_tests.rs"]
mod tests;
