// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Named terminals: byte sinks with a bounded ring buffer and a set of
//! live subscribers, optionally backed by a PTY child process.
//!
//! A terminal's writers receive every byte in the order it entered the ring
//! buffer. Fan-out happens under the terminal lock, so a subscriber added
//! via [`Terminal::join_and_snapshot`] sees each byte exactly once: either
//! in the snapshot or as a later delivery, never both.

pub mod manager;
pub mod pty;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ring::RingBuffer;
use pty::{ExitStatus, PtyProcess};

pub const DEFAULT_RING_SIZE: usize = 64 * 1024;
pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;

/// The shared shell terminal on the host.
pub const MAIN_TERMINAL_NAME: &str = "main";

pub fn compose_terminal_name(stack: &str) -> String {
    format!("compose--{stack}")
}

pub fn combined_terminal_name(stack: &str) -> String {
    format!("combined--{stack}")
}

/// The stack a combined-log terminal name refers to, if it is one.
pub fn combined_stack_name(terminal_name: &str) -> Option<&str> {
    terminal_name.strip_prefix("combined--")
}

pub fn container_log_terminal_name(container: &str) -> String {
    format!("logs--{container}")
}

pub fn exec_terminal_name(container: &str) -> String {
    format!("exec--{container}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    /// Owns a pseudo-terminal and child process.
    Pty,
    /// No child; accepts programmatic writes only.
    Pipe,
    /// A pipe fed by a combined-log pipeline it owns via its cancel handle.
    Combined,
}

/// Non-blocking per-subscriber delivery, bound to one connection.
pub type WriteFn = Arc<dyn Fn(&[u8]) + Send + Sync>;

struct Inner {
    ring: RingBuffer,
    writers: HashMap<u64, WriteFn>,
}

struct PtyAttachment {
    process: Arc<PtyProcess>,
    input_tx: mpsc::Sender<Bytes>,
}

type ExitCallback = Box<dyn FnOnce(ExitStatus) + Send>;

pub struct Terminal {
    name: String,
    kind: TerminalKind,
    inner: Mutex<Inner>,
    pty: Mutex<Option<PtyAttachment>>,
    cancel: Mutex<Option<CancellationToken>>,
    exit_callback: Mutex<Option<ExitCallback>>,
    running: AtomicBool,
}

impl Terminal {
    pub fn new(name: &str, kind: TerminalKind, ring_size: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            kind,
            inner: Mutex::new(Inner {
                ring: RingBuffer::new(ring_size),
                writers: HashMap::new(),
            }),
            pty: Mutex::new(None),
            cancel: Mutex::new(None),
            exit_callback: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TerminalKind {
        self.kind
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Append to the ring buffer and fan out to every subscriber.
    ///
    /// Fan-out stays inside the critical section: writers only enqueue onto
    /// their connection's outbound queue, and holding the lock across the
    /// loop is what gives all subscribers one total order.
    pub fn write(&self, data: &[u8]) {
        let mut inner = self.inner.lock();
        inner.ring.append(data);
        for writer in inner.writers.values() {
            writer(data);
        }
    }

    /// Atomically subscribe and snapshot the buffer.
    pub fn join_and_snapshot(&self, subscriber_id: u64, writer: WriteFn) -> Vec<u8> {
        let mut inner = self.inner.lock();
        inner.writers.insert(subscriber_id, writer);
        inner.ring.snapshot()
    }

    pub fn add_writer(&self, subscriber_id: u64, writer: WriteFn) {
        self.inner.lock().writers.insert(subscriber_id, writer);
    }

    /// Remove a subscriber; returns how many remain.
    pub fn remove_writer(&self, subscriber_id: u64) -> usize {
        let mut inner = self.inner.lock();
        inner.writers.remove(&subscriber_id);
        inner.writers.len()
    }

    pub fn writer_count(&self) -> usize {
        self.inner.lock().writers.len()
    }

    /// Drain the writer set (used by the manager to carry subscribers over
    /// to a recreated terminal).
    pub fn take_writers(&self) -> HashMap<u64, WriteFn> {
        std::mem::take(&mut self.inner.lock().writers)
    }

    pub fn adopt_writers(&self, writers: HashMap<u64, WriteFn>) {
        self.inner.lock().writers.extend(writers);
    }

    /// Forward input to the PTY. Best-effort ignored on pipe terminals.
    pub fn input(&self, data: Bytes) {
        let guard = self.pty.lock();
        match guard.as_ref() {
            Some(attachment) => {
                if attachment.input_tx.try_send(data).is_err() {
                    tracing::warn!(terminal = %self.name, "input queue full, dropping");
                }
            }
            None => {
                tracing::debug!(terminal = %self.name, "input ignored: no PTY attached");
            }
        }
    }

    /// Resize the PTY. Best-effort ignored on pipe terminals.
    pub fn resize(&self, rows: u16, cols: u16) {
        let guard = self.pty.lock();
        match guard.as_ref() {
            Some(attachment) => {
                if let Err(e) = attachment.process.resize(cols, rows) {
                    tracing::warn!(terminal = %self.name, err = %e, "resize failed");
                }
            }
            None => {
                tracing::debug!(terminal = %self.name, "resize ignored: no PTY attached");
            }
        }
    }

    /// Store the cancellation handle of the pipeline feeding this terminal.
    pub fn set_cancel(&self, token: CancellationToken) {
        *self.cancel.lock() = Some(token);
    }

    /// Invoke the stored cancel handle, if any.
    pub fn cancel_pipeline(&self) {
        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }
    }

    /// Register a callback to run once the PTY child exits.
    pub fn set_exit_callback(&self, callback: ExitCallback) {
        *self.exit_callback.lock() = Some(callback);
    }

    /// Spawn a child process on this terminal's PTY and pump its output
    /// into the buffer. Returns the task handle resolving to the exit
    /// status; [`Terminal::run_pty`] awaits it for synchronous actions.
    pub fn start_pty(
        self: &Arc<Self>,
        command: &[String],
        cwd: Option<PathBuf>,
        env: &[(String, String)],
    ) -> anyhow::Result<JoinHandle<anyhow::Result<ExitStatus>>> {
        let process = Arc::new(PtyProcess::spawn(
            command,
            cwd.as_deref(),
            env,
            DEFAULT_COLS,
            DEFAULT_ROWS,
        )?);
        let (input_tx, input_rx) = mpsc::channel(256);
        *self.pty.lock() = Some(PtyAttachment {
            process: Arc::clone(&process),
            input_tx,
        });
        self.running.store(true, Ordering::Release);

        let terminal = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let sink = Arc::clone(&terminal);
            let result = process.run(input_rx, move |chunk| sink.write(chunk)).await;
            terminal.running.store(false, Ordering::Release);
            *terminal.pty.lock() = None;
            let status = result?;
            if let Some(callback) = terminal.exit_callback.lock().take() {
                callback(status);
            }
            Ok(status)
        }))
    }

    /// Run a child process to completion on this terminal.
    pub async fn run_pty(
        self: &Arc<Self>,
        command: &[String],
        cwd: Option<PathBuf>,
        env: &[(String, String)],
    ) -> anyhow::Result<ExitStatus> {
        let handle = self.start_pty(command, cwd, env)?;
        handle.await.map_err(|e| anyhow::anyhow!("pty task failed: {e}"))?
    }

    /// Tear down whatever backs this terminal: the log pipeline and/or the
    /// PTY child. Called by the manager on removal and replacement.
    pub fn shutdown(&self) {
        self.cancel_pipeline();
        let pid = self.pty.lock().as_ref().map(|a| a.process.pid());
        if let Some(pid) = pid {
            tokio::task::spawn_blocking(move || pty::terminate(pid));
        }
    }
}

impl std::fmt::Debug for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminal")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("writers", &self.writer_count())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
#[path = "terminal_tests.rs"]
mod tests;
