// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keyed collection of terminals with replace/recreate semantics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{Terminal, TerminalKind};

/// Grace window before an action terminal is removed, so a reconnecting UI
/// can still join and replay the buffer.
pub const REMOVE_GRACE: Duration = Duration::from_secs(30);

pub struct TerminalManager {
    terminals: Mutex<HashMap<String, Arc<Terminal>>>,
    ring_size: usize,
}

impl TerminalManager {
    pub fn new(ring_size: usize) -> Self {
        Self {
            terminals: Mutex::new(HashMap::new()),
            ring_size,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Terminal>> {
        self.terminals.lock().get(name).cloned()
    }

    /// Return the named terminal, creating a pipe terminal if absent.
    pub fn get_or_create(&self, name: &str) -> Arc<Terminal> {
        let mut map = self.terminals.lock();
        match map.get(name) {
            Some(existing) => Arc::clone(existing),
            None => {
                let term = Terminal::new(name, TerminalKind::Pipe, self.ring_size);
                map.insert(name.to_owned(), Arc::clone(&term));
                term
            }
        }
    }

    /// Replace any existing entry with a fresh terminal. The old buffer and
    /// writer set are discarded.
    pub fn create(&self, name: &str, kind: TerminalKind) -> Arc<Terminal> {
        let term = Terminal::new(name, kind, self.ring_size);
        let old = self.terminals.lock().insert(name.to_owned(), Arc::clone(&term));
        if let Some(old) = old {
            old.shutdown();
        }
        term
    }

    /// Replace any existing entry with a fresh terminal, carrying the old
    /// writer set over so connected viewers keep receiving. The old
    /// instance's pipeline is cancelled and its buffer discarded.
    pub fn recreate(&self, name: &str, kind: TerminalKind) -> Arc<Terminal> {
        let term = Terminal::new(name, kind, self.ring_size);
        let old = {
            let mut map = self.terminals.lock();
            let old = map.insert(name.to_owned(), Arc::clone(&term));
            if let Some(ref old) = old {
                term.adopt_writers(old.take_writers());
            }
            old
        };
        if let Some(old) = old {
            old.shutdown();
        }
        term
    }

    /// Remove a terminal immediately, cancelling its pipeline and killing
    /// any PTY child.
    pub fn remove(&self, name: &str) {
        let removed = self.terminals.lock().remove(name);
        if let Some(term) = removed {
            term.shutdown();
        }
    }

    /// Remove the named terminal after a delay, unless it has been
    /// recreated in the meantime (identity comparison).
    pub fn remove_after(self: &Arc<Self>, name: &str, delay: Duration) {
        let Some(target) = self.get(name) else { return };
        let manager = Arc::clone(self);
        let name = name.to_owned();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let removed = {
                let mut map = manager.terminals.lock();
                match map.get(&name) {
                    Some(current) if Arc::ptr_eq(current, &target) => map.remove(&name),
                    _ => None,
                }
            };
            if let Some(term) = removed {
                term.shutdown();
            }
        });
    }

    pub fn len(&self) -> usize {
        self.terminals.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.terminals.lock().is_empty()
    }

    /// Detach one subscriber from every terminal (connection close).
    pub fn remove_writer_everywhere(&self, subscriber_id: u64) {
        let terminals: Vec<_> = self.terminals.lock().values().cloned().collect();
        for term in terminals {
            term.remove_writer(subscriber_id);
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
