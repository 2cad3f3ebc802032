// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal join/input/resize, interactive shells, and container logs.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::check_login;
use crate::error::{err_ack, ok_ack, AckError};
use crate::logs;
use crate::socket::{Args, Connection};
use crate::state::Core;
use crate::term::manager::REMOVE_GRACE;
use crate::term::pty::default_shell;
use crate::term::{
    combined_stack_name, container_log_terminal_name, exec_terminal_name, Terminal, TerminalKind,
    MAIN_TERMINAL_NAME,
};

/// Atomic join: subscribe the connection and return the buffer snapshot.
fn join(conn: &Arc<Connection>, terminal: &Arc<Terminal>) -> Value {
    let writer = conn.terminal_writer(terminal.name());
    let buffer = terminal.join_and_snapshot(conn.id(), writer);
    json!({ "ok": true, "buffer": String::from_utf8_lossy(&buffer) })
}

pub async fn terminal_join(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let Some(name) = args.str_any(0, "terminalName") else {
        return AckError::InvalidArguments.to_ack();
    };

    // Combined-log terminals start lazily on the first join.
    if let Some(stack) = combined_stack_name(name) {
        let terminal = match core.terminals.get(name) {
            Some(existing) => existing,
            None => {
                let terminal = core.terminals.create(name, TerminalKind::Combined);
                logs::spawn_pipeline(&core, stack, &terminal);
                terminal
            }
        };
        return join(&conn, &terminal);
    }

    let terminal = core.terminals.get_or_create(name);
    join(&conn, &terminal)
}

pub async fn terminal_input(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let (Some(name), Some(input)) = (args.str_at(0), args.str_at(1)) else {
        return AckError::InvalidArguments.to_ack();
    };
    let Some(terminal) = core.terminals.get(name) else {
        return AckError::TerminalNotFound.to_ack();
    };
    terminal.input(Bytes::from(input.as_bytes().to_vec()));
    ok_ack()
}

pub async fn terminal_resize(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let Some(name) = args.str_at(0) else {
        return AckError::InvalidArguments.to_ack();
    };
    let (Some(rows), Some(cols)) = (args.u64_at(1), args.u64_at(2)) else {
        return AckError::InvalidArguments.to_ack();
    };
    let Some(terminal) = core.terminals.get(name) else {
        return AckError::TerminalNotFound.to_ack();
    };
    terminal.resize(rows as u16, cols as u16);
    ok_ack()
}

/// Start (or reuse) a PTY shell terminal and join it. On child exit the
/// terminal lingers for the reconnect grace window, then goes away.
fn shell_terminal(
    core: &Arc<Core>,
    conn: &Arc<Connection>,
    name: &str,
    command: Vec<String>,
    cwd: Option<std::path::PathBuf>,
) -> Value {
    if let Some(existing) = core.terminals.get(name) {
        if existing.is_running() {
            return join(conn, &existing);
        }
    }

    let terminal = core.terminals.recreate(name, TerminalKind::Pty);
    let manager = Arc::clone(&core.terminals);
    let term_name = name.to_owned();
    terminal.set_exit_callback(Box::new(move |_status| {
        manager.remove_after(&term_name, REMOVE_GRACE);
    }));

    match terminal.start_pty(&command, cwd, &[]) {
        Ok(_handle) => join(conn, &terminal),
        Err(e) => {
            tracing::warn!(terminal = name, err = %e, "failed to start PTY");
            core.terminals.remove(name);
            err_ack(e)
        }
    }
}

pub async fn main_terminal(core: Arc<Core>, conn: Arc<Connection>, _args: Args) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let shell = default_shell().to_string_lossy().into_owned();
    shell_terminal(
        &core,
        &conn,
        MAIN_TERMINAL_NAME,
        vec![shell],
        Some(core.config.stacks_dir.clone()),
    )
}

pub async fn interactive_terminal(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let Some(stack) = args.str_any(0, "stackName") else {
        return AckError::InvalidArguments.to_ack();
    };
    if crate::stack::validate_name(stack).is_err() {
        return err_ack("Invalid stack name");
    }
    let shell = default_shell().to_string_lossy().into_owned();
    let cwd = core.config.stacks_dir.join(stack);
    shell_terminal(&core, &conn, &format!("shell--{stack}"), vec![shell], Some(cwd))
}

pub async fn container_exec(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let Some(container) = args.str_at(0) else {
        return AckError::InvalidArguments.to_ack();
    };
    let shell = args.str_at(1).unwrap_or("sh").to_owned();
    let command = vec![
        "docker".to_owned(),
        "exec".to_owned(),
        "-it".to_owned(),
        container.to_owned(),
        shell,
    ];
    shell_terminal(&core, &conn, &exec_terminal_name(container), command, None)
}

/// Stream one container's logs into a dedicated pipe terminal. The stream
/// task owns a cancel token stored on the terminal; when the stream ends
/// the terminal is scheduled away.
fn start_log_terminal(core: &Arc<Core>, container: &str) -> Arc<Terminal> {
    let name = container_log_terminal_name(container);
    let terminal = core.terminals.recreate(&name, TerminalKind::Pipe);
    let token = CancellationToken::new();
    terminal.set_cancel(token.clone());

    let docker = Arc::clone(&core.docker);
    let manager = Arc::clone(&core.terminals);
    let container = container.to_owned();
    let sink = Arc::clone(&terminal);
    tokio::spawn(async move {
        let mut stream = docker.follow_logs(&container, Some(100));
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                item = stream.next() => match item {
                    Some(Ok(chunk)) => sink.write(&chunk),
                    Some(Err(e)) => {
                        tracing::debug!(container, err = %e, "container log stream error");
                        break;
                    }
                    None => break,
                }
            }
        }
        manager.remove_after(sink.name(), REMOVE_GRACE);
    });
    terminal
}

pub async fn join_container_log_by_name(
    core: Arc<Core>,
    conn: Arc<Connection>,
    args: Args,
) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let Some(container) = args.str_any(0, "containerName") else {
        return AckError::InvalidArguments.to_ack();
    };
    let terminal = start_log_terminal(&core, container);
    join(&conn, &terminal)
}

pub async fn join_container_log(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let (Some(stack), Some(service)) = (args.str_at(0), args.str_at(1)) else {
        return AckError::InvalidArguments.to_ack();
    };

    let containers = core.docker.list_containers(Some(stack)).await.unwrap_or_default();
    let Some(container) = containers.iter().find(|c| c.service_name() == service) else {
        return err_ack(format!("No container found for {stack}/{service}"));
    };
    let terminal = start_log_terminal(&core, &container.name);
    join(&conn, &terminal)
}

pub async fn leave_combined_terminal(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let Some(stack) = args.str_any(0, "stackName") else {
        return AckError::InvalidArguments.to_ack();
    };
    let name = crate::term::combined_terminal_name(stack);
    if let Some(terminal) = core.terminals.get(&name) {
        if terminal.remove_writer(conn.id()) == 0 {
            // Last viewer gone: tear the pipeline down with the terminal.
            core.terminals.remove(&name);
        }
    }
    ok_ack()
}
