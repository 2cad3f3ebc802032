// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compose/docker actions that stream into a stack-scoped terminal.
//!
//! Each action recreates `compose--<stack>` (fresh buffer, carried-over
//! viewers), writes a shell-prompt header per step, runs the steps
//! sequentially, stamps `[Done]`/`[Error]`, leaves the terminal up for a
//! reconnect grace window, and triggers a debounced all-channel refresh.

use std::sync::Arc;
use std::time::Duration;

use crate::broadcast;
use crate::stack::Stack;
use crate::state::Core;
use crate::term::manager::REMOVE_GRACE;
use crate::term::{compose_terminal_name, TerminalKind};

/// Stack-wide operations (up/down/update) get the long deadline.
pub const STACK_TIMEOUT: Duration = Duration::from_secs(300);
/// Single-service operations finish faster or not at all.
pub const SERVICE_TIMEOUT: Duration = Duration::from_secs(120);

/// One unit of an action chain.
pub enum Step {
    /// `docker <args…>` in the stack directory, streaming into the terminal.
    Compose(Vec<String>),
    /// Remove dangling images through the daemon API.
    PruneImages,
}

/// Run an action chain on the stack terminal. A failing step stops the
/// chain; the error lands in the terminal, not in the caller's ack (actions
/// run in the background after an immediate ack).
pub async fn run_action(
    core: &Arc<Core>,
    stack: &Stack,
    steps: Vec<Step>,
    timeout: Duration,
) -> anyhow::Result<()> {
    let term_name = compose_terminal_name(&stack.name);
    let kind = if core.config.mock_compose { TerminalKind::Pipe } else { TerminalKind::Pty };
    let terminal = core.terminals.recreate(&term_name, kind);

    let mut outcome = Ok(());
    for step in steps {
        let result = match step {
            Step::Compose(args) => {
                terminal.write(format!("$ docker {}\r\n", args.join(" ")).as_bytes());
                if core.config.mock_compose {
                    mock_compose(core, stack, &args, &terminal).await
                } else {
                    run_real_step(core, stack, &args, &terminal, timeout).await
                }
            }
            Step::PruneImages => {
                terminal.write(b"$ docker image prune --force\r\n");
                core.docker.prune_images().await
            }
        };
        if let Err(e) = result {
            if core.shutdown.is_cancelled() {
                // Cancellation is the normal teardown signal; no [Error].
                outcome = Ok(());
            } else {
                terminal.write(format!("\r\n[Error] {e}\r\n").as_bytes());
                outcome = Err(e);
            }
            break;
        }
    }

    if outcome.is_ok() && !core.shutdown.is_cancelled() {
        terminal.write(b"\r\n[Done]\r\n");
    }

    core.terminals.remove_after(&term_name, REMOVE_GRACE);
    broadcast::trigger_all(core);
    outcome
}

async fn run_real_step(
    core: &Arc<Core>,
    stack: &Stack,
    args: &[String],
    terminal: &Arc<crate::term::Terminal>,
    timeout: Duration,
) -> anyhow::Result<()> {
    let mut command = vec!["docker".to_owned()];
    command.extend(args.iter().cloned());

    let run = terminal.run_pty(&command, Some(stack.dir.clone()), &[]);
    let status = tokio::select! {
        _ = core.shutdown.cancelled() => anyhow::bail!("cancelled"),
        result = tokio::time::timeout(timeout, run) => {
            result.map_err(|_| anyhow::anyhow!("timed out after {}s", timeout.as_secs()))??
        }
    };
    if !status.success() {
        anyhow::bail!("exit code {}", status.code.unwrap_or(-1));
    }
    Ok(())
}

// -- Step builders ------------------------------------------------------------

fn compose(stack: &Stack, core: &Arc<Core>, command: &str, extra: &[&str]) -> Step {
    Step::Compose(stack.compose_args(&core.config.stacks_dir, command, extra))
}

pub fn up_steps(core: &Arc<Core>, stack: &Stack) -> Vec<Step> {
    vec![compose(stack, core, "up", &["-d", "--remove-orphans"])]
}

/// Deploy validates the file first so a bad edit fails before touching
/// containers.
pub fn deploy_steps(core: &Arc<Core>, stack: &Stack) -> Vec<Step> {
    vec![
        compose(stack, core, "config", &["--quiet"]),
        compose(stack, core, "up", &["-d", "--remove-orphans"]),
    ]
}

pub fn stop_steps(core: &Arc<Core>, stack: &Stack) -> Vec<Step> {
    vec![compose(stack, core, "stop", &[])]
}

pub fn restart_steps(core: &Arc<Core>, stack: &Stack) -> Vec<Step> {
    vec![compose(stack, core, "restart", &[])]
}

pub fn down_steps(core: &Arc<Core>, stack: &Stack) -> Vec<Step> {
    vec![compose(stack, core, "down", &["--remove-orphans"])]
}

pub fn pause_steps(core: &Arc<Core>, stack: &Stack) -> Vec<Step> {
    vec![compose(stack, core, "pause", &[])]
}

pub fn resume_steps(core: &Arc<Core>, stack: &Stack) -> Vec<Step> {
    vec![compose(stack, core, "unpause", &[])]
}

/// Update: pull, recreate, then prune what the pull left dangling.
pub fn update_steps(core: &Arc<Core>, stack: &Stack) -> Vec<Step> {
    vec![
        compose(stack, core, "pull", &[]),
        compose(stack, core, "up", &["-d", "--remove-orphans"]),
        Step::PruneImages,
    ]
}

pub fn delete_steps(core: &Arc<Core>, stack: &Stack, volumes: bool) -> Vec<Step> {
    let extra: &[&str] =
        if volumes { &["-v", "--remove-orphans"] } else { &["--remove-orphans"] };
    vec![compose(stack, core, "down", extra)]
}

pub fn service_steps(core: &Arc<Core>, stack: &Stack, action: &str, service: &str) -> Vec<Step> {
    match action {
        "up" => vec![compose(stack, core, "up", &["-d", service])],
        other => vec![compose(stack, core, other, &[service])],
    }
}

pub fn update_service_steps(core: &Arc<Core>, stack: &Stack, service: &str) -> Vec<Step> {
    vec![
        compose(stack, core, "pull", &[service]),
        compose(stack, core, "up", &["-d", "--no-deps", service]),
    ]
}

// -- Mock composer ------------------------------------------------------------

/// In-process simulation of a compose run for hosts without Docker. Writes
/// plausible progress to the terminal and always succeeds.
async fn mock_compose(
    core: &Arc<Core>,
    stack: &Stack,
    args: &[String],
    terminal: &Arc<crate::term::Terminal>,
) -> anyhow::Result<()> {
    let mut subcommand = "up";
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "compose" => {}
            // --env-file carries a value that must not be read as the verb.
            "--env-file" => {
                let _ = iter.next();
            }
            flag if flag.starts_with("--") => {}
            verb => {
                subcommand = verb;
                break;
            }
        }
    }
    let services = stack.images();

    for (service, image) in &services {
        if core.shutdown.is_cancelled() {
            anyhow::bail!("cancelled");
        }
        let line = match subcommand {
            "pull" => format!(" \u{2714} {service} Pulled {image}\r\n"),
            "stop" => format!(" \u{2714} Container {}-{service}-1  Stopped\r\n", stack.name),
            "down" => format!(" \u{2714} Container {}-{service}-1  Removed\r\n", stack.name),
            "config" => continue,
            _ => format!(" \u{2714} Container {}-{service}-1  Started\r\n", stack.name),
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        terminal.write(line.as_bytes());
    }
    Ok(())
}

#[cfg(test)]
#[path = "actions_tests.rs"]
mod tests;
