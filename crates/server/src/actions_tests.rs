// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::state::test_support::test_core;
use crate::term::WriteFn;
use parking_lot::Mutex as PlMutex;

const COMPOSE: &str = "services:\n  nginx:\n    image: nginx:latest\n";

fn collector() -> (WriteFn, Arc<PlMutex<Vec<u8>>>) {
    let sink = Arc::new(PlMutex::new(Vec::new()));
    let clone = Arc::clone(&sink);
    let writer: WriteFn = Arc::new(move |bytes: &[u8]| clone.lock().extend_from_slice(bytes));
    (writer, sink)
}

#[tokio::test]
async fn mock_up_writes_header_progress_and_done() -> anyhow::Result<()> {
    let fixture = test_core().await?;
    fixture.write_stack("web", COMPOSE).await?;
    let stack = Stack::load(fixture.stacks_dir(), "web").await?;

    // Subscribe before the action: recreate must carry this viewer over.
    let existing = fixture.core.terminals.get_or_create(&compose_terminal_name("web"));
    let (writer, sink) = collector();
    existing.add_writer(1, writer);

    run_action(&fixture.core, &stack, up_steps(&fixture.core, &stack), STACK_TIMEOUT).await?;

    let seen = String::from_utf8_lossy(&sink.lock()).into_owned();
    assert!(seen.contains("$ docker compose up -d --remove-orphans\r\n"));
    assert!(seen.contains("Container web-nginx-1  Started"));
    assert!(seen.ends_with("\r\n[Done]\r\n"));
    Ok(())
}

#[tokio::test]
async fn action_terminal_lingers_for_grace_window() -> anyhow::Result<()> {
    let fixture = test_core().await?;
    fixture.write_stack("web", COMPOSE).await?;
    let stack = Stack::load(fixture.stacks_dir(), "web").await?;

    run_action(&fixture.core, &stack, stop_steps(&fixture.core, &stack), STACK_TIMEOUT).await?;

    // The grace timer is 30s; immediately after the action the terminal is
    // joinable and replays the buffer.
    let term = fixture.core.terminals.get(&compose_terminal_name("web"))
        .ok_or_else(|| anyhow::anyhow!("terminal removed too early"))?;
    let snapshot = term.join_and_snapshot(9, Arc::new(|_: &[u8]| {}));
    assert!(String::from_utf8_lossy(&snapshot).contains("[Done]"));
    Ok(())
}

#[tokio::test]
async fn update_chain_prunes_after_up() -> anyhow::Result<()> {
    let fixture = test_core().await?;
    fixture.write_stack("web", COMPOSE).await?;
    let stack = Stack::load(fixture.stacks_dir(), "web").await?;

    run_action(&fixture.core, &stack, update_steps(&fixture.core, &stack), STACK_TIMEOUT).await?;

    assert_eq!(fixture.docker.prune_calls.load(std::sync::atomic::Ordering::Relaxed), 1);
    let term = fixture.core.terminals.get(&compose_terminal_name("web"))
        .ok_or_else(|| anyhow::anyhow!("terminal missing"))?;
    let text = String::from_utf8_lossy(&term.join_and_snapshot(9, Arc::new(|_: &[u8]| {})))
        .into_owned();
    assert!(text.contains("$ docker compose pull"));
    assert!(text.contains("$ docker compose up -d --remove-orphans"));
    assert!(text.contains("$ docker image prune --force"));
    Ok(())
}

#[tokio::test]
async fn failing_step_stops_chain_and_writes_error() -> anyhow::Result<()> {
    let fixture = test_core().await?;
    fixture.write_stack("web", COMPOSE).await?;
    let stack = Stack::load(fixture.stacks_dir(), "web").await?;

    // Daemon outage makes the prune step fail before the second compose
    // step would run.
    fixture.docker.fail_queries.store(true, std::sync::atomic::Ordering::Relaxed);
    let steps = vec![
        Step::PruneImages,
        Step::Compose(vec!["compose".to_owned(), "up".to_owned()]),
    ];
    let result = run_action(&fixture.core, &stack, steps, STACK_TIMEOUT).await;
    assert!(result.is_err());

    let term = fixture.core.terminals.get(&compose_terminal_name("web"))
        .ok_or_else(|| anyhow::anyhow!("terminal missing"))?;
    let text = String::from_utf8_lossy(&term.join_and_snapshot(9, Arc::new(|_: &[u8]| {})))
        .into_owned();
    assert!(text.contains("[Error] "));
    assert!(!text.contains("[Done]"));
    assert!(!text.contains("$ docker compose up"), "chain must stop at the failed step");
    Ok(())
}

#[tokio::test]
async fn step_builders_shape_argv() -> anyhow::Result<()> {
    let fixture = test_core().await?;
    fixture.write_stack("web", COMPOSE).await?;
    let stack = Stack::load(fixture.stacks_dir(), "web").await?;

    let steps = service_steps(&fixture.core, &stack, "up", "nginx");
    match &steps[0] {
        Step::Compose(args) => assert_eq!(args, &["compose", "up", "-d", "nginx"]),
        Step::PruneImages => anyhow::bail!("unexpected prune"),
    }

    let steps = update_service_steps(&fixture.core, &stack, "nginx");
    match &steps[1] {
        Step::Compose(args) => {
            assert_eq!(args, &["compose", "up", "-d", "--no-deps", "nginx"]);
        }
        Step::PruneImages => anyhow::bail!("unexpected prune"),
    }

    let steps = delete_steps(&fixture.core, &stack, true);
    match &steps[0] {
        Step::Compose(args) => assert_eq!(args, &["compose", "down", "-v", "--remove-orphans"]),
        Step::PruneImages => anyhow::bail!("unexpected prune"),
    }
    Ok(())
}
