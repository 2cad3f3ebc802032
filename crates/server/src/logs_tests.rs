// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::docker::mock::container;
use crate::docker::{DockerEvent, LABEL_PROJECT, LABEL_SERVICE};
use crate::state::test_support::test_core;
use crate::term::{combined_terminal_name, TerminalKind};
use bytes::Bytes;
use chrono::TimeZone;
use std::collections::HashMap;

async fn snapshot_contains(terminal: &Arc<Terminal>, needle: &str) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let snapshot = terminal.join_and_snapshot(0, Arc::new(|_: &[u8]| {}));
        terminal.remove_writer(0);
        if String::from_utf8_lossy(&snapshot).contains(needle) {
            return true;
        }
        if tokio::time::Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn history_is_prefixed_and_padded() -> anyhow::Result<()> {
    let fixture = test_core().await?;
    let mut web = container("web", "nginx", "running");
    web.id = "c-nginx".to_owned();
    let mut db = container("web", "db", "running");
    db.id = "c-db".to_owned();
    fixture.docker.containers.lock().extend([web, db]);
    fixture.docker.logs.lock().insert("c-nginx".to_owned(), vec![Bytes::from("ready\n")]);
    fixture.docker.logs.lock().insert("c-db".to_owned(), vec![Bytes::from("listening\r\n")]);

    let terminal = Terminal::new(&combined_terminal_name("web"), TerminalKind::Combined, 65536);
    spawn_pipeline(&fixture.core, "web", &terminal);

    // "db" pads to the width of "nginx"; carriage returns are stripped.
    assert!(snapshot_contains(&terminal, "nginx |\u{1b}[0m ready\n").await);
    assert!(snapshot_contains(&terminal, "db    |\u{1b}[0m listening\n").await);
    Ok(())
}

#[tokio::test]
async fn restart_emits_one_banner_without_new_reader() -> anyhow::Result<()> {
    let fixture = test_core().await?;
    let mut web = container("web", "nginx", "running");
    web.id = "c-nginx".to_owned();
    fixture.docker.containers.lock().push(web);
    fixture.docker.logs.lock().insert("c-nginx".to_owned(), vec![Bytes::from("booted\n")]);
    let started = chrono::Utc.with_ymd_and_hms(2025, 1, 15, 10, 42, 3).single()
        .ok_or_else(|| anyhow::anyhow!("bad timestamp"))?;
    fixture.docker.started.lock().insert("c-nginx".to_owned(), started);

    let terminal = Terminal::new(&combined_terminal_name("web"), TerminalKind::Combined, 65536);
    spawn_pipeline(&fixture.core, "web", &terminal);
    assert!(snapshot_contains(&terminal, "booted").await);

    fixture.docker.push_event(DockerEvent {
        kind: EventKind::Container,
        action: "start".to_owned(),
        actor_id: "c-nginx".to_owned(),
        attributes: HashMap::from([
            (LABEL_PROJECT.to_owned(), "web".to_owned()),
            (LABEL_SERVICE.to_owned(), "nginx".to_owned()),
        ]),
    });

    assert!(
        snapshot_contains(
            &terminal,
            "\u{1b}[1;45m \u{25B6} CONTAINER START \u{2014} nginx (10:42:03) \u{1b}[0m"
        )
        .await
    );

    // Same container id: the original reader keeps following, so the
    // history line must not be replayed a second time.
    let snapshot = terminal.join_and_snapshot(0, Arc::new(|_: &[u8]| {}));
    let text = String::from_utf8_lossy(&snapshot).into_owned();
    assert_eq!(text.matches("booted").count(), 1);
    Ok(())
}

#[tokio::test]
async fn foreign_project_events_are_ignored() -> anyhow::Result<()> {
    let fixture = test_core().await?;
    let terminal = Terminal::new(&combined_terminal_name("web"), TerminalKind::Combined, 65536);
    spawn_pipeline(&fixture.core, "web", &terminal);
    tokio::time::sleep(Duration::from_millis(50)).await;

    fixture.docker.push_event(DockerEvent {
        kind: EventKind::Container,
        action: "start".to_owned(),
        actor_id: "other".to_owned(),
        attributes: HashMap::from([(LABEL_PROJECT.to_owned(), "db".to_owned())]),
    });
    tokio::time::sleep(Duration::from_millis(150)).await;

    let snapshot = terminal.join_and_snapshot(0, Arc::new(|_: &[u8]| {}));
    assert!(snapshot.is_empty());
    Ok(())
}

#[tokio::test]
async fn empty_stack_emits_nothing() -> anyhow::Result<()> {
    let fixture = test_core().await?;
    let terminal = Terminal::new(&combined_terminal_name("ghost"), TerminalKind::Combined, 65536);
    let token = spawn_pipeline(&fixture.core, "ghost", &terminal);
    tokio::time::sleep(Duration::from_millis(150)).await;

    let snapshot = terminal.join_and_snapshot(0, Arc::new(|_: &[u8]| {}));
    assert!(snapshot.is_empty());
    token.cancel();
    Ok(())
}

#[tokio::test]
async fn cancel_stops_the_pipeline() -> anyhow::Result<()> {
    let fixture = test_core().await?;
    let mut web = container("web", "nginx", "running");
    web.id = "c1".to_owned();
    fixture.docker.containers.lock().push(web);
    fixture.docker.logs.lock().insert("c1".to_owned(), vec![Bytes::from("line\n")]);

    let terminal = Terminal::new(&combined_terminal_name("web"), TerminalKind::Combined, 65536);
    spawn_pipeline(&fixture.core, "web", &terminal);
    assert!(snapshot_contains(&terminal, "line").await);

    // The terminal owns the token; cancel through it as `remove` would.
    terminal.cancel_pipeline();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let before = terminal.join_and_snapshot(0, Arc::new(|_: &[u8]| {})).len();
    fixture.docker.push_event(DockerEvent {
        kind: EventKind::Container,
        action: "start".to_owned(),
        actor_id: "c1".to_owned(),
        attributes: HashMap::from([
            (LABEL_PROJECT.to_owned(), "web".to_owned()),
            (LABEL_SERVICE.to_owned(), "nginx".to_owned()),
        ]),
    });
    tokio::time::sleep(Duration::from_millis(150)).await;
    let after = terminal.join_and_snapshot(1, Arc::new(|_: &[u8]| {})).len();
    assert_eq!(before, after);
    Ok(())
}
