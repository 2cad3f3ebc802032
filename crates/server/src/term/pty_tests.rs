// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serial_test::serial;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_owned()).collect()
}

#[tokio::test]
#[serial]
async fn echo_output_and_exit_code() -> anyhow::Result<()> {
    let pty = PtyProcess::spawn(&argv(&["echo", "pty-marker"]), None, &[], 80, 24)?;
    let (_input_tx, input_rx) = mpsc::channel(4);

    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&collected);
    let status = pty
        .run(input_rx, move |chunk| {
            if let Ok(mut buf) = sink.lock() {
                buf.extend_from_slice(chunk);
            }
        })
        .await?;

    assert!(status.success());
    let output = collected.lock().map_err(|_| anyhow::anyhow!("poisoned"))?.clone();
    assert!(String::from_utf8_lossy(&output).contains("pty-marker"));
    Ok(())
}

#[tokio::test]
#[serial]
async fn input_reaches_child() -> anyhow::Result<()> {
    let pty = PtyProcess::spawn(&argv(&["cat"]), None, &[], 80, 24)?;
    let pid = pty.pid();
    let (input_tx, input_rx) = mpsc::channel(4);

    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&collected);
    let run = tokio::spawn(async move {
        pty.run(input_rx, move |chunk| {
            if let Ok(mut buf) = sink.lock() {
                buf.extend_from_slice(chunk);
            }
        })
        .await
    });

    input_tx.send(bytes::Bytes::from("hello-pty\n")).await?;

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        {
            let buf = collected.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
            if String::from_utf8_lossy(&buf).contains("hello-pty") {
                break;
            }
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("echo never arrived");
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    tokio::task::spawn_blocking(move || terminate(pid)).await?;
    let _ = run.await;
    Ok(())
}

#[tokio::test]
#[serial]
async fn nonzero_exit_is_reported() -> anyhow::Result<()> {
    let pty = PtyProcess::spawn(&argv(&["sh", "-c", "exit 3"]), None, &[], 80, 24)?;
    let (_input_tx, input_rx) = mpsc::channel(1);
    let status = pty.run(input_rx, |_| {}).await?;
    assert_eq!(status.code, Some(3));
    assert!(!status.success());
    Ok(())
}

#[tokio::test]
#[serial]
async fn cwd_applies_to_child() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let pty = PtyProcess::spawn(&argv(&["pwd"]), Some(dir.path()), &[], 80, 24)?;
    let (_input_tx, input_rx) = mpsc::channel(1);

    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&collected);
    pty.run(input_rx, move |chunk| {
        if let Ok(mut buf) = sink.lock() {
            buf.extend_from_slice(chunk);
        }
    })
    .await?;

    let output = collected.lock().map_err(|_| anyhow::anyhow!("poisoned"))?.clone();
    let printed = String::from_utf8_lossy(&output);
    let expected = dir.path().canonicalize()?;
    assert!(printed.contains(&expected.to_string_lossy().into_owned()));
    Ok(())
}

#[test]
#[serial]
fn empty_command_rejected() {
    assert!(PtyProcess::spawn(&[], None, &[], 80, 24).is_err());
}

#[tokio::test]
#[serial]
async fn resize_succeeds() -> anyhow::Result<()> {
    let pty = PtyProcess::spawn(&argv(&["sleep", "1"]), None, &[], 80, 24)?;
    pty.resize(120, 40)?;
    terminate(pty.pid());
    Ok(())
}
