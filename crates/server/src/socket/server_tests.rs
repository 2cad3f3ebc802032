// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::handlers;
use crate::socket::conn::Outbound;
use crate::state::test_support::test_core;
use tokio::sync::mpsc::Receiver;

fn make_conn(id: u64) -> (Arc<Connection>, Receiver<Outbound>, CancellationToken) {
    let (out_tx, out_rx) = mpsc::channel(64);
    let closed = CancellationToken::new();
    (Connection::new(id, out_tx, closed.clone()), out_rx, closed)
}

async fn next_json(rx: &mut Receiver<Outbound>) -> anyhow::Result<Value> {
    let frame = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
        .await
        .map_err(|_| anyhow::anyhow!("no frame"))?
        .ok_or_else(|| anyhow::anyhow!("queue closed"))?;
    Ok(serde_json::from_str(&frame.into_text())?)
}

fn frame(id: Option<u64>, event: &str, args: Value) -> ClientFrame {
    ClientFrame { id, event: event.to_owned(), args }
}

#[tokio::test]
async fn unknown_event_acks_an_error() -> anyhow::Result<()> {
    let fixture = test_core().await?;
    let (conn, mut rx, _closed) = make_conn(1);

    let f = frame(Some(9), "noSuchEvent", Value::Null);
    fixture.core.socket.dispatch(Arc::clone(&fixture.core), conn, f).await;

    let ack = next_json(&mut rx).await?;
    assert_eq!(ack["id"], 9);
    assert_eq!(ack["result"]["ok"], false);
    Ok(())
}

#[tokio::test]
async fn handler_result_is_acked() -> anyhow::Result<()> {
    let fixture = test_core().await?;
    fixture.core.socket.handle("echoFirst", Arc::new(|_core, _conn, args| {
        Box::pin(async move {
            serde_json::json!({ "ok": true, "first": args.str_at(0) })
        })
    }));

    let (conn, mut rx, _closed) = make_conn(1);
    let f = frame(Some(1), "echoFirst", serde_json::json!(["hello"]));
    fixture.core.socket.dispatch(Arc::clone(&fixture.core), conn, f).await;

    let ack = next_json(&mut rx).await?;
    assert_eq!(ack["result"]["first"], "hello");
    Ok(())
}

#[tokio::test]
async fn frames_without_id_get_no_ack() -> anyhow::Result<()> {
    let fixture = test_core().await?;
    handlers::register_all(&fixture.core.socket);
    let (conn, mut rx, _closed) = make_conn(1);
    conn.set_user(NO_AUTH_USER);

    // requestStackList pushes the event but there is no ack without an id.
    let f = frame(None, "requestStackList", Value::Null);
    fixture.core.socket.dispatch(Arc::clone(&fixture.core), conn, f).await;

    let pushed = next_json(&mut rx).await?;
    assert_eq!(pushed["event"], "stacks");
    assert!(rx.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn broadcast_reaches_only_authenticated() -> anyhow::Result<()> {
    let fixture = test_core().await?;
    let (authed, mut authed_rx, _c1) = make_conn(1);
    let (anon, mut anon_rx, _c2) = make_conn(2);
    authed.set_user(NO_AUTH_USER);
    fixture.core.socket.mark_authenticated(&authed);
    drop(anon);

    assert!(fixture.core.socket.has_authenticated_conns());
    fixture.core.socket.broadcast_authenticated("refresh", &Value::Null);

    let seen = next_json(&mut authed_rx).await?;
    assert_eq!(seen["event"], "refresh");
    assert!(anon_rx.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn disconnect_others_spares_the_caller() -> anyhow::Result<()> {
    let fixture = test_core().await?;
    let (first, _rx1, closed_first) = make_conn(1);
    let (second, _rx2, closed_second) = make_conn(2);
    first.set_user(7);
    second.set_user(7);
    fixture.core.socket.mark_authenticated(&first);
    fixture.core.socket.mark_authenticated(&second);

    fixture.core.socket.disconnect_others(&first);
    assert!(!closed_first.is_cancelled());
    assert!(closed_second.is_cancelled());
    Ok(())
}

#[tokio::test]
async fn agent_envelope_unwraps_local_events() -> anyhow::Result<()> {
    let fixture = test_core().await?;
    handlers::register_all(&fixture.core.socket);
    let (conn, mut rx, _closed) = make_conn(1);
    conn.set_user(NO_AUTH_USER);

    let f = frame(Some(2), "agent", serde_json::json!(["", "requestStackList"]));
    fixture.core.socket.dispatch(Arc::clone(&fixture.core), conn, f).await;

    let pushed = next_json(&mut rx).await?;
    assert_eq!(pushed["event"], "stacks");
    let ack = next_json(&mut rx).await?;
    assert_eq!(ack["id"], 2);
    assert_eq!(ack["result"]["ok"], true);
    Ok(())
}

#[tokio::test]
async fn agent_envelope_rejects_remote_endpoints() -> anyhow::Result<()> {
    let fixture = test_core().await?;
    handlers::register_all(&fixture.core.socket);
    let (conn, mut rx, _closed) = make_conn(1);
    conn.set_user(NO_AUTH_USER);

    let f = frame(Some(3), "agent", serde_json::json!(["other:5001", "startStack", "web"]));
    fixture.core.socket.dispatch(Arc::clone(&fixture.core), conn, f).await;

    let ack = next_json(&mut rx).await?;
    assert_eq!(ack["result"]["ok"], false);
    assert_eq!(ack["result"]["msg"], "Remote agents are not supported");
    Ok(())
}

#[tokio::test]
async fn agent_envelope_rejects_nesting() -> anyhow::Result<()> {
    let fixture = test_core().await?;
    handlers::register_all(&fixture.core.socket);
    let (conn, mut rx, _closed) = make_conn(1);
    conn.set_user(NO_AUTH_USER);

    let f = frame(Some(4), "agent", serde_json::json!(["", "agent", "", "startStack"]));
    fixture.core.socket.dispatch(Arc::clone(&fixture.core), conn, f).await;

    let ack = next_json(&mut rx).await?;
    assert_eq!(ack["result"]["ok"], false);
    assert_eq!(ack["result"]["msg"], "Nested agent events are not allowed");
    Ok(())
}
