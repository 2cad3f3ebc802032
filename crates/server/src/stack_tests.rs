// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

const COMPOSE: &str = "services:\n  nginx:\n    image: nginx:latest\n";

#[parameterized(
    simple = { "web", true },
    with_dash = { "my-stack_2", true },
    empty = { "", false },
    uppercase = { "Web", false },
    traversal = { "../etc", false },
    leading_dash = { "-web", false },
)]
fn name_validation(name: &str, ok: bool) {
    assert_eq!(validate_name(name).is_ok(), ok);
}

#[tokio::test]
async fn save_and_load_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let stack = Stack::from_parts(dir.path(), "web", COMPOSE, "PORT=8080\n", "");
    stack.save(true).await?;

    let loaded = Stack::load(dir.path(), "web").await?;
    assert_eq!(loaded.compose_yaml, COMPOSE);
    assert_eq!(loaded.env, "PORT=8080\n");
    assert_eq!(loaded.override_yaml, "");
    assert_eq!(loaded.images().get("nginx").map(String::as_str), Some("nginx:latest"));
    Ok(())
}

#[tokio::test]
async fn add_twice_is_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let stack = Stack::from_parts(dir.path(), "web", COMPOSE, "", "");
    stack.save(true).await?;
    assert!(stack.save(true).await.is_err());
    // A plain save of the existing stack is fine.
    stack.save(false).await?;
    Ok(())
}

#[tokio::test]
async fn save_rejects_invalid_yaml() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let stack = Stack::from_parts(dir.path(), "web", "services: [oops", "", "");
    assert!(stack.save(true).await.is_err());
    Ok(())
}

#[tokio::test]
async fn clearing_env_removes_the_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut stack = Stack::from_parts(dir.path(), "web", COMPOSE, "A=1\n", "");
    stack.save(true).await?;
    assert!(dir.path().join("web/.env").exists());

    stack.env.clear();
    stack.save(false).await?;
    assert!(!dir.path().join("web/.env").exists());
    Ok(())
}

#[tokio::test]
async fn load_probes_both_compose_names() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    tokio::fs::create_dir(dir.path().join("legacy")).await?;
    tokio::fs::write(dir.path().join("legacy/compose.yml"), COMPOSE).await?;

    let loaded = Stack::load(dir.path(), "legacy").await?;
    assert_eq!(loaded.compose_file_name, "compose.yml");
    Ok(())
}

#[tokio::test]
async fn save_keeps_existing_compose_name() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    tokio::fs::create_dir(dir.path().join("legacy")).await?;
    tokio::fs::write(dir.path().join("legacy/compose.yml"), COMPOSE).await?;

    let mut stack = Stack::load(dir.path(), "legacy").await?;
    stack.compose_yaml = "services:\n  redis:\n    image: redis:7\n".to_owned();
    stack.save(false).await?;

    assert!(dir.path().join("legacy/compose.yml").exists());
    assert!(!dir.path().join("legacy/compose.yaml").exists());
    Ok(())
}

#[tokio::test]
async fn scan_sorted_skips_non_stacks() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    for name in ["zeta", "alpha"] {
        tokio::fs::create_dir(dir.path().join(name)).await?;
        tokio::fs::write(dir.path().join(name).join("compose.yaml"), COMPOSE).await?;
    }
    tokio::fs::create_dir(dir.path().join("not-a-stack")).await?;
    tokio::fs::write(dir.path().join("stray-file"), "x").await?;

    let found = scan(dir.path()).await;
    let names: Vec<_> = found.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["alpha", "zeta"]);
    Ok(())
}

#[tokio::test]
async fn scan_missing_dir_is_empty() {
    let found = scan(std::path::Path::new("/nonexistent/stacks")).await;
    assert!(found.is_empty());
}

#[tokio::test]
async fn compose_args_with_global_env() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let stack = Stack::from_parts(dir.path(), "web", COMPOSE, "A=1\n", "");
    stack.save(true).await?;

    // Placeholder content: treated as absent.
    tokio::fs::write(dir.path().join(GLOBAL_ENV_FILE), GLOBAL_ENV_PLACEHOLDER).await?;
    let args = stack.compose_args(dir.path(), "up", &["-d", "--remove-orphans"]);
    assert_eq!(args, vec!["compose", "up", "-d", "--remove-orphans"]);

    // Real content: spliced in front, stack .env restored.
    tokio::fs::write(dir.path().join(GLOBAL_ENV_FILE), "TZ=UTC\n").await?;
    let args = stack.compose_args(dir.path(), "up", &["-d"]);
    assert_eq!(args[0], "compose");
    assert_eq!(args[1], "--env-file");
    assert!(args[2].ends_with(GLOBAL_ENV_FILE));
    assert_eq!(args[3], "--env-file");
    assert_eq!(args[4], ".env");
    assert_eq!(&args[5..], ["up", "-d"]);
    Ok(())
}
