// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stack CRUD, compose actions, per-service actions, and update checks.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::check_login;
use crate::actions::{self, Step, SERVICE_TIMEOUT, STACK_TIMEOUT};
use crate::broadcast::{self, Channel};
use crate::error::{err_ack, ok_ack, ok_i18n, AckError};
use crate::socket::{Args, Connection};
use crate::stack::Stack;
use crate::state::Core;
use crate::updates;

/// The stack name argument: positional, named, or a bare string.
fn stack_name(args: &Args) -> Option<&str> {
    args.str_any(0, "stackName").filter(|s| !s.is_empty())
}

async fn load_stack(core: &Arc<Core>, name: &str) -> Result<Stack, Value> {
    Stack::load(&core.config.stacks_dir, name).await.map_err(|e| err_ack(e))
}

pub async fn request_stack_list(core: Arc<Core>, conn: Arc<Connection>, _args: Args) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let data = broadcast::build_stacks(&core).await;
    conn.send_event(Channel::Stacks.as_str(), &data);
    ok_i18n("Updated")
}

pub async fn get_stack(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let Some(name) = stack_name(&args) else {
        return err_ack("Stack name is required");
    };
    let loaded = match load_stack(&core, name).await {
        Ok(stack) => stack,
        Err(ack) => return ack,
    };

    let containers = core.docker.list_containers(Some(name)).await.unwrap_or_default();
    let (status_list, recreate_status) = service_views(&loaded, &containers);
    let updates = stack_update_status(&core, name).await;

    let mut images = Map::new();
    for (service, image) in loaded.images() {
        images.insert(service, Value::String(image));
    }

    json!({
        "ok": true,
        "stack": {
            "name": loaded.name,
            "composeFileName": loaded.compose_file_name,
            "composeYAML": loaded.compose_yaml,
            "composeENV": loaded.env,
            "composeOverrideYAML": loaded.override_yaml,
            "isManagedByDockge": true,
            "images": images,
            "serviceStatusList": status_list,
            "serviceRecreateStatus": recreate_status,
            "serviceUpdateStatus": updates,
        }
    })
}

fn parse_save_args(args: &Args) -> Option<(String, String, String, String, bool)> {
    let name = args.str_at(0)?.to_owned();
    let compose_yaml = args.str_at(1).unwrap_or_default().to_owned();
    let env = args.str_at(2).unwrap_or_default().to_owned();
    let override_yaml = args.str_at(3).unwrap_or_default().to_owned();
    let is_add = args.bool_any(4, "isAdd").unwrap_or(false);
    Some((name, compose_yaml, env, override_yaml, is_add))
}

async fn write_stack_files(core: &Arc<Core>, args: &Args) -> Result<Stack, Value> {
    let Some((name, compose_yaml, env, override_yaml, is_add)) = parse_save_args(args) else {
        return Err(AckError::InvalidArguments.to_ack());
    };
    let stack =
        Stack::from_parts(&core.config.stacks_dir, &name, &compose_yaml, &env, &override_yaml);
    stack.save(is_add).await.map_err(|e| err_ack(e))?;

    // Saving may flip per-service `imageupdates.check` labels: re-sweep so
    // stale records are purged and fresh ones appear.
    let core = Arc::clone(core);
    let name = stack.name.clone();
    tokio::spawn(async move {
        updates::sweep_stack(&core, &name).await;
        broadcast::trigger(&core, Channel::Updates);
        broadcast::trigger(&core, Channel::Stacks);
    });
    Ok(stack)
}

pub async fn save_stack(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    match write_stack_files(&core, &args).await {
        Ok(_) => ok_i18n("Saved"),
        Err(ack) => ack,
    }
}

pub async fn deploy_stack(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let stack = match write_stack_files(&core, &args).await {
        Ok(stack) => stack,
        Err(ack) => return ack,
    };
    let steps = actions::deploy_steps(&core, &stack);
    spawn_action(&core, stack, steps, STACK_TIMEOUT);
    ok_i18n("Deployed")
}

fn spawn_action(
    core: &Arc<Core>,
    stack: Stack,
    steps: Vec<Step>,
    timeout: std::time::Duration,
) {
    let core = Arc::clone(core);
    tokio::spawn(async move {
        if let Err(e) = actions::run_action(&core, &stack, steps, timeout).await {
            tracing::warn!(stack = %stack.name, err = %e, "compose action failed");
        }
    });
}

pub async fn start_stack(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    run_stack_action(core, conn, args, actions::up_steps, "Started").await
}

pub async fn stop_stack(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    run_stack_action(core, conn, args, actions::stop_steps, "Stopped").await
}

pub async fn restart_stack(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    run_stack_action(core, conn, args, actions::restart_steps, "Restarted").await
}

pub async fn down_stack(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    run_stack_action(core, conn, args, actions::down_steps, "Downed").await
}

pub async fn pause_stack(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    run_stack_action(core, conn, args, actions::pause_steps, "Paused").await
}

pub async fn resume_stack(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    run_stack_action(core, conn, args, actions::resume_steps, "Resumed").await
}

async fn run_stack_action(
    core: Arc<Core>,
    conn: Arc<Connection>,
    args: Args,
    build: fn(&Arc<Core>, &Stack) -> Vec<Step>,
    ok_msg: &str,
) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let Some(name) = stack_name(&args) else {
        return err_ack("Stack name is required");
    };
    let stack = match load_stack(&core, name).await {
        Ok(stack) => stack,
        Err(ack) => return ack,
    };
    let steps = build(&core, &stack);
    spawn_action(&core, stack, steps, STACK_TIMEOUT);
    ok_i18n(ok_msg)
}

pub async fn update_stack(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let Some(name) = stack_name(&args) else {
        return err_ack("Stack name is required");
    };
    let stack = match load_stack(&core, name).await {
        Ok(stack) => stack,
        Err(ack) => return ack,
    };

    let steps = actions::update_steps(&core, &stack);
    let core_bg = Arc::clone(&core);
    tokio::spawn(async move {
        let name = stack.name.clone();
        if let Err(e) = actions::run_action(&core_bg, &stack, steps, STACK_TIMEOUT).await {
            tracing::warn!(stack = %name, err = %e, "stack update failed");
            return;
        }
        // The pull changed local digests: drop stale records and re-check.
        if let Err(e) = core_bg.store.remove_stack_updates(&name).await {
            tracing::warn!(stack = %name, err = %e, "failed to clear update records");
        }
        updates::sweep_stack(&core_bg, &name).await;
        broadcast::trigger(&core_bg, Channel::Updates);
    });
    ok_i18n("Updated")
}

pub async fn delete_stack(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    let delete_files = args
        .get(1)
        .and_then(|v| v.get("deleteStackFiles"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    remove_stack(core, conn, args, false, delete_files).await
}

pub async fn force_delete_stack(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    remove_stack(core, conn, args, true, true).await
}

async fn remove_stack(
    core: Arc<Core>,
    conn: Arc<Connection>,
    args: Args,
    volumes: bool,
    delete_files: bool,
) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let Some(name) = stack_name(&args) else {
        return err_ack("Stack name is required");
    };
    let stack = match load_stack(&core, name).await {
        Ok(stack) => stack,
        Err(ack) => return ack,
    };

    let steps = actions::delete_steps(&core, &stack, volumes);
    let core_bg = Arc::clone(&core);
    tokio::spawn(async move {
        let name = stack.name.clone();
        let down = actions::run_action(&core_bg, &stack, steps, STACK_TIMEOUT).await;
        if let Err(e) = down {
            tracing::warn!(stack = %name, err = %e, "compose down failed during delete");
        }
        if delete_files {
            if let Err(e) = stack.delete_files().await {
                tracing::warn!(stack = %name, err = %e, "failed to delete stack files");
            }
        }
        if let Err(e) = core_bg.store.remove_stack_updates(&name).await {
            tracing::warn!(stack = %name, err = %e, "failed to clear update records");
        }
        broadcast::trigger(&core_bg, Channel::Stacks);
        broadcast::trigger(&core_bg, Channel::Updates);
    });
    ok_i18n("Deleted")
}

/// Group live containers by service and compute which services need a
/// recreate (compose image differs from the running image).
fn service_views(
    stack: &Stack,
    containers: &[crate::docker::ContainerInfo],
) -> (BTreeMap<String, Vec<Value>>, Map<String, Value>) {
    let images = stack.images();
    let ignored: Vec<String> = stack
        .services()
        .iter()
        .filter(|s| s.status_ignored())
        .map(|s| s.name.clone())
        .collect();

    let mut status_list: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    let mut recreate = Map::new();
    for container in containers {
        let service = container.service_name();
        if ignored.contains(&service) {
            continue;
        }
        if let Some(declared) = images.get(&service) {
            if !declared.is_empty()
                && !container.image.is_empty()
                && *declared != container.image
            {
                recreate.insert(service.clone(), Value::Bool(true));
            }
        }
        status_list.entry(service).or_default().push(json!({
            "name": container.name,
            "state": container.state,
            "status": container.status,
            "health": container.health(),
            "image": container.image,
            "ports": container.ports,
        }));
    }
    (status_list, recreate)
}

async fn stack_update_status(core: &Arc<Core>, stack_name: &str) -> Map<String, Value> {
    let prefix = format!("{stack_name}/");
    core.store
        .update_records()
        .await
        .into_iter()
        .filter_map(|(key, record)| {
            key.strip_prefix(&prefix).map(|service| {
                (service.to_owned(), json!({ "hasUpdate": record.has_update }))
            })
        })
        .collect()
}

pub async fn service_status_list(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let Some(name) = stack_name(&args) else {
        return err_ack("Stack name is required");
    };
    let stack = match load_stack(&core, name).await {
        Ok(stack) => stack,
        Err(ack) => return ack,
    };
    let containers = core.docker.list_containers(Some(name)).await.unwrap_or_default();
    let (status_list, recreate_status) = service_views(&stack, &containers);
    json!({
        "ok": true,
        "serviceStatusList": status_list,
        "serviceRecreateStatus": recreate_status,
        "serviceUpdateStatus": stack_update_status(&core, name).await,
    })
}

async fn service_action(
    core: Arc<Core>,
    conn: Arc<Connection>,
    args: Args,
    action: &str,
) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let (Some(name), Some(service)) = (args.str_at(0), args.str_at(1)) else {
        return err_ack("Stack name and service name required");
    };
    if name.is_empty() || service.is_empty() {
        return err_ack("Stack name and service name required");
    }
    let stack = match load_stack(&core, name).await {
        Ok(stack) => stack,
        Err(ack) => return ack,
    };
    let steps = actions::service_steps(&core, &stack, action, service);
    spawn_action(&core, stack, steps, SERVICE_TIMEOUT);
    ok_ack()
}

pub async fn start_service(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    service_action(core, conn, args, "up").await
}

pub async fn stop_service(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    service_action(core, conn, args, "stop").await
}

pub async fn restart_service(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    service_action(core, conn, args, "restart").await
}

pub async fn update_service(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let (Some(name), Some(service)) = (args.str_at(0), args.str_at(1)) else {
        return err_ack("Stack name and service name required");
    };
    let stack = match load_stack(&core, name).await {
        Ok(stack) => stack,
        Err(ack) => return ack,
    };

    let steps = actions::update_service_steps(&core, &stack, service);
    let service = service.to_owned();
    let core_bg = Arc::clone(&core);
    tokio::spawn(async move {
        let name = stack.name.clone();
        if let Err(e) = actions::run_action(&core_bg, &stack, steps, SERVICE_TIMEOUT).await {
            tracing::warn!(stack = %name, service, err = %e, "service update failed");
            return;
        }
        if let Err(e) = core_bg.store.remove_update(&name, &service).await {
            tracing::warn!(stack = %name, service, err = %e, "failed to clear update record");
        }
        updates::sweep_stack(&core_bg, &name).await;
        broadcast::trigger(&core_bg, Channel::Updates);
    });
    ok_i18n("Updated")
}

pub async fn check_image_updates(core: Arc<Core>, conn: Arc<Connection>, args: Args) -> Value {
    if let Err(ack) = check_login(&conn) {
        return ack;
    }
    let Some(name) = stack_name(&args) else {
        return err_ack("Stack name is required");
    };
    let name = name.to_owned();
    let core_bg = Arc::clone(&core);
    tokio::spawn(async move {
        updates::sweep_stack(&core_bg, &name).await;
        broadcast::trigger(&core_bg, Channel::Updates);
    });
    json!({ "ok": true, "updated": true })
}
