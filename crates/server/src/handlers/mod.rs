// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket event handlers. Every handler follows the same shape:
//! check login, parse args, validate, act, ack.

pub mod auth;
pub mod misc;
pub mod stack;
pub mod term;

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::error::AckError;
use crate::socket::{Args, Connection, Handler, HandlerFuture, SocketServer};
use crate::state::Core;

fn wrap<F, Fut>(f: F) -> Handler
where
    F: Fn(Arc<Core>, Arc<Connection>, Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Value> + Send + 'static,
{
    Arc::new(move |core, conn, args| -> HandlerFuture { Box::pin(f(core, conn, args)) })
}

/// Deny unauthenticated requests up front.
fn check_login(conn: &Connection) -> Result<(), Value> {
    if conn.is_authenticated() {
        Ok(())
    } else {
        Err(AckError::NotLoggedIn.to_ack())
    }
}

/// Register every event the server dispatches.
pub fn register_all(server: &SocketServer) {
    // Authentication & account
    server.handle("login", wrap(auth::login));
    server.handle("loginByToken", wrap(auth::login_by_token));
    server.handle("logout", wrap(auth::logout));
    server.handle("setup", wrap(auth::setup));
    server.handle("changePassword", wrap(auth::change_password));

    // Stacks & services
    server.handle("requestStackList", wrap(stack::request_stack_list));
    server.handle("getStack", wrap(stack::get_stack));
    server.handle("saveStack", wrap(stack::save_stack));
    server.handle("deployStack", wrap(stack::deploy_stack));
    server.handle("startStack", wrap(stack::start_stack));
    server.handle("stopStack", wrap(stack::stop_stack));
    server.handle("restartStack", wrap(stack::restart_stack));
    server.handle("downStack", wrap(stack::down_stack));
    server.handle("pauseStack", wrap(stack::pause_stack));
    server.handle("resumeStack", wrap(stack::resume_stack));
    server.handle("updateStack", wrap(stack::update_stack));
    server.handle("deleteStack", wrap(stack::delete_stack));
    server.handle("forceDeleteStack", wrap(stack::force_delete_stack));
    server.handle("serviceStatusList", wrap(stack::service_status_list));
    server.handle("startService", wrap(stack::start_service));
    server.handle("stopService", wrap(stack::stop_service));
    server.handle("restartService", wrap(stack::restart_service));
    server.handle("updateService", wrap(stack::update_service));
    server.handle("checkImageUpdates", wrap(stack::check_image_updates));

    // Terminals & logs
    server.handle("terminalJoin", wrap(term::terminal_join));
    server.handle("terminalInput", wrap(term::terminal_input));
    server.handle("terminalResize", wrap(term::terminal_resize));
    server.handle("mainTerminal", wrap(term::main_terminal));
    server.handle("interactiveTerminal", wrap(term::interactive_terminal));
    server.handle("containerExec", wrap(term::container_exec));
    server.handle("joinContainerLog", wrap(term::join_container_log));
    server.handle("joinContainerLogByName", wrap(term::join_container_log_by_name));
    server.handle("leaveCombinedTerminal", wrap(term::leave_combined_terminal));

    // Docker views, settings, agents, envelope
    server.handle("requestContainerList", wrap(misc::request_container_list));
    server.handle("getDockerNetworkList", wrap(misc::get_docker_network_list));
    server.handle("dockerStats", wrap(misc::docker_stats));
    server.handle("containerInspect", wrap(misc::container_inspect));
    server.handle("getSettings", wrap(misc::get_settings));
    server.handle("setSettings", wrap(misc::set_settings));
    server.handle("addAgent", wrap(misc::add_agent));
    server.handle("removeAgent", wrap(misc::remove_agent));
    server.handle("updateAgent", wrap(misc::update_agent));
    server.handle("agent", wrap(misc::agent_envelope));
}

#[cfg(test)]
#[path = "handlers_tests.rs"]
mod tests;
