// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide state. One [`Core`] value owns every component; it is
//! constructed at startup and torn down by cancelling the root token.
//! Nothing in the crate lives in a module-level singleton.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::broadcast::Broadcaster;
use crate::config::Config;
use crate::docker::DockerApi;
use crate::socket::SocketServer;
use crate::store::Store;
use crate::term::manager::TerminalManager;

pub struct Core {
    pub config: Config,
    pub store: Store,
    pub docker: Arc<dyn DockerApi>,
    pub socket: SocketServer,
    pub terminals: Arc<TerminalManager>,
    pub broadcast: Broadcaster,
    pub shutdown: CancellationToken,
}

impl Core {
    pub fn new(
        config: Config,
        store: Store,
        docker: Arc<dyn DockerApi>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let terminals = Arc::new(TerminalManager::new(config.ring_size));
        let socket = SocketServer::new(config.no_auth);
        Arc::new(Self {
            config,
            store,
            docker,
            socket,
            terminals,
            broadcast: Broadcaster::new(),
            shutdown,
        })
    }
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("stacks_dir", &self.config.stacks_dir)
            .field("no_auth", &self.config.no_auth)
            .field("connections", &self.socket.connection_count())
            .finish()
    }
}
