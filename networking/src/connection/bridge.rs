use std::sync::mpsc::{RecvTimeoutError, SyncSender, sync_channel};
use std::time::Duration;

use metrics::SharedMetrics;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
/// Blocking access to the connection manager.
///
/// The manager lives on the tokio runtime. Threads outside it send a command
/// over a channel and wait for the answer with a deadline, so a stuck
/// runtime surfaces as `BridgeError::Timeout` instead of a hang.
use tracing::{debug, warn};

use super::ConnectionManager;
use crate::server::SyncServer;
use crate::types::ServerEndpoint;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("connection manager did not answer within {0:?}")]
    Timeout(Duration),

    #[error("connection manager has shut down")]
    Closed,

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

enum Command {
    ConnectAll(SyncSender<anyhow::Result<ServerEndpoint>>),
    DisconnectAll(SyncSender<()>),
    SwitchActiveServer(ServerEndpoint, SyncSender<SyncServer>),
    IsConnected(SyncSender<bool>),
    GetConnectedServers(SyncSender<Vec<SyncServer>>),
}

impl ConnectionManager {
    /// Move the manager onto the current runtime and return a blocking
    /// handle to it.
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn(self, timeout: Duration) -> ConnectionManagerHandle {
        self.spawn_on(&Handle::current(), timeout)
    }

    pub fn spawn_on(self, runtime: &Handle, timeout: Duration) -> ConnectionManagerHandle {
        let (commands, receiver) = mpsc::unbounded_channel();
        let metrics = self.metrics.clone();
        runtime.spawn(self.serve(receiver));

        ConnectionManagerHandle {
            commands,
            timeout,
            metrics,
        }
    }

    /// Each command runs in its own task, so a slow connect or disconnect
    /// never holds up the others.
    async fn serve(self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            tokio::spawn(self.clone().handle(command));
        }

        debug!("Connection manager stopped");
    }

    async fn handle(self, command: Command) {
        // A caller that gave up has dropped its receiver; that is fine.
        match command {
            Command::ConnectAll(reply) => {
                let _ = reply.send(self.connect_all().await);
            }
            Command::DisconnectAll(reply) => {
                self.disconnect_all().await;
                let _ = reply.send(());
            }
            Command::SwitchActiveServer(endpoint, reply) => {
                let _ = reply.send(self.switch_active_server(endpoint));
            }
            Command::IsConnected(reply) => {
                let _ = reply.send(self.is_connected());
            }
            Command::GetConnectedServers(reply) => {
                let _ = reply.send(self.get_connected_servers());
            }
        }
    }
}

/// Blocking handle for threads outside the runtime.
///
/// Every call waits at most `timeout` for the runtime to answer. Calling it
/// from inside the runtime blocks a worker thread.
#[derive(Clone)]
pub struct ConnectionManagerHandle {
    commands: mpsc::UnboundedSender<Command>,
    timeout: Duration,
    metrics: Option<SharedMetrics>,
}

impl ConnectionManagerHandle {
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn connect_all(&self) -> Result<ServerEndpoint, BridgeError> {
        self.request("connect_all", Command::ConnectAll)?
            .map_err(BridgeError::from)
    }

    pub fn disconnect_all(&self) -> Result<(), BridgeError> {
        self.request("disconnect_all", Command::DisconnectAll)
    }

    pub fn switch_active_server(&self, endpoint: ServerEndpoint) -> Result<SyncServer, BridgeError> {
        self.request("switch_active_server", |reply| {
            Command::SwitchActiveServer(endpoint, reply)
        })
    }

    pub fn is_connected(&self) -> Result<bool, BridgeError> {
        self.request("is_connected", Command::IsConnected)
    }

    pub fn get_connected_servers(&self) -> Result<Vec<SyncServer>, BridgeError> {
        self.request("get_connected_servers", Command::GetConnectedServers)
    }

    fn request<T>(
        &self,
        operation: &str,
        command: impl FnOnce(SyncSender<T>) -> Command,
    ) -> Result<T, BridgeError> {
        let (reply, answer) = sync_channel(1);
        self.commands
            .send(command(reply))
            .map_err(|_| BridgeError::Closed)?;

        match answer.recv_timeout(self.timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => {
                warn!(operation, timeout = ?self.timeout, "Connection manager call timed out");
                if let Some(metrics) = &self.metrics {
                    metrics.inc_bridge_timeouts();
                }
                Err(BridgeError::Timeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::Closed),
        }
    }
}
