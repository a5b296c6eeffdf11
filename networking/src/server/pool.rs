use std::collections::BTreeMap;

use serde::Serialize;

use super::SyncServer;
/// Server pool.
///
/// Holds one `SyncServer` per endpoint, in endpoint order.
use crate::types::{ConnectionState, ServerEndpoint};

/// Number of pooled servers in each connection state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServerCount {
    pub disconnected: u64,
    pub connecting: u64,
    pub connected: u64,
    pub disconnecting: u64,
}

#[derive(Debug, Default, Clone)]
pub struct ServerPool {
    servers: BTreeMap<ServerEndpoint, SyncServer>,
}

impl ServerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a server unless its endpoint is already pooled. Returns the
    /// pooled server either way.
    pub fn add_server(&mut self, server: SyncServer) -> &SyncServer {
        self.servers
            .entry(server.endpoint().clone())
            .or_insert(server)
    }

    pub fn remove_server(&mut self, endpoint: &ServerEndpoint) -> Option<SyncServer> {
        self.servers.remove(endpoint)
    }

    pub fn get_server(&self, endpoint: &ServerEndpoint) -> Option<&SyncServer> {
        self.servers.get(endpoint)
    }

    pub fn contains(&self, endpoint: &ServerEndpoint) -> bool {
        self.servers.contains_key(endpoint)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn servers(&self) -> impl Iterator<Item = &SyncServer> {
        self.servers.values()
    }

    pub fn connected(&self) -> Vec<SyncServer> {
        self.servers
            .values()
            .filter(|server| server.is_connected())
            .cloned()
            .collect()
    }

    pub fn count_by_state(&self) -> ServerCount {
        let mut count = ServerCount::default();
        for server in self.servers.values() {
            match server.connection_state() {
                ConnectionState::Disconnected => count.disconnected += 1,
                ConnectionState::Connecting => count.connecting += 1,
                ConnectionState::Connected => count.connected += 1,
                ConnectionState::Disconnecting => count.disconnecting += 1,
            }
        }
        count
    }
}
