use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Server connection state machine.
///
/// Tracks the lifecycle of the connection to one backend:
/// DISCONNECTED -> CONNECTING -> CONNECTED -> DISCONNECTING -> DISCONNECTED
///
/// A transport failure moves a server straight back to DISCONNECTED.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No active connection to this server.
    Disconnected,
    /// Initial handshake in progress.
    Connecting,
    /// The server answered and can be queried.
    Connected,
    /// Graceful shutdown in progress.
    Disconnecting,
}

/// Where a backend can be reached: one host with separate query and block
/// publisher ports.
///
/// Two servers are the same server exactly when their endpoints are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerEndpoint {
    pub hostname: String,
    pub query_port: u16,
    pub block_port: u16,
}

impl ServerEndpoint {
    pub fn new(hostname: impl Into<String>, query_port: u16, block_port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            query_port,
            block_port,
        }
    }

    pub fn query_url(&self) -> String {
        format!("tcp://{}:{}", self.hostname, self.query_port)
    }

    pub fn block_url(&self) -> String {
        format!("tcp://{}:{}", self.hostname, self.block_port)
    }
}

impl Display for ServerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}/{}", self.hostname, self.query_port, self.block_port)
    }
}

/// Which subscription a monitor task consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveSource {
    /// Header notifications.
    #[default]
    Headers,
    /// Block notifications, reduced to their headers.
    Blocks,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn endpoint_identity_is_by_value() {
        let a = ServerEndpoint::new("mainnet.example.org", 9091, 9093);
        let b = ServerEndpoint::new("mainnet.example.org", 9091, 9093);
        let c = ServerEndpoint::new("mainnet.example.org", 9091, 9094);

        let set: HashSet<_> = [a.clone(), b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert_eq!(a.query_url(), "tcp://mainnet.example.org:9091");
        assert_eq!(a.block_url(), "tcp://mainnet.example.org:9093");
    }
}
