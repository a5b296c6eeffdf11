use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::ServerEndpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerPorts {
    pub query: u16,
    pub block: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub hostname: String,
    pub ports: ServerPorts,
}

/// Backend list, as read from a YAML file of the form
///
/// ```yaml
/// servers:
///   - hostname: localhost
///     ports: { query: 9091, block: 9093 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServersConfig {
    pub servers: Vec<ServerEntry>,
}

impl ServersConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("opening server list {}", path.display()))?;
        let config: ServersConfig = serde_yaml::from_reader(file)
            .with_context(|| format!("parsing server list {}", path.display()))?;

        info!(path = %path.display(), servers = config.servers.len(), "Server list loaded");
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("parsing server list")
    }

    /// Endpoints in file order, duplicates removed.
    pub fn endpoints(&self) -> Vec<ServerEndpoint> {
        let mut endpoints: Vec<ServerEndpoint> = Vec::with_capacity(self.servers.len());
        for entry in &self.servers {
            let endpoint = ServerEndpoint::new(&entry.hostname, entry.ports.query, entry.ports.block);
            if !endpoints.contains(&endpoint) {
                endpoints.push(endpoint);
            }
        }
        endpoints
    }
}

impl Default for ServersConfig {
    fn default() -> Self {
        Self {
            servers: vec![ServerEntry {
                hostname: "localhost".to_string(),
                ports: ServerPorts {
                    query: 9091,
                    block: 9093,
                },
            }],
        }
    }
}
