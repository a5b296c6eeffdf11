use std::sync::Arc;

use anyhow::{Result, anyhow};
use chain::ChainTable;
use futures::future::join_all;
use metrics::SharedMetrics;
use parking_lot::Mutex;
use tokio::sync::mpsc;
/// Connection management.
///
/// Owns the pool of backends: connects to all of them in parallel, tracks
/// the active one and shuts them down. Code outside the runtime reaches the
/// manager through a `ConnectionManagerHandle` (see `bridge`).
use tracing::{info, warn};

use crate::server::{ServerConnector, ServerPool, SyncServer};
use crate::sync::{ChainSynchronizer, SyncConfig};
use crate::types::ServerEndpoint;

pub mod bridge;

pub use bridge::{BridgeError, ConnectionManagerHandle};

#[derive(Clone)]
pub struct ConnectionManager {
    pool: Arc<Mutex<ServerPool>>,
    connector: Arc<dyn ServerConnector>,
    active: Arc<Mutex<Option<ServerEndpoint>>>,
    config: SyncConfig,
    metrics: Option<SharedMetrics>,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn ServerConnector>,
        endpoints: impl IntoIterator<Item = ServerEndpoint>,
    ) -> Self {
        let mut pool = ServerPool::new();
        for endpoint in endpoints {
            if !pool.contains(&endpoint) {
                pool.add_server(SyncServer::new(connector.create(&endpoint)));
            }
        }

        Self {
            pool: Arc::new(Mutex::new(pool)),
            connector,
            active: Arc::new(Mutex::new(None)),
            config: SyncConfig::default(),
            metrics: None,
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Every pooled server, connected or not.
    pub fn servers(&self) -> Vec<SyncServer> {
        self.pool.lock().servers().cloned().collect()
    }

    /// A synchronizer that reads this manager's pool on every pass, so
    /// servers that connect after `connect_all` returns, or arrive through
    /// `switch_active_server`, are matched and monitored too.
    pub fn synchronizer(&self, chains: Arc<ChainTable>) -> ChainSynchronizer {
        let synchronizer =
            ChainSynchronizer::with_pool(chains, self.pool.clone()).with_config(self.config);
        match &self.metrics {
            Some(metrics) => synchronizer.with_metrics(metrics.clone()),
            None => synchronizer,
        }
    }

    /// Connect to every pooled server at once.
    ///
    /// Returns as soon as one server answers. The remaining attempts keep
    /// running in the background and join the connected set when they
    /// succeed. Fails only when every attempt failed.
    pub async fn connect_all(&self) -> Result<ServerEndpoint> {
        let servers = self.servers();
        if servers.is_empty() {
            return Err(anyhow!("no servers configured"));
        }

        let total = servers.len();
        let (results_tx, mut results_rx) = mpsc::unbounded_channel();
        for server in servers {
            let results_tx = results_tx.clone();
            let manager = self.clone();
            tokio::spawn(async move {
                let result = server.connect(manager.config.connect_timeout).await;
                manager.update_metrics();
                let _ = results_tx.send((server.endpoint().clone(), result));
            });
        }
        drop(results_tx);

        while let Some((endpoint, result)) = results_rx.recv().await {
            match result {
                Ok(height) => {
                    info!(server = %endpoint, height, "First server connected");
                    self.active.lock().get_or_insert_with(|| endpoint.clone());
                    return Ok(endpoint);
                }
                Err(err) => {
                    warn!(server = %endpoint, "Connection attempt failed: {err:#}");
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_server_disconnection("connect_failed");
                    }
                }
            }
        }

        Err(anyhow!("none of the {total} servers could be connected"))
    }

    /// Disconnect every server and wait until all of them are shut down.
    pub async fn disconnect_all(&self) {
        let servers = self.servers();
        join_all(servers.iter().map(|server| server.disconnect())).await;

        *self.active.lock() = None;
        self.update_metrics();
        info!(servers = servers.len(), "Disconnected from all servers");
    }

    /// Make `endpoint` the active server, pooling it first if it is new.
    ///
    /// Switching to the active server again changes nothing.
    pub fn switch_active_server(&self, endpoint: ServerEndpoint) -> SyncServer {
        let server = {
            let mut pool = self.pool.lock();
            match pool.get_server(&endpoint) {
                Some(server) => server.clone(),
                None => pool
                    .add_server(SyncServer::new(self.connector.create(&endpoint)))
                    .clone(),
            }
        };

        let mut active = self.active.lock();
        if active.as_ref() != Some(&endpoint) {
            info!(server = %endpoint, "Switched active server");
            *active = Some(endpoint);
        }

        server
    }

    pub fn active_server(&self) -> Option<SyncServer> {
        let endpoint = self.active.lock().clone()?;
        self.pool.lock().get_server(&endpoint).cloned()
    }

    /// Whether at least one server is connected.
    pub fn is_connected(&self) -> bool {
        self.pool.lock().servers().any(SyncServer::is_connected)
    }

    pub fn get_connected_servers(&self) -> Vec<SyncServer> {
        self.pool.lock().connected()
    }

    fn update_metrics(&self) {
        if let Some(metrics) = &self.metrics {
            let count = self.pool.lock().count_by_state();
            metrics.set_servers_connected(count.connected as i64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::memory::{MemoryConnector, generate_chain};
    use crate::types::ConnectionState;
    use chain::{AcceptAll, LocalChain};
    use containers::Header;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn endpoint(port: u16) -> ServerEndpoint {
        ServerEndpoint::new("localhost", port, port + 2)
    }

    fn manager(ports: &[u16]) -> (ConnectionManager, Arc<MemoryConnector>) {
        let connector = Arc::new(MemoryConnector::new(generate_chain(&Header::genesis(), 3)));
        let manager = ConnectionManager::new(
            connector.clone(),
            ports.iter().map(|&port| endpoint(port)),
        );
        (manager, connector)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn connect_all_returns_after_first_success() {
        let (manager, connector) = manager(&[9091, 9191]);
        connector.server(&endpoint(9091)).unwrap().set_failing(true);

        let first = manager.connect_all().await.unwrap();

        assert_eq!(first, endpoint(9191));
        assert!(manager.is_connected());
        assert_eq!(manager.active_server().unwrap().endpoint(), &endpoint(9191));
        assert_eq!(
            manager
                .get_connected_servers()
                .iter()
                .map(|server| server.endpoint().clone())
                .collect::<Vec<_>>(),
            vec![endpoint(9191)]
        );
    }

    #[tokio::test]
    async fn slow_servers_connect_in_background() {
        let connector = Arc::new(MemoryConnector::new(vec![Header::genesis()]));
        let manager = ConnectionManager::new(connector.clone(), [endpoint(9091)]);
        let slow = endpoint(9191);
        let server = SyncServer::new(Arc::new(
            crate::server::MemoryServer::new(slow.clone(), vec![Header::genesis()])
                .with_connect_delay(Duration::from_millis(100)),
        ));
        manager.pool.lock().add_server(server.clone());

        manager.connect_all().await.unwrap();
        assert_eq!(manager.get_connected_servers().len(), 1);

        assert!(wait_until(|| server.is_connected()).await);
        assert_eq!(manager.get_connected_servers().len(), 2);
    }

    #[tokio::test]
    async fn connect_all_fails_when_every_server_fails() {
        let (manager, connector) = manager(&[9091, 9191]);
        for server in connector.servers() {
            server.set_failing(true);
        }

        assert!(manager.connect_all().await.is_err());
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn connect_all_without_servers_fails() {
        let (manager, _) = manager(&[]);
        assert!(manager.connect_all().await.is_err());
    }

    #[tokio::test]
    async fn disconnect_all_shuts_every_server_down() {
        let (manager, connector) = manager(&[9091, 9191]);
        manager.connect_all().await.unwrap();
        assert!(wait_until(|| manager.get_connected_servers().len() == 2).await);

        manager.disconnect_all().await;

        assert!(!manager.is_connected());
        assert!(manager.active_server().is_none());
        assert!(connector.servers().iter().all(|server| !server.is_connected()));
        assert!(
            manager
                .servers()
                .iter()
                .all(|server| server.connection_state() == ConnectionState::Disconnected)
        );
    }

    #[test]
    fn switch_active_server_reuses_pooled_instance() {
        let (manager, connector) = manager(&[9091]);

        let first = manager.switch_active_server(endpoint(9091));
        let again = manager.switch_active_server(endpoint(9091));
        assert_eq!(first, again);
        assert_eq!(connector.servers().len(), 1);

        let new = manager.switch_active_server(endpoint(9191));
        assert_eq!(new.endpoint(), &endpoint(9191));
        assert_eq!(connector.servers().len(), 2);
        assert_eq!(manager.servers().len(), 2);
        assert_eq!(manager.active_server(), Some(new));
    }

    #[tokio::test]
    async fn synchronizer_follows_servers_that_connect_later() {
        let template = generate_chain(&Header::genesis(), 3);
        let connector = Arc::new(MemoryConnector::new(template.clone()));
        let manager = ConnectionManager::new(connector, [endpoint(9091)]);
        let slow = Arc::new(
            crate::server::MemoryServer::new(endpoint(9191), template.clone())
                .with_connect_delay(Duration::from_millis(100)),
        );
        let server = SyncServer::new(slow.clone());
        manager.pool.lock().add_server(server.clone());

        let mut chain = LocalChain::genesis(template[0].clone(), Arc::new(AcceptAll));
        for header in &template[1..] {
            chain.save_header(header.clone());
        }
        let table = Arc::new(ChainTable::new([chain]));
        let synchronizer = manager.synchronizer(table.clone());

        manager.connect_all().await.unwrap();
        let first = synchronizer.monitor_servers();
        assert_eq!(first.endpoints().cloned().collect::<Vec<_>>(), vec![endpoint(9091)]);

        assert!(wait_until(|| server.is_connected()).await);
        let pairs = synchronizer.blockchain_servers_pairs().await;
        assert_eq!(pairs[&0].len(), 2);

        let second = synchronizer.monitor_servers();
        assert_eq!(second.endpoints().cloned().collect::<Vec<_>>(), vec![endpoint(9191)]);
        assert!(wait_until(|| slow.subscriber_count() == 1).await);

        let mined = slow.mine(1);
        assert!(wait_until(|| table.height(0) == Some(4)).await);
        assert_eq!(
            table.with_chain(0, |chain| chain.tip_hash()),
            Some(mined[0].hash())
        );

        first.abort();
        second.abort();
    }
}
