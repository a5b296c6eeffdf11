use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use containers::{BlockNotification, Header};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
/// Remote ledger backends.
///
/// A backend is queried for headers by height and pushes header and block
/// notifications over subscriptions. Transports implement
/// `RemoteLedgerServer`; the rest of the crate only ever talks to a backend
/// through a pooled `SyncServer`, which adds connection state, timeouts and
/// a shutdown token on top of the raw transport.
use tracing::{debug, info, warn};

use crate::types::{ConnectionState, ServerEndpoint};

pub mod adapter;
pub mod memory;
pub mod pool;
pub mod subscription;

pub use memory::{MemoryConnector, MemoryServer};
pub use pool::{ServerCount, ServerPool};
pub use subscription::{Subscription, SubscriptionSender};

/// Transport contract for one backend.
///
/// Headers returned by `block_header` and pushed over `subscribe_to_headers`
/// carry their own height.
#[async_trait]
pub trait RemoteLedgerServer: Send + Sync {
    fn endpoint(&self) -> &ServerEndpoint;

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Height of the backend's best header.
    async fn last_height(&self) -> Result<u64>;

    async fn block_header(&self, height: u64) -> Result<Header>;

    async fn subscribe_to_headers(&self) -> Result<Subscription<Header>>;

    /// Block notifications report the height of the block's parent. Use
    /// `adapter::block_headers` to turn them into correctly numbered headers.
    async fn subscribe_to_blocks(&self) -> Result<Subscription<BlockNotification>>;
}

/// Creates transports for endpoints.
pub trait ServerConnector: Send + Sync {
    fn create(&self, endpoint: &ServerEndpoint) -> Arc<dyn RemoteLedgerServer>;
}

#[derive(Debug)]
struct ServerState {
    connection: ConnectionState,
    last_known_height: Option<u64>,
    shutdown: CancellationToken,
}

/// A pooled backend.
///
/// Clones share connection state, so a failure observed by one task is seen
/// by every other task holding the same server. Two servers are equal when
/// their endpoints are.
#[derive(Clone)]
pub struct SyncServer {
    endpoint: ServerEndpoint,
    transport: Arc<dyn RemoteLedgerServer>,
    state: Arc<Mutex<ServerState>>,
}

impl SyncServer {
    pub fn new(transport: Arc<dyn RemoteLedgerServer>) -> Self {
        Self {
            endpoint: transport.endpoint().clone(),
            transport,
            state: Arc::new(Mutex::new(ServerState {
                connection: ConnectionState::Disconnected,
                last_known_height: None,
                shutdown: CancellationToken::new(),
            })),
        }
    }

    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    pub fn transport(&self) -> &Arc<dyn RemoteLedgerServer> {
        &self.transport
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.lock().connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Backend height seen at connect time or on the last `last_height` call.
    pub fn last_known_height(&self) -> Option<u64> {
        self.state.lock().last_known_height
    }

    /// Cancelled when the server disconnects or fails.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.lock().shutdown.clone()
    }

    /// Connect and read the backend height.
    pub async fn connect(&self, timeout: Duration) -> Result<u64> {
        {
            let mut state = self.state.lock();
            state.connection = ConnectionState::Connecting;
            if state.shutdown.is_cancelled() {
                state.shutdown = CancellationToken::new();
            }
        }

        let result = tokio::time::timeout(timeout, async {
            self.transport.connect().await?;
            self.transport.last_height().await
        })
        .await
        .map_err(|_| anyhow!("connecting to {} timed out after {timeout:?}", self.endpoint))
        .and_then(|result| result.with_context(|| format!("connecting to {}", self.endpoint)));

        match result {
            Ok(height) => {
                let mut state = self.state.lock();
                state.connection = ConnectionState::Connected;
                state.last_known_height = Some(height);
                drop(state);

                info!(server = %self.endpoint, height, "Connected to server");
                Ok(height)
            }
            Err(err) => {
                self.mark_failed(&err);
                Err(err)
            }
        }
    }

    /// Graceful disconnect. Stops every task watching the shutdown token.
    pub async fn disconnect(&self) {
        let token = {
            let mut state = self.state.lock();
            if state.connection == ConnectionState::Disconnected {
                return;
            }
            state.connection = ConnectionState::Disconnecting;
            state.shutdown.clone()
        };
        token.cancel();

        if let Err(err) = self.transport.disconnect().await {
            debug!(server = %self.endpoint, "Error while disconnecting: {err:?}");
        }

        self.state.lock().connection = ConnectionState::Disconnected;
        info!(server = %self.endpoint, "Disconnected from server");
    }

    /// Record a transport failure: the server leaves the connected set and
    /// its tasks are told to stop.
    pub fn mark_failed(&self, reason: &anyhow::Error) {
        let mut state = self.state.lock();
        let was_connected = state.connection == ConnectionState::Connected;
        state.connection = ConnectionState::Disconnected;
        state.shutdown.cancel();
        drop(state);

        if was_connected {
            warn!(server = %self.endpoint, "Server marked disconnected: {reason:#}");
        } else {
            debug!(server = %self.endpoint, "Server unavailable: {reason:#}");
        }
    }

    pub async fn last_height(&self, timeout: Duration) -> Result<u64> {
        let height = self
            .request(timeout, "last_height", self.transport.last_height())
            .await?;
        self.state.lock().last_known_height = Some(height);
        Ok(height)
    }

    pub async fn fetch_header(&self, height: u64, timeout: Duration) -> Result<Header> {
        self.request(timeout, "block_header", self.transport.block_header(height))
            .await
            .with_context(|| format!("fetching header {height} from {}", self.endpoint))
    }

    async fn request<T>(
        &self,
        timeout: Duration,
        what: &str,
        request: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let result = match tokio::time::timeout(timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("{what} timed out after {timeout:?}")),
        };

        if let Err(err) = &result {
            self.mark_failed(err);
        }
        result
    }
}

impl PartialEq for SyncServer {
    fn eq(&self, other: &Self) -> bool {
        self.endpoint == other.endpoint
    }
}

impl Eq for SyncServer {}

impl fmt::Debug for SyncServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SyncServer")
            .field("endpoint", &self.endpoint)
            .field("connection", &state.connection)
            .field("last_known_height", &state.last_known_height)
            .finish()
    }
}
