/// In-process backend.
///
/// Serves a header chain from memory and pushes notifications to its
/// subscribers on demand. Used by the test suites and the `header_sync`
/// smoke binary in place of a network transport.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chain::config::REGTEST_BITS;
use containers::{Block, BlockNotification, Bytes32, Header};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::{RemoteLedgerServer, ServerConnector, Subscription, SubscriptionSender};
use crate::types::ServerEndpoint;

/// `length` regtest headers extending `parent`. `seed` goes into the nonce,
/// so different seeds give distinct branches.
pub fn extend_chain(parent: &Header, length: u64, seed: u32) -> Vec<Header> {
    let mut headers = Vec::with_capacity(length as usize);
    let mut tip = parent.clone();

    for index in 0..length {
        let next = Header {
            version: 1,
            prev_block_hash: tip.hash(),
            merkle_root: Bytes32::zero(),
            timestamp: tip.timestamp + 600,
            bits: REGTEST_BITS,
            nonce: seed.wrapping_add(index as u32),
            height: tip.height + 1,
        };
        headers.push(next.clone());
        tip = next;
    }

    headers
}

/// `genesis` followed by `length` regtest headers.
pub fn generate_chain(genesis: &Header, length: u64) -> Vec<Header> {
    let mut headers = vec![genesis.clone()];
    headers.extend(extend_chain(genesis, length, 0));
    headers
}

#[derive(Default)]
struct Subscribers {
    headers: Vec<SubscriptionSender<Header>>,
    blocks: Vec<SubscriptionSender<BlockNotification>>,
}

pub struct MemoryServer {
    endpoint: ServerEndpoint,
    /// Indexed by height.
    headers: RwLock<Vec<Header>>,
    subscribers: Mutex<Subscribers>,
    requests: Mutex<Vec<u64>>,
    connect_delay: Mutex<Option<Duration>>,
    failing: AtomicBool,
    connected: AtomicBool,
    sequence: AtomicU64,
}

impl MemoryServer {
    /// `headers[i]` must sit at height `i`.
    pub fn new(endpoint: ServerEndpoint, headers: Vec<Header>) -> Self {
        Self {
            endpoint,
            headers: RwLock::new(headers),
            subscribers: Mutex::default(),
            requests: Mutex::default(),
            connect_delay: Mutex::default(),
            failing: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn with_connect_delay(self, delay: Duration) -> Self {
        *self.connect_delay.lock() = Some(delay);
        self
    }

    pub fn tip_height(&self) -> u64 {
        (self.headers.read().len() as u64).saturating_sub(1)
    }

    pub fn header(&self, height: u64) -> Option<Header> {
        self.headers.read().get(height as usize).cloned()
    }

    /// Heights requested through `block_header`, in request order.
    pub fn requested_heights(&self) -> Vec<u64> {
        self.requests.lock().clone()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }

    /// Make every query fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Make `header` the server's header at its height, dropping anything
    /// above it, and notify subscribers.
    ///
    /// Fails when the height would leave a gap above the current tip.
    pub fn push_header(&self, header: Header) -> Result<()> {
        {
            let mut headers = self.headers.write();
            let len = headers.len() as u64;
            if header.height > len {
                bail!(
                    "{} cannot store header {} above tip {}",
                    self.endpoint,
                    header.height,
                    len.saturating_sub(1)
                );
            }
            headers.truncate(header.height as usize);
            headers.push(header.clone());
        }
        self.announce(&header);
        Ok(())
    }

    /// Extend the served chain by `count` headers.
    pub fn mine(&self, count: u64) -> Vec<Header> {
        let Some(tip) = self.headers.read().last().cloned() else {
            return Vec::new();
        };

        let mined = extend_chain(&tip, count, 0);
        for header in &mined {
            // Each mined header sits directly on the previous tip.
            let _ = self.push_header(header.clone());
        }
        mined
    }

    /// Notify subscribers without changing the served chain.
    pub fn announce(&self, header: &Header) {
        let mut subscribers = self.subscribers.lock();

        subscribers.headers.retain(|sender| sender.send(header.clone()));

        let notification = BlockNotification {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            height: header.height.saturating_sub(1),
            block: Block {
                header: header.clone(),
                transactions: Vec::new(),
            },
        };
        subscribers
            .blocks
            .retain(|sender| sender.send(notification.clone()));
    }

    /// Open header and block subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.headers.retain(|sender| !sender.is_closed());
        subscribers.blocks.retain(|sender| !sender.is_closed());
        subscribers.headers.len() + subscribers.blocks.len()
    }

    /// End every open subscription from the server side.
    pub fn close_subscriptions(&self) {
        *self.subscribers.lock() = Subscribers::default();
    }

    fn check_available(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("{} is not responding", self.endpoint);
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteLedgerServer for MemoryServer {
    fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    async fn connect(&self) -> Result<()> {
        let delay = *self.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_available()?;

        self.connected.store(true, Ordering::SeqCst);
        debug!(server = %self.endpoint, "Memory server accepted connection");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.close_subscriptions();
        Ok(())
    }

    async fn last_height(&self) -> Result<u64> {
        self.check_available()?;
        Ok(self.tip_height())
    }

    async fn block_header(&self, height: u64) -> Result<Header> {
        self.requests.lock().push(height);
        self.check_available()?;

        self.header(height)
            .ok_or_else(|| anyhow!("{} has no header at height {height}", self.endpoint))
    }

    async fn subscribe_to_headers(&self) -> Result<Subscription<Header>> {
        self.check_available()?;
        let (sender, subscription) = Subscription::channel();
        self.subscribers.lock().headers.push(sender);
        Ok(subscription)
    }

    async fn subscribe_to_blocks(&self) -> Result<Subscription<BlockNotification>> {
        self.check_available()?;
        let (sender, subscription) = Subscription::channel();
        self.subscribers.lock().blocks.push(sender);
        Ok(subscription)
    }
}

/// Creates `MemoryServer`s that all start from the same chain, and keeps
/// them reachable so callers can drive them.
pub struct MemoryConnector {
    template: Vec<Header>,
    servers: Mutex<Vec<Arc<MemoryServer>>>,
}

impl MemoryConnector {
    pub fn new(template: Vec<Header>) -> Self {
        Self {
            template,
            servers: Mutex::default(),
        }
    }

    pub fn server(&self, endpoint: &ServerEndpoint) -> Option<Arc<MemoryServer>> {
        self.servers
            .lock()
            .iter()
            .find(|server| &server.endpoint == endpoint)
            .cloned()
    }

    pub fn servers(&self) -> Vec<Arc<MemoryServer>> {
        self.servers.lock().clone()
    }
}

impl ServerConnector for MemoryConnector {
    fn create(&self, endpoint: &ServerEndpoint) -> Arc<dyn RemoteLedgerServer> {
        let server = Arc::new(MemoryServer::new(endpoint.clone(), self.template.clone()));
        self.servers.lock().push(server.clone());
        server
    }
}
