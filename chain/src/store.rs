/// Persistence boundary for header chains.
///
/// The on-disk format lives outside this crate. A store hands back the chains
/// it knows about at startup and is told about every header the chain table
/// commits, so that state survives a restart.
use std::collections::BTreeMap;

use anyhow::{Result, anyhow};
use containers::{Bytes32, Header};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredChain {
    pub fork_height: u64,
    pub parent: Option<u64>,
    pub parent_hash: Bytes32,
    pub headers: Vec<Header>,
}

pub trait HeaderStore: Send + Sync {
    fn load_chains(&self) -> Result<Vec<StoredChain>>;

    /// Called after `header` was appended to the chain forked at `fork_height`.
    fn header_saved(&self, fork_height: u64, header: &Header) -> Result<()>;

    /// Called when a new, still empty, fork is registered.
    fn fork_created(&self, fork_height: u64, parent: u64, parent_hash: Bytes32) -> Result<()>;
}

/// Keeps every chain in memory. Used by tests and the smoke-test binary.
#[derive(Debug, Default)]
pub struct MemoryHeaderStore {
    chains: Mutex<BTreeMap<u64, StoredChain>>,
}

impl MemoryHeaderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_genesis(genesis: Header) -> Self {
        let store = Self::new();
        store.chains.lock().insert(
            0,
            StoredChain {
                fork_height: 0,
                parent: None,
                parent_hash: genesis.prev_block_hash,
                headers: vec![genesis],
            },
        );
        store
    }

    pub fn chain(&self, fork_height: u64) -> Option<StoredChain> {
        self.chains.lock().get(&fork_height).cloned()
    }
}

impl HeaderStore for MemoryHeaderStore {
    fn load_chains(&self) -> Result<Vec<StoredChain>> {
        Ok(self.chains.lock().values().cloned().collect())
    }

    fn header_saved(&self, fork_height: u64, header: &Header) -> Result<()> {
        let mut chains = self.chains.lock();
        let chain = chains
            .get_mut(&fork_height)
            .ok_or_else(|| anyhow!("no stored chain forks at height {fork_height}"))?;
        chain.headers.push(header.clone());
        Ok(())
    }

    fn fork_created(&self, fork_height: u64, parent: u64, parent_hash: Bytes32) -> Result<()> {
        self.chains.lock().insert(
            fork_height,
            StoredChain {
                fork_height,
                parent: Some(parent),
                parent_hash,
                headers: Vec::new(),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_saved_headers() {
        let store = MemoryHeaderStore::with_genesis(Header::genesis());
        let next = Header {
            prev_block_hash: Header::genesis().hash(),
            height: 1,
            ..Header::default()
        };

        store.header_saved(0, &next).unwrap();
        assert_eq!(store.chain(0).unwrap().headers.len(), 2);
    }

    #[test]
    fn unknown_fork_is_an_error() {
        let store = MemoryHeaderStore::new();
        assert!(store.header_saved(3, &Header::default()).is_err());
    }

    #[test]
    fn fork_created_registers_empty_chain() {
        let store = MemoryHeaderStore::new();
        store.fork_created(5, 0, Bytes32::zero()).unwrap();

        let chains = store.load_chains().unwrap();
        assert_eq!(chains.len(), 1);
        assert!(chains[0].headers.is_empty());
    }
}
