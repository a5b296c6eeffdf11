use std::collections::BTreeMap;
use std::sync::Arc;

use containers::{Bytes32, Header, U256};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::{ChainError, HeaderStore, HeaderValidator, LocalChain};

/// Result of appending a header to one specific chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Saved,
    /// The identical header is already stored at that height.
    AlreadyStored,
    /// The header links but fails `check_header`.
    Rejected,
    /// The header does not extend the tip.
    NotConnected,
}

/// Result of offering a header to every chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendOutcome {
    Saved(u64),
    Rejected(u64),
    NoMatch,
}

/// Summary of one chain, used for best-chain selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSummary {
    pub fork_height: u64,
    pub height: u64,
    pub tip_hash: Bytes32,
    /// Work from genesis to the tip, following parent chains.
    pub total_work: U256,
}

/// Every known chain, keyed by fork height.
///
/// All mutation goes through the table's write lock, so appends to a given
/// chain are serialized and strictly height-increasing no matter how many
/// tasks feed headers in. The lock is never held across an await point.
pub struct ChainTable {
    chains: RwLock<BTreeMap<u64, LocalChain>>,
    store: Option<Arc<dyn HeaderStore>>,
}

impl ChainTable {
    pub fn new(chains: impl IntoIterator<Item = LocalChain>) -> Self {
        Self {
            chains: RwLock::new(
                chains
                    .into_iter()
                    .map(|chain| (chain.fork_height(), chain))
                    .collect(),
            ),
            store: None,
        }
    }

    /// Load every persisted chain and keep the store notified of changes.
    pub fn load(
        store: Arc<dyn HeaderStore>,
        validator: Arc<dyn HeaderValidator>,
    ) -> Result<Self, ChainError> {
        let mut chains = BTreeMap::new();

        for stored in store.load_chains()? {
            let chain = LocalChain::restore(
                stored.fork_height,
                stored.parent,
                stored.parent_hash,
                stored.headers,
                validator.clone(),
            )?;
            info!(
                fork_height = chain.fork_height(),
                height = chain.height(),
                "Loaded header chain"
            );
            chains.insert(chain.fork_height(), chain);
        }

        Ok(Self {
            chains: RwLock::new(chains),
            store: Some(store),
        })
    }

    pub fn len(&self) -> usize {
        self.chains.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.read().is_empty()
    }

    /// Fork heights in ascending order.
    pub fn fork_heights(&self) -> Vec<u64> {
        self.chains.read().keys().copied().collect()
    }

    pub fn height(&self, fork_height: u64) -> Option<u64> {
        self.chains.read().get(&fork_height).map(LocalChain::height)
    }

    /// Run `f` against a chain under the read lock.
    pub fn with_chain<R>(&self, fork_height: u64, f: impl FnOnce(&LocalChain) -> R) -> Option<R> {
        self.chains.read().get(&fork_height).map(f)
    }

    pub fn snapshot(&self, fork_height: u64) -> Option<LocalChain> {
        self.chains.read().get(&fork_height).cloned()
    }

    /// Append `header` to the chain forked at `fork_height`.
    ///
    /// Linkage and validity are re-checked under the write lock, so a header
    /// fetched while another task advanced the chain is classified instead of
    /// breaking the chain.
    pub fn append(&self, fork_height: u64, header: Header) -> Result<AppendOutcome, ChainError> {
        let mut chains = self.chains.write();
        let chain = chains
            .get_mut(&fork_height)
            .ok_or(ChainError::UnknownFork(fork_height))?;

        if chain.contains(&header) {
            return Ok(AppendOutcome::AlreadyStored);
        }
        if !chain.can_connect(&header, true) {
            return Ok(AppendOutcome::NotConnected);
        }
        if !chain.check_header(&header) {
            warn!(fork_height, height = header.height, "Rejected invalid header");
            return Ok(AppendOutcome::Rejected);
        }

        self.commit(chain, header)?;
        Ok(AppendOutcome::Saved)
    }

    /// Append `header` to the first chain, lowest fork height first, whose tip
    /// it extends.
    ///
    /// A store failure leaves every chain unchanged.
    pub fn extend_any(&self, header: &Header) -> Result<ExtendOutcome, ChainError> {
        let mut chains = self.chains.write();

        let Some(chain) = chains
            .values_mut()
            .find(|chain| chain.can_connect(header, true))
        else {
            return Ok(ExtendOutcome::NoMatch);
        };

        let fork_height = chain.fork_height();
        if !chain.check_header(header) {
            warn!(fork_height, height = header.height, "Rejected invalid header");
            return Ok(ExtendOutcome::Rejected(fork_height));
        }

        self.commit(chain, header.clone())?;
        Ok(ExtendOutcome::Saved(fork_height))
    }

    /// Whether the identical header is stored in any chain.
    pub fn contains(&self, header: &Header) -> bool {
        self.chains.read().values().any(|chain| chain.contains(header))
    }

    /// Fork height of the chain that `header` branches off below its tip.
    pub fn find_fork_point(&self, header: &Header) -> Option<u64> {
        self.chains
            .read()
            .values()
            .find(|chain| chain.forks_from(header))
            .map(LocalChain::fork_height)
    }

    /// Start a new fork of `parent` whose first header is `header`.
    ///
    /// Returns the new chain's fork height, which is `header.height`.
    /// The fork inherits the parent chain's validator. Once the store has
    /// registered the fork it stays in the table, even if persisting
    /// `header` then fails.
    pub fn insert_fork(&self, parent: u64, header: Header) -> Result<u64, ChainError> {
        let mut chains = self.chains.write();
        let fork_height = header.height;

        if chains.contains_key(&fork_height) {
            return Err(ChainError::ForkHeightTaken(fork_height));
        }

        let parent_chain = chains.get(&parent).ok_or(ChainError::UnknownFork(parent))?;
        if !parent_chain.forks_from(&header) {
            return Err(ChainError::Discontinuous {
                height: header.height,
                expected: parent_chain
                    .hash_at(fork_height.saturating_sub(1))
                    .unwrap_or_default(),
            });
        }

        let chain = LocalChain::fork(
            parent,
            fork_height,
            header.prev_block_hash,
            parent_chain.validator(),
        )?;
        if !chain.check_header(&header) {
            warn!(fork_height, "Rejected invalid fork header");
            return Err(ChainError::InvalidHeader(fork_height));
        }

        if let Some(store) = &self.store {
            store.fork_created(fork_height, parent, header.prev_block_hash)?;
        }

        let chain = chains.entry(fork_height).or_insert(chain);
        info!(fork_height, parent, "Registered new fork");
        self.commit(chain, header)?;

        Ok(fork_height)
    }

    pub fn summaries(&self) -> Vec<ChainSummary> {
        let chains = self.chains.read();
        chains
            .values()
            .map(|chain| ChainSummary {
                fork_height: chain.fork_height(),
                height: chain.height(),
                tip_hash: chain.tip_hash(),
                total_work: work_up_to(&chains, chain.fork_height(), chain.height()),
            })
            .collect()
    }

    /// Persist first, so the store never misses a header the table holds.
    fn commit(&self, chain: &mut LocalChain, header: Header) -> Result<(), ChainError> {
        let fork_height = chain.fork_height();
        if let Some(store) = &self.store {
            if let Err(err) = store.header_saved(fork_height, &header) {
                warn!(fork_height, height = header.height, "Failed to persist header: {err:?}");
                return Err(ChainError::Store(err));
            }
        }

        debug!(fork_height, height = header.height, "Saved header");
        chain.save_header(header);
        Ok(())
    }
}

fn work_up_to(chains: &BTreeMap<u64, LocalChain>, fork_height: u64, height: u64) -> U256 {
    let Some(chain) = chains.get(&fork_height) else {
        return U256::zero();
    };

    let own = chain.work_through(height);
    match chain.parent() {
        Some(parent) if parent < fork_height => {
            own + work_up_to(chains, parent, fork_height - 1)
        }
        _ => own,
    }
}
