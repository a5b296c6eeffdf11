use std::fmt;
use std::sync::Arc;

use containers::{Bytes32, Header, U256};

use crate::{ChainError, HeaderValidator};

/// One fork: a contiguous, validated run of headers starting at `fork_height`.
///
/// The first header links to `parent_hash`, the hash of the parent chain's
/// header at `fork_height - 1` (all zeroes for the chain rooted at genesis).
/// Every later header links to its predecessor. Headers are only ever
/// appended.
#[derive(Clone)]
pub struct LocalChain {
    fork_height: u64,
    parent: Option<u64>,
    parent_hash: Bytes32,
    headers: Vec<Header>,
    hashes: Vec<Bytes32>,
    /// Cumulative work of this segment, one entry per stored header.
    work: Vec<U256>,
    validator: Arc<dyn HeaderValidator>,
}

impl LocalChain {
    /// The root chain, holding the genesis header at height 0.
    pub fn genesis(genesis: Header, validator: Arc<dyn HeaderValidator>) -> Self {
        let mut chain = Self {
            fork_height: 0,
            parent: None,
            parent_hash: genesis.prev_block_hash,
            headers: Vec::new(),
            hashes: Vec::new(),
            work: Vec::new(),
            validator,
        };
        chain.push(Header { height: 0, ..genesis });
        chain
    }

    /// An empty fork of `parent` whose first header will sit at `fork_height`.
    pub fn fork(
        parent: u64,
        fork_height: u64,
        parent_hash: Bytes32,
        validator: Arc<dyn HeaderValidator>,
    ) -> Result<Self, ChainError> {
        if fork_height == 0 {
            return Err(ChainError::ForkAtGenesis);
        }

        Ok(Self {
            fork_height,
            parent: Some(parent),
            parent_hash,
            headers: Vec::new(),
            hashes: Vec::new(),
            work: Vec::new(),
            validator,
        })
    }

    /// Rebuild a chain from persisted headers, re-checking linkage.
    pub fn restore(
        fork_height: u64,
        parent: Option<u64>,
        parent_hash: Bytes32,
        headers: Vec<Header>,
        validator: Arc<dyn HeaderValidator>,
    ) -> Result<Self, ChainError> {
        let mut chain = match parent {
            Some(parent) => Self::fork(parent, fork_height, parent_hash, validator)?,
            None => Self {
                fork_height,
                parent: None,
                parent_hash,
                headers: Vec::new(),
                hashes: Vec::new(),
                work: Vec::new(),
                validator,
            },
        };

        for header in headers {
            if !chain.can_connect_at(&header, fork_height + chain.headers.len() as u64) {
                return Err(ChainError::Discontinuous {
                    height: header.height,
                    expected: chain.tip_hash(),
                });
            }
            chain.push(header);
        }

        Ok(chain)
    }

    pub fn fork_height(&self) -> u64 {
        self.fork_height
    }

    /// Fork height of the chain this one branched from.
    pub fn parent(&self) -> Option<u64> {
        self.parent
    }

    pub fn parent_hash(&self) -> Bytes32 {
        self.parent_hash
    }

    /// Current tip height. For an empty fork this is `fork_height - 1`.
    pub fn height(&self) -> u64 {
        (self.fork_height + self.headers.len() as u64).saturating_sub(1)
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    pub fn tip(&self) -> Option<&Header> {
        self.headers.last()
    }

    /// Hash the next header has to reference.
    pub fn tip_hash(&self) -> Bytes32 {
        self.hashes.last().copied().unwrap_or(self.parent_hash)
    }

    pub fn header_at(&self, height: u64) -> Option<&Header> {
        let index = height.checked_sub(self.fork_height)?;
        self.headers.get(index as usize)
    }

    pub fn hash_at(&self, height: u64) -> Option<Bytes32> {
        let index = height.checked_sub(self.fork_height)?;
        self.hashes.get(index as usize).copied()
    }

    /// Whether this exact header is stored in this chain.
    pub fn contains(&self, header: &Header) -> bool {
        self.header_at(header.height)
            .is_some_and(|stored| stored == header)
    }

    pub fn validator(&self) -> Arc<dyn HeaderValidator> {
        self.validator.clone()
    }

    /// Whether `header` is acceptable for its height.
    pub fn check_header(&self, header: &Header) -> bool {
        self.validator.check_header(header)
    }

    /// Whether `header` links onto this chain.
    ///
    /// With `check_height` the header must extend the tip: it references the
    /// tip hash and sits at `height() + 1`.
    ///
    /// Without it, the header is tested for structural compatibility at its own
    /// height: it must reference this chain's header at `header.height - 1`
    /// (or the parent link when it would be the first header of the fork).
    /// A header at `height() + 1` therefore gets the same answer both ways.
    /// Nothing precedes the root header, so at the root chain's first height
    /// the header has to be the stored root itself.
    pub fn can_connect(&self, header: &Header, check_height: bool) -> bool {
        if check_height {
            return self.can_connect_at(header, self.height() + 1) && !self.tip_is_unset();
        }

        if self.parent.is_none() && header.height == self.fork_height {
            return self.hash_at(header.height) == Some(header.hash());
        }

        self.linking_hash(header.height) == Some(header.prev_block_hash)
    }

    /// Append a header. The caller must have established
    /// `can_connect(&header, true)`.
    pub fn save_header(&mut self, header: Header) {
        assert!(
            self.can_connect(&header, true),
            "header at height {} does not extend chain forked at {}",
            header.height,
            self.fork_height
        );
        self.push(header);
    }

    /// Double SHA-256 of the canonical header serialization.
    pub fn get_hash(header: &Header) -> Bytes32 {
        header.hash()
    }

    /// Whether `header` branches off this chain below its tip.
    pub fn forks_from(&self, header: &Header) -> bool {
        header.height <= self.height()
            && header.height > self.fork_height
            && self.can_connect(header, false)
            && !self.contains(header)
    }

    /// Work of this segment's headers up to and including `height`.
    ///
    /// Heights below the fork yield zero; heights above the tip yield the
    /// whole segment.
    pub fn work_through(&self, height: u64) -> U256 {
        let Some(offset) = height.checked_sub(self.fork_height) else {
            return U256::zero();
        };
        let index = (offset as usize).min(self.work.len());
        if index == self.work.len() {
            self.segment_work()
        } else {
            self.work[index]
        }
    }

    pub fn segment_work(&self) -> U256 {
        self.work.last().copied().unwrap_or_default()
    }

    fn can_connect_at(&self, header: &Header, height: u64) -> bool {
        header.height == height && header.prev_block_hash == self.tip_hash()
    }

    // An empty root chain has no tip to extend from.
    fn tip_is_unset(&self) -> bool {
        self.parent.is_none() && self.headers.is_empty()
    }

    fn linking_hash(&self, height: u64) -> Option<Bytes32> {
        if height == self.fork_height {
            Some(self.parent_hash)
        } else {
            height
                .checked_sub(1)
                .and_then(|previous| self.hash_at(previous))
        }
    }

    fn push(&mut self, header: Header) {
        let work = self.segment_work() + header.target().work();
        self.hashes.push(header.hash());
        self.work.push(work);
        self.headers.push(header);
    }
}

impl fmt::Debug for LocalChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalChain")
            .field("fork_height", &self.fork_height)
            .field("parent", &self.parent)
            .field("height", &self.height())
            .field("tip_hash", &self.tip_hash())
            .finish()
    }
}
