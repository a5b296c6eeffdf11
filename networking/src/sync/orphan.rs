use chain::ChainTable;
use containers::Header;
/// Orphan handling.
///
/// An orphan is a live header that neither extends a chain tip nor is
/// already stored. What happens to it is up to an `OrphanPolicy`.
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanAction {
    Drop,
    /// Start a new fork of the chain forked at `parent`.
    Fork { parent: u64 },
}

impl OrphanAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrphanAction::Drop => "drop",
            OrphanAction::Fork { .. } => "fork",
        }
    }
}

pub trait OrphanPolicy: Send + Sync {
    fn on_orphan(&self, header: &Header, chains: &ChainTable) -> OrphanAction;
}

/// Drops every orphan.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreOrphans;

impl OrphanPolicy for IgnoreOrphans {
    fn on_orphan(&self, _header: &Header, _chains: &ChainTable) -> OrphanAction {
        OrphanAction::Drop
    }
}

/// Forks when the orphan's parent is a stored header below some chain's tip.
/// Orphans with an unknown parent are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForkOnKnownParent;

impl OrphanPolicy for ForkOnKnownParent {
    fn on_orphan(&self, header: &Header, chains: &ChainTable) -> OrphanAction {
        match chains.find_fork_point(header) {
            Some(parent) => OrphanAction::Fork { parent },
            None => {
                debug!(height = header.height, "Orphan parent unknown");
                OrphanAction::Drop
            }
        }
    }
}
