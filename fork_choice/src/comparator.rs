/// Best-chain selection.
///
/// Which fork counts as the main chain is a policy decision, so the rule is
/// injected as a `ChainComparator`. Two rules are provided: the tallest tip
/// and the most cumulative proof-of-work.
use std::cmp::Ordering;

use chain::{ChainSummary, ChainTable};

pub trait ChainComparator: Send + Sync {
    /// `Ordering::Greater` when `a` is the better chain.
    fn compare(&self, a: &ChainSummary, b: &ChainSummary) -> Ordering;
}

/// Prefers the higher tip; ties go to the older fork (lower fork height).
#[derive(Debug, Clone, Copy, Default)]
pub struct LongestChain;

impl ChainComparator for LongestChain {
    fn compare(&self, a: &ChainSummary, b: &ChainSummary) -> Ordering {
        a.height
            .cmp(&b.height)
            .then_with(|| b.fork_height.cmp(&a.fork_height))
    }
}

/// Prefers the chain with more cumulative work from genesis; ties go to the
/// older fork.
#[derive(Debug, Clone, Copy, Default)]
pub struct MostWork;

impl ChainComparator for MostWork {
    fn compare(&self, a: &ChainSummary, b: &ChainSummary) -> Ordering {
        a.total_work
            .cmp(&b.total_work)
            .then_with(|| b.fork_height.cmp(&a.fork_height))
    }
}

/// Pick the best of the given summaries.
pub fn select_best<'a>(
    summaries: &'a [ChainSummary],
    comparator: &dyn ChainComparator,
) -> Option<&'a ChainSummary> {
    summaries
        .iter()
        .max_by(|a, b| comparator.compare(a, b))
}

/// Fork height of the best chain in `table`.
pub fn best_chain(table: &ChainTable, comparator: &dyn ChainComparator) -> Option<u64> {
    let summaries = table.summaries();
    select_best(&summaries, comparator).map(|best| best.fork_height)
}
