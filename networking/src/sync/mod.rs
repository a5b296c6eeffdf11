/// Header-chain synchronization.
///
/// Keeps a set of local chains (one per fork) current against remote
/// ledger servers:
///
/// - **Matching**: pairs every chain with the connected servers whose chain
///   agrees with it at the chain's height
/// - **Catch-up**: backfills each chain from its first matching server
/// - **Monitoring**: follows every server's live header feed and routes each
///   header onto a chain tip, ignores it as a duplicate, or hands it to the
///   orphan policy
///
/// ## State Machine
///
/// - **IDLE**: catch-up not run, or nothing matched
/// - **SYNCING**: catch-up in progress
/// - **SYNCED**: caught up, monitoring keeps chains current
pub mod config;
pub mod orphan;
pub mod states;
pub mod synchronizer;

pub use config::*;
pub use orphan::{ForkOnKnownParent, IgnoreOrphans, OrphanAction, OrphanPolicy};
pub use states::SyncState;
pub use synchronizer::{ChainSynchronizer, HeaderDisposition, MonitorHandle};

#[cfg(test)]
mod tests;
