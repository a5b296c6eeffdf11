pub mod config;
pub mod error;
pub mod local_chain;
pub mod store;
pub mod table;
pub mod validation;

pub use error::ChainError;
pub use local_chain::LocalChain;
pub use store::{HeaderStore, MemoryHeaderStore, StoredChain};
pub use table::{AppendOutcome, ChainSummary, ChainTable, ExtendOutcome};
pub use validation::{AcceptAll, CheckpointValidator, HeaderValidator};
