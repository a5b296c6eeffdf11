use containers::Bytes32;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("no chain forks at height {0}")]
    UnknownFork(u64),

    #[error("a chain already forks at height {0}")]
    ForkHeightTaken(u64),

    #[error("fork height must be above genesis")]
    ForkAtGenesis,

    #[error("header at height {height} does not link to {expected}")]
    Discontinuous { height: u64, expected: Bytes32 },

    #[error("header at height {0} fails validation")]
    InvalidHeader(u64),

    #[error("header store failure: {0}")]
    Store(#[from] anyhow::Error),
}
