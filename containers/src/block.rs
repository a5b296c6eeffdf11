use crate::Header;
use serde::{Deserialize, Serialize};

/// A full block as pushed on the block subscription channel.
///
/// Only the header is consumed by header synchronization; transactions are
/// carried opaquely.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Vec<u8>>,
}

/// One item of the block subscription: `(sequence, height, block)`.
///
/// `height` is exactly as the backend reported it, uncorrected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockNotification {
    pub sequence: u64,
    pub height: u64,
    pub block: Block,
}
