pub mod block;
pub mod header;
pub mod types;

pub use block::{Block, BlockNotification};
pub use header::{Header, HEADER_SIZE};
pub use types::{Bytes32, CompactTarget};
pub use ethereum_types::U256;
