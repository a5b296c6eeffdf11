/// Block notifications to header stream.
///
/// Backends publish a block together with the height of its parent, not its
/// own height. This is the only place that corrects for it.
use containers::{BlockNotification, Header};
use futures::StreamExt;
use futures::stream::BoxStream;

use super::Subscription;

/// Distance between the height a block notification reports and the height
/// of the block it carries.
pub const BLOCK_HEIGHT_OFFSET: u64 = 1;

pub fn header_from_block(notification: BlockNotification) -> Header {
    Header {
        height: notification.height + BLOCK_HEIGHT_OFFSET,
        ..notification.block.header
    }
}

/// Headers of the blocks pushed over `blocks`, numbered by their own height.
pub fn block_headers(blocks: Subscription<BlockNotification>) -> BoxStream<'static, Header> {
    blocks.map(header_from_block).boxed()
}
