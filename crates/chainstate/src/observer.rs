//! Notifications published by [`ChainState`](crate::state::ChainState) after
//! its locks are released.

use lccd_mempool::{MempoolEntry, RemovalReason};
use lccd_primitives::block::Block;

pub trait ValidationObserver: Send + Sync {
    fn transaction_accepted(&self, _entry: &MempoolEntry) {}

    fn transaction_removed(&self, _entry: &MempoolEntry, _reason: RemovalReason) {}

    fn block_connected(&self, _block: &Block, _height: i32) {}
}
