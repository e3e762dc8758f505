use lccd_consensus::money::Amount;
use lccd_consensus::Hash256;
use lccd_primitives::transaction::Transaction;

use crate::policy::FeeRate;

/// A pool transaction with the aggregates of its in-pool ancestors and
/// descendants. Both aggregates count the entry itself.
#[derive(Clone, Debug)]
pub struct MempoolEntry {
    pub txid: Hash256,
    pub tx: Transaction,
    pub fee: Amount,
    pub size: u64,
    pub time: i64,
    pub height: i32,
    pub spends_coinbase: bool,
    pub(crate) fee_delta: Amount,
    pub(crate) parents: Vec<Hash256>,
    pub(crate) count_with_ancestors: u64,
    pub(crate) size_with_ancestors: u64,
    pub(crate) fees_with_ancestors: Amount,
    pub(crate) count_with_descendants: u64,
    pub(crate) size_with_descendants: u64,
    pub(crate) fees_with_descendants: Amount,
}

impl MempoolEntry {
    pub fn new(tx: Transaction, fee: Amount, time: i64, height: i32, spends_coinbase: bool) -> Self {
        let txid = tx.txid();
        let size = tx.serialized_size() as u64;
        Self {
            txid,
            tx,
            fee,
            size,
            time,
            height,
            spends_coinbase,
            fee_delta: 0,
            parents: Vec::new(),
            count_with_ancestors: 1,
            size_with_ancestors: size,
            fees_with_ancestors: fee,
            count_with_descendants: 1,
            size_with_descendants: size,
            fees_with_descendants: fee,
        }
    }

    /// Fee after `prioritise_transaction` adjustments.
    pub fn modified_fee(&self) -> Amount {
        self.fee.saturating_add(self.fee_delta)
    }

    pub fn fee_rate(&self) -> FeeRate {
        FeeRate::from_fee(self.modified_fee(), self.size)
    }

    pub fn parents(&self) -> &[Hash256] {
        &self.parents
    }

    pub fn count_with_ancestors(&self) -> u64 {
        self.count_with_ancestors
    }

    pub fn size_with_ancestors(&self) -> u64 {
        self.size_with_ancestors
    }

    pub fn fees_with_ancestors(&self) -> Amount {
        self.fees_with_ancestors
    }

    pub fn count_with_descendants(&self) -> u64 {
        self.count_with_descendants
    }

    pub fn size_with_descendants(&self) -> u64 {
        self.size_with_descendants
    }

    pub fn fees_with_descendants(&self) -> Amount {
        self.fees_with_descendants
    }

    /// Eviction score: the higher of the entry's own rate and the rate of the
    /// package it forms with its descendants. A child paying for its parent
    /// keeps the parent in the pool.
    pub fn descendant_score(&self) -> FeeRate {
        let package = FeeRate::from_fee(self.fees_with_descendants, self.size_with_descendants);
        self.fee_rate().max(package)
    }

    pub(crate) fn update_ancestor_state(&mut self, size: i64, fee: Amount, count: i64) {
        self.size_with_ancestors = self.size_with_ancestors.saturating_add_signed(size);
        self.fees_with_ancestors = self.fees_with_ancestors.saturating_add(fee);
        self.count_with_ancestors = self.count_with_ancestors.saturating_add_signed(count);
        debug_assert!(self.count_with_ancestors > 0);
    }

    pub(crate) fn update_descendant_state(&mut self, size: i64, fee: Amount, count: i64) {
        self.size_with_descendants = self.size_with_descendants.saturating_add_signed(size);
        self.fees_with_descendants = self.fees_with_descendants.saturating_add(fee);
        self.count_with_descendants = self.count_with_descendants.saturating_add_signed(count);
        debug_assert!(self.count_with_descendants > 0);
    }
}
