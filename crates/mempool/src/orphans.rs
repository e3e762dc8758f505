//! Transactions whose inputs are not known yet, held until a parent arrives.

use std::collections::{HashMap, HashSet};

use lccd_consensus::Hash256;
use lccd_primitives::outpoint::OutPoint;
use lccd_primitives::transaction::Transaction;

const MAX_ORPHAN_TX_SIZE: usize = 100_000;
const ORPHAN_TTL_SECS: i64 = 20 * 60;

#[derive(Clone, Debug)]
struct OrphanTx {
    tx: Transaction,
    received: i64,
}

#[derive(Debug, Default)]
pub struct OrphanPool {
    orphans: HashMap<Hash256, OrphanTx>,
    by_prev: HashMap<OutPoint, HashSet<Hash256>>,
    max_orphans: usize,
}

impl OrphanPool {
    pub fn new(max_orphans: usize) -> Self {
        Self {
            orphans: HashMap::new(),
            by_prev: HashMap::new(),
            max_orphans,
        }
    }

    pub fn len(&self) -> usize {
        self.orphans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orphans.is_empty()
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.orphans.contains_key(txid)
    }

    /// Stores `tx`, evicting the oldest orphans first when the pool is full.
    /// Returns false when the transaction is not kept.
    pub fn add(&mut self, tx: Transaction, now: i64) -> bool {
        if self.max_orphans == 0 || tx.serialized_size() > MAX_ORPHAN_TX_SIZE {
            return false;
        }
        let txid = tx.txid();
        if self.orphans.contains_key(&txid) {
            return false;
        }
        self.prune_expired(now);
        while self.orphans.len() >= self.max_orphans {
            if !self.evict_oldest() {
                break;
            }
        }
        for input in &tx.vin {
            self.by_prev.entry(input.prevout).or_default().insert(txid);
        }
        self.orphans.insert(txid, OrphanTx { tx, received: now });
        true
    }

    /// Removes and returns the orphans spending any output of `parent`.
    pub fn take_children(&mut self, parent: &Transaction) -> Vec<Transaction> {
        let parent_txid = parent.txid();
        let mut txids: Vec<Hash256> = Vec::new();
        for index in 0..parent.vout.len() as u32 {
            if let Some(children) = self.by_prev.get(&OutPoint::new(parent_txid, index)) {
                for txid in children {
                    if !txids.contains(txid) {
                        txids.push(*txid);
                    }
                }
            }
        }
        txids
            .into_iter()
            .filter_map(|txid| self.remove(&txid))
            .collect()
    }

    /// Drops orphans a block made unspendable: those it includes and those
    /// spending an outpoint one of its transactions spends.
    pub fn erase_for_block(&mut self, transactions: &[Transaction]) -> usize {
        let mut doomed: HashSet<Hash256> = HashSet::new();
        for tx in transactions {
            let txid = tx.txid();
            if self.orphans.contains_key(&txid) {
                doomed.insert(txid);
            }
            for input in &tx.vin {
                if let Some(spenders) = self.by_prev.get(&input.prevout) {
                    doomed.extend(spenders.iter().copied());
                }
            }
        }
        let erased = doomed.len();
        for txid in doomed {
            self.remove(&txid);
        }
        erased
    }

    pub fn remove(&mut self, txid: &Hash256) -> Option<Transaction> {
        let orphan = self.orphans.remove(txid)?;
        for input in &orphan.tx.vin {
            let now_empty = match self.by_prev.get_mut(&input.prevout) {
                Some(spenders) => {
                    spenders.remove(txid);
                    spenders.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.by_prev.remove(&input.prevout);
            }
        }
        Some(orphan.tx)
    }

    fn evict_oldest(&mut self) -> bool {
        let Some(oldest) = self
            .orphans
            .iter()
            .min_by_key(|(txid, orphan)| (orphan.received, **txid))
            .map(|(txid, _)| *txid)
        else {
            return false;
        };
        self.remove(&oldest);
        true
    }

    fn prune_expired(&mut self, now: i64) {
        let cutoff = now.saturating_sub(ORPHAN_TTL_SECS);
        let stale: Vec<Hash256> = self
            .orphans
            .iter()
            .filter(|(_, orphan)| orphan.received <= cutoff)
            .map(|(txid, _)| *txid)
            .collect();
        for txid in stale {
            self.remove(&txid);
        }
    }
}
