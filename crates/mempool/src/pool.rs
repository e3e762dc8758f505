use std::collections::{HashMap, HashSet, VecDeque};

use lccd_consensus::money::Amount;
use lccd_consensus::Hash256;
use lccd_log::{log_category, Category};
use lccd_primitives::hash::hash256_to_hex;
use lccd_primitives::outpoint::OutPoint;
use lccd_primitives::transaction::{Transaction, TxOut};

use crate::entry::MempoolEntry;
use crate::error::MempoolError;
use crate::orphans::OrphanPool;
use crate::policy::{FeeRate, MempoolConfig};

/// Half-life of the rolling minimum fee, in seconds.
const ROLLING_FEE_HALFLIFE: f64 = 60.0 * 60.0 * 12.0;
/// Ancestor count above which the package fee rate is checked.
const PACKAGE_ANCESTOR_THRESHOLD: usize = 6;
const MAX_REPLACEMENT_CANDIDATES: usize = 100;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RemovalReason {
    Block,
    Conflict,
    Expiry,
    SizeLimit,
    Replaced,
}

#[derive(Clone, Debug)]
pub struct RemovedEntry {
    pub entry: MempoolEntry,
    pub reason: RemovalReason,
}

/// Chain limits applied by [`TxMemPool::calculate_mempool_ancestors`].
#[derive(Clone, Copy, Debug)]
pub struct AncestorLimits {
    pub max_ancestors: usize,
    pub max_ancestor_size: u64,
    pub max_descendants: u64,
    pub max_descendant_size: u64,
    /// Minimum package fee rate once an entry has many ancestors.
    pub package_fee_floor: FeeRate,
}

impl AncestorLimits {
    pub fn unlimited() -> Self {
        Self {
            max_ancestors: usize::MAX,
            max_ancestor_size: u64::MAX,
            max_descendants: u64::MAX,
            max_descendant_size: u64::MAX,
            package_fee_floor: FeeRate::ZERO,
        }
    }
}

pub struct TxMemPool {
    config: MempoolConfig,
    entries: HashMap<Hash256, MempoolEntry>,
    spent: HashMap<OutPoint, Hash256>,
    children: HashMap<Hash256, Vec<Hash256>>,
    deltas: HashMap<Hash256, Amount>,
    orphans: OrphanPool,
    total_bytes: u64,
    rolling_minimum_fee_rate: f64,
    last_rolling_fee_update: i64,
    block_since_last_rolling_fee_bump: bool,
    revision: u64,
}

impl TxMemPool {
    pub fn new(config: MempoolConfig) -> Self {
        let orphans = OrphanPool::new(config.max_orphans);
        Self {
            config,
            entries: HashMap::new(),
            spent: HashMap::new(),
            children: HashMap::new(),
            deltas: HashMap::new(),
            orphans,
            total_bytes: 0,
            rolling_minimum_fee_rate: 0.0,
            last_rolling_fee_update: 0,
            block_since_last_rolling_fee_bump: false,
            revision: 0,
        }
    }

    pub fn config(&self) -> &MempoolConfig {
        &self.config
    }

    /// Bumped on every insertion and removal.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of entry sizes, the figure trimming compares against its limit.
    pub fn usage(&self) -> u64 {
        self.total_bytes
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn get(&self, txid: &Hash256) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    pub fn entries(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.entries.values()
    }

    pub fn spender(&self, outpoint: &OutPoint) -> Option<Hash256> {
        self.spent.get(outpoint).copied()
    }

    /// Output `outpoint` of a pool transaction.
    pub fn output(&self, outpoint: &OutPoint) -> Option<&TxOut> {
        self.entries
            .get(&outpoint.hash)?
            .tx
            .vout
            .get(outpoint.index as usize)
    }

    pub fn orphans(&self) -> &OrphanPool {
        &self.orphans
    }

    pub fn orphans_mut(&mut self) -> &mut OrphanPool {
        &mut self.orphans
    }

    /// Limits from the pool configuration, with the package floor evaluated
    /// at `now`.
    pub fn ancestor_limits(&mut self, now: i64) -> AncestorLimits {
        let min_fee = self.get_min_fee(self.config.max_bytes as u64, now);
        AncestorLimits {
            max_ancestors: self.config.ancestor_limit,
            max_ancestor_size: self.config.ancestor_size_limit,
            max_descendants: self.config.descendant_limit,
            max_descendant_size: self.config.descendant_size_limit,
            package_fee_floor: self.config.incremental_relay_fee.max(min_fee),
        }
    }

    fn in_pool_parents(&self, tx: &Transaction) -> Vec<Hash256> {
        let mut parents = Vec::new();
        for input in &tx.vin {
            let hash = input.prevout.hash;
            if self.entries.contains_key(&hash) && !parents.contains(&hash) {
                parents.push(hash);
            }
        }
        parents
    }

    /// Breadth-first walk over the in-pool parents of `entry`, enforcing the
    /// ancestor and descendant ceilings of every package it would join.
    pub fn calculate_mempool_ancestors(
        &self,
        entry: &MempoolEntry,
        limits: &AncestorLimits,
    ) -> Result<HashSet<Hash256>, String> {
        let mut ancestors: HashSet<Hash256> = HashSet::new();
        let mut queue: VecDeque<Hash256> = VecDeque::new();
        for parent in self.in_pool_parents(&entry.tx) {
            if ancestors.insert(parent) {
                queue.push_back(parent);
            }
        }
        if ancestors.len().saturating_add(1) > limits.max_ancestors {
            return Err(format!(
                "too many ancestors: {} > {}",
                ancestors.len() + 1,
                limits.max_ancestors
            ));
        }
        while let Some(current) = queue.pop_front() {
            let Some(current) = self.entries.get(&current) else {
                continue;
            };
            for parent in &current.parents {
                if ancestors.insert(*parent) {
                    if ancestors.len().saturating_add(1) > limits.max_ancestors {
                        return Err(format!(
                            "too many ancestors: {} > {}",
                            ancestors.len() + 1,
                            limits.max_ancestors
                        ));
                    }
                    queue.push_back(*parent);
                }
            }
        }

        let mut total_size = entry.size;
        let mut total_fees = entry.modified_fee();
        for ancestor in &ancestors {
            let Some(ancestor) = self.entries.get(ancestor) else {
                continue;
            };
            total_size = total_size.saturating_add(ancestor.size);
            total_fees = total_fees.saturating_add(ancestor.modified_fee());
            if ancestor.count_with_descendants.saturating_add(1) > limits.max_descendants {
                return Err("would exceed descendant limit".to_string());
            }
            if ancestor.size_with_descendants.saturating_add(entry.size) > limits.max_descendant_size {
                return Err("would exceed descendant size limit".to_string());
            }
        }
        if total_size > limits.max_ancestor_size {
            return Err("exceeds ancestor size limit".to_string());
        }

        if ancestors.len() > PACKAGE_ANCESTOR_THRESHOLD {
            let package_rate = FeeRate::from_fee(total_fees, total_size);
            if package_rate < limits.package_fee_floor {
                return Err(format!(
                    "package feerate too low: {} < {} (ancestors={})",
                    package_rate,
                    limits.package_fee_floor,
                    ancestors.len()
                ));
            }
        }
        Ok(ancestors)
    }

    /// Inserts `entry` whose ancestor set was computed by
    /// [`Self::calculate_mempool_ancestors`], wiring the spend graph and
    /// updating every aggregate it touches.
    pub fn add_unchecked(&mut self, mut entry: MempoolEntry, ancestors: &HashSet<Hash256>) {
        if let Some(delta) = self.deltas.get(&entry.txid) {
            entry.fee_delta = *delta;
        }
        let txid = entry.txid;
        let modified_fee = entry.modified_fee();
        entry.parents = self.in_pool_parents(&entry.tx);
        entry.count_with_ancestors = 1;
        entry.size_with_ancestors = entry.size;
        entry.fees_with_ancestors = modified_fee;
        entry.count_with_descendants = 1;
        entry.size_with_descendants = entry.size;
        entry.fees_with_descendants = modified_fee;

        for ancestor in ancestors {
            if let Some(ancestor) = self.entries.get_mut(ancestor) {
                ancestor.update_descendant_state(entry.size as i64, modified_fee, 1);
                entry.size_with_ancestors = entry.size_with_ancestors.saturating_add(ancestor.size);
                entry.fees_with_ancestors =
                    entry.fees_with_ancestors.saturating_add(ancestor.modified_fee());
                entry.count_with_ancestors += 1;
            }
        }
        for parent in &entry.parents {
            let children = self.children.entry(*parent).or_default();
            if !children.contains(&txid) {
                children.push(txid);
            }
        }
        for input in &entry.tx.vin {
            self.spent.insert(input.prevout, txid);
        }
        self.total_bytes = self.total_bytes.saturating_add(entry.size);
        self.entries.insert(txid, entry);
        self.revision = self.revision.saturating_add(1);
    }

    /// Adds `txid` and everything that spends it, transitively, to `out`.
    pub fn calculate_descendants(&self, txid: &Hash256, out: &mut HashSet<Hash256>) {
        let mut stage = vec![*txid];
        while let Some(current) = stage.pop() {
            if !out.insert(current) {
                continue;
            }
            if let Some(children) = self.children.get(&current) {
                stage.extend(children.iter().filter(|child| !out.contains(*child)));
            }
        }
    }

    fn unlimited_ancestors(&self, txid: &Hash256) -> HashSet<Hash256> {
        let mut ancestors = HashSet::new();
        let mut queue: VecDeque<Hash256> = VecDeque::new();
        if let Some(entry) = self.entries.get(txid) {
            queue.extend(entry.parents.iter().copied());
        }
        while let Some(current) = queue.pop_front() {
            if !ancestors.insert(current) {
                continue;
            }
            if let Some(entry) = self.entries.get(&current) {
                queue.extend(entry.parents.iter().copied());
            }
        }
        ancestors
    }

    /// Removes every entry in `stage`. With `update_descendants` the
    /// surviving descendants drop the removed entries from their ancestor
    /// aggregates, which is only needed when a parent leaves without its
    /// children (block confirmation).
    fn remove_staged(
        &mut self,
        stage: &HashSet<Hash256>,
        update_descendants: bool,
        reason: RemovalReason,
    ) -> Vec<RemovedEntry> {
        if update_descendants {
            for txid in stage {
                let Some((size, fee)) = self
                    .entries
                    .get(txid)
                    .map(|entry| (entry.size as i64, entry.modified_fee()))
                else {
                    continue;
                };
                let mut descendants = HashSet::new();
                self.calculate_descendants(txid, &mut descendants);
                descendants.remove(txid);
                for descendant in descendants {
                    if let Some(descendant) = self.entries.get_mut(&descendant) {
                        descendant.update_ancestor_state(-size, -fee, -1);
                    }
                }
            }
        }

        let ancestor_sets: Vec<(Hash256, HashSet<Hash256>)> = stage
            .iter()
            .map(|txid| (*txid, self.unlimited_ancestors(txid)))
            .collect();
        for (txid, ancestors) in ancestor_sets {
            let Some((size, fee)) = self
                .entries
                .get(&txid)
                .map(|entry| (entry.size as i64, entry.modified_fee()))
            else {
                continue;
            };
            for ancestor in ancestors {
                if let Some(ancestor) = self.entries.get_mut(&ancestor) {
                    ancestor.update_descendant_state(-size, -fee, -1);
                }
            }
        }

        let mut removed = Vec::with_capacity(stage.len());
        for txid in stage {
            if let Some(entry) = self.remove_unchecked(txid) {
                removed.push(RemovedEntry { entry, reason });
            }
        }
        removed
    }

    fn remove_unchecked(&mut self, txid: &Hash256) -> Option<MempoolEntry> {
        let entry = self.entries.remove(txid)?;
        for input in &entry.tx.vin {
            if self.spent.get(&input.prevout) == Some(txid) {
                self.spent.remove(&input.prevout);
            }
        }
        for parent in &entry.parents {
            let now_empty = match self.children.get_mut(parent) {
                Some(children) => {
                    children.retain(|child| child != txid);
                    children.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.children.remove(parent);
            }
        }
        if let Some(children) = self.children.remove(txid) {
            for child in children {
                if let Some(child) = self.entries.get_mut(&child) {
                    child.parents.retain(|parent| parent != txid);
                }
            }
        }
        self.total_bytes = self.total_bytes.saturating_sub(entry.size);
        self.revision = self.revision.saturating_add(1);
        Some(entry)
    }

    /// Removes `tx` with all of its descendants. When `tx` is not in the
    /// pool, the pool entries spending its outputs are removed instead.
    pub fn remove_recursive(&mut self, tx: &Transaction, reason: RemovalReason) -> Vec<RemovedEntry> {
        let txid = tx.txid();
        let mut roots = Vec::new();
        if self.entries.contains_key(&txid) {
            roots.push(txid);
        } else {
            for index in 0..tx.vout.len() as u32 {
                if let Some(spender) = self.spent.get(&OutPoint::new(txid, index)) {
                    roots.push(*spender);
                }
            }
        }
        let mut stage = HashSet::new();
        for root in roots {
            self.calculate_descendants(&root, &mut stage);
        }
        self.remove_staged(&stage, false, reason)
    }

    fn remove_conflicts(&mut self, tx: &Transaction, txid: &Hash256) -> Vec<RemovedEntry> {
        let mut removed = Vec::new();
        for input in &tx.vin {
            let Some(spender) = self.spent.get(&input.prevout).copied() else {
                continue;
            };
            if spender == *txid {
                continue;
            }
            let Some(conflict) = self.entries.get(&spender).map(|entry| entry.tx.clone()) else {
                continue;
            };
            self.deltas.remove(&spender);
            removed.extend(self.remove_recursive(&conflict, RemovalReason::Conflict));
        }
        removed
    }

    /// Drops transactions confirmed by a block at `height`, keeping their
    /// descendants, then everything that conflicts with the block. Marks the
    /// rolling fee as having seen a block at `now`.
    pub fn remove_for_block(
        &mut self,
        transactions: &[Transaction],
        height: i32,
        now: i64,
    ) -> Vec<RemovedEntry> {
        let mut removed = Vec::new();
        for tx in transactions {
            let txid = tx.txid();
            if self.entries.contains_key(&txid) {
                let stage: HashSet<Hash256> = std::iter::once(txid).collect();
                removed.extend(self.remove_staged(&stage, true, RemovalReason::Block));
            }
            removed.extend(self.remove_conflicts(tx, &txid));
            self.deltas.remove(&txid);
        }
        let erased = self.orphans.erase_for_block(transactions);
        self.last_rolling_fee_update = now;
        self.block_since_last_rolling_fee_bump = true;
        log_category!(
            Category::Mempool,
            "block {height}: removed {} pool entries, {erased} orphans",
            removed.len()
        );
        removed
    }

    /// Removes entries that entered before `cutoff`, with their descendants.
    pub fn expire(&mut self, cutoff: i64) -> Vec<RemovedEntry> {
        let old: Vec<Hash256> = self
            .entries
            .values()
            .filter(|entry| entry.time < cutoff)
            .map(|entry| entry.txid)
            .collect();
        let mut stage = HashSet::new();
        for txid in &old {
            self.calculate_descendants(txid, &mut stage);
        }
        let removed = self.remove_staged(&stage, false, RemovalReason::Expiry);
        if !removed.is_empty() {
            log_category!(Category::Mempool, "expired {} pool entries", removed.len());
        }
        removed
    }

    fn worst_descendant_score(&self) -> Option<Hash256> {
        self.entries
            .values()
            .min_by(|a, b| {
                a.descendant_score()
                    .cmp(&b.descendant_score())
                    .then_with(|| b.time.cmp(&a.time))
                    .then_with(|| a.txid.cmp(&b.txid))
            })
            .map(|entry| entry.txid)
    }

    /// Evicts the lowest descendant-score packages until usage fits `limit`,
    /// raising the rolling minimum fee past each removed package's rate.
    pub fn trim_to_size(&mut self, limit: u64) -> Vec<RemovedEntry> {
        let mut removed = Vec::new();
        while self.total_bytes > limit {
            let Some(worst) = self.worst_descendant_score() else {
                break;
            };
            let Some(entry) = self.entries.get(&worst) else {
                break;
            };
            let package_rate =
                FeeRate::from_fee(entry.fees_with_descendants, entry.size_with_descendants);
            let tx = entry.tx.clone();
            let removed_rate = package_rate.saturating_add(self.config.incremental_relay_fee);
            self.track_package_removed(removed_rate);

            let evicted = self.remove_recursive(&tx, RemovalReason::SizeLimit);
            log_category!(
                Category::Mempool,
                "trimmed package of {} at {} (floor now {:.0} per kB)",
                evicted.len(),
                package_rate,
                self.rolling_minimum_fee_rate
            );
            removed.extend(evicted);
        }
        removed
    }

    fn track_package_removed(&mut self, rate: FeeRate) {
        let rate = rate.fee_per_kb() as f64;
        if rate > self.rolling_minimum_fee_rate {
            self.rolling_minimum_fee_rate = rate;
            self.block_since_last_rolling_fee_bump = false;
        }
    }

    /// Minimum fee rate for admission while the pool is bounded by
    /// `size_limit`. The floor raised by trimming decays with a twelve hour
    /// half-life once a block has been seen, faster while the pool is less
    /// than half full.
    pub fn get_min_fee(&mut self, size_limit: u64, now: i64) -> FeeRate {
        if !self.block_since_last_rolling_fee_bump || self.rolling_minimum_fee_rate == 0.0 {
            return FeeRate::per_kb(self.rolling_minimum_fee_rate.round() as Amount);
        }
        if now > self.last_rolling_fee_update + 10 {
            let mut halflife = ROLLING_FEE_HALFLIFE;
            let usage = self.usage();
            if usage < size_limit / 4 {
                halflife /= 4.0;
            } else if usage < size_limit / 2 {
                halflife /= 2.0;
            }
            let elapsed = (now - self.last_rolling_fee_update) as f64;
            self.rolling_minimum_fee_rate /= 2f64.powf(elapsed / halflife);
            self.last_rolling_fee_update = now;

            let incremental = self.config.incremental_relay_fee.fee_per_kb() as f64;
            if self.rolling_minimum_fee_rate < incremental / 2.0 {
                self.rolling_minimum_fee_rate = 0.0;
                return FeeRate::ZERO;
            }
        }
        FeeRate::per_kb(self.rolling_minimum_fee_rate.round() as Amount)
            .max(self.config.incremental_relay_fee)
    }

    /// Whether `txid` or any in-pool ancestor opts into replacement.
    pub fn signals_replaceable(&self, txid: &Hash256) -> bool {
        let Some(entry) = self.entries.get(txid) else {
            return false;
        };
        if entry.tx.signals_opt_in_rbf() {
            return true;
        }
        self.unlimited_ancestors(txid).iter().any(|ancestor| {
            self.entries
                .get(ancestor)
                .is_some_and(|entry| entry.tx.signals_opt_in_rbf())
        })
    }

    /// Pool entries spending any input of `tx`.
    pub fn conflicts_of(&self, tx: &Transaction) -> HashSet<Hash256> {
        tx.vin
            .iter()
            .filter_map(|input| self.spent.get(&input.prevout).copied())
            .collect()
    }

    /// Checks whether `entry` may replace `conflicts`, returning the full set
    /// of entries it would evict.
    pub fn check_replacement(
        &self,
        entry: &MempoolEntry,
        conflicts: &HashSet<Hash256>,
    ) -> Result<HashSet<Hash256>, MempoolError> {
        if !self.config.enable_replacement {
            return Err(MempoolError::conflict("replacement disabled"));
        }
        let new_rate = entry.fee_rate();
        for txid in conflicts {
            let Some(conflict) = self.entries.get(txid) else {
                continue;
            };
            if !self.signals_replaceable(txid) {
                return Err(MempoolError::conflict(format!(
                    "{} is not replaceable",
                    hash256_to_hex(txid)
                )));
            }
            if new_rate <= conflict.fee_rate() {
                return Err(MempoolError::conflict(format!(
                    "insufficient fee rate: {} <= {}",
                    new_rate,
                    conflict.fee_rate()
                )));
            }
        }

        let mut evicted = HashSet::new();
        for txid in conflicts {
            self.calculate_descendants(txid, &mut evicted);
            if evicted.len() > MAX_REPLACEMENT_CANDIDATES {
                return Err(MempoolError::conflict(format!(
                    "too many potential replacements: {} > {}",
                    evicted.len(),
                    MAX_REPLACEMENT_CANDIDATES
                )));
            }
        }

        let evicted_fees = evicted
            .iter()
            .filter_map(|txid| self.entries.get(txid))
            .fold(0 as Amount, |acc, conflict| acc.saturating_add(conflict.modified_fee()));
        if entry.modified_fee() <= evicted_fees {
            return Err(MempoolError::conflict(format!(
                "insufficient fee: {} <= {}",
                entry.modified_fee(),
                evicted_fees
            )));
        }
        for input in &entry.tx.vin {
            if evicted.contains(&input.prevout.hash) {
                return Err(MempoolError::conflict(format!(
                    "spends conflicting transaction {}",
                    hash256_to_hex(&input.prevout.hash)
                )));
            }
        }
        Ok(evicted)
    }

    /// Evicts the entries a successful replacement displaces.
    pub fn remove_replaced(&mut self, evicted: &HashSet<Hash256>) -> Vec<RemovedEntry> {
        self.remove_staged(evicted, false, RemovalReason::Replaced)
    }

    /// Adjusts the fee `txid` is ranked by, now or when it arrives later.
    pub fn prioritise_transaction(&mut self, txid: Hash256, fee_delta: Amount) {
        let delta = self.deltas.entry(txid).or_default();
        *delta = delta.saturating_add(fee_delta);
        let Some(entry) = self.entries.get_mut(&txid) else {
            return;
        };
        entry.fee_delta = entry.fee_delta.saturating_add(fee_delta);
        entry.fees_with_ancestors = entry.fees_with_ancestors.saturating_add(fee_delta);
        entry.fees_with_descendants = entry.fees_with_descendants.saturating_add(fee_delta);

        for ancestor in self.unlimited_ancestors(&txid) {
            if let Some(ancestor) = self.entries.get_mut(&ancestor) {
                ancestor.update_descendant_state(0, fee_delta, 0);
            }
        }
        let mut descendants = HashSet::new();
        self.calculate_descendants(&txid, &mut descendants);
        descendants.remove(&txid);
        for descendant in descendants {
            if let Some(descendant) = self.entries.get_mut(&descendant) {
                descendant.update_ancestor_state(0, fee_delta, 0);
            }
        }
        self.revision = self.revision.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lccd_primitives::transaction::TxIn;

    fn tx_spending(prevouts: &[OutPoint], outputs: usize, sequence: u32) -> Transaction {
        Transaction {
            version: 1,
            vin: prevouts
                .iter()
                .map(|prevout| TxIn {
                    prevout: *prevout,
                    script_sig: vec![0x01, 0x01],
                    sequence,
                })
                .collect(),
            vout: (0..outputs)
                .map(|_| TxOut::new(10_000, vec![0x51]))
                .collect(),
            lock_time: 0,
        }
    }

    fn add(pool: &mut TxMemPool, tx: Transaction, fee: Amount, time: i64) -> Hash256 {
        let entry = MempoolEntry::new(tx, fee, time, 1, false);
        let txid = entry.txid;
        let ancestors = pool
            .calculate_mempool_ancestors(&entry, &AncestorLimits::unlimited())
            .expect("ancestors");
        pool.add_unchecked(entry, &ancestors);
        txid
    }

    #[test]
    fn aggregates_track_parent_and_child() {
        let mut pool = TxMemPool::new(MempoolConfig::default());
        let parent = tx_spending(&[OutPoint::new([1u8; 32], 0)], 1, u32::MAX);
        let parent_id = add(&mut pool, parent.clone(), 1_000, 0);
        let child = tx_spending(&[OutPoint::new(parent_id, 0)], 1, u32::MAX);
        let child_id = add(&mut pool, child.clone(), 2_000, 0);

        let parent_entry = pool.get(&parent_id).expect("parent");
        assert_eq!(parent_entry.count_with_descendants(), 2);
        assert_eq!(parent_entry.fees_with_descendants(), 3_000);
        let child_entry = pool.get(&child_id).expect("child");
        assert_eq!(child_entry.count_with_ancestors(), 2);
        assert_eq!(child_entry.parents(), &[parent_id]);

        pool.remove_for_block(&[parent], 2, 100);
        let child_entry = pool.get(&child_id).expect("child survives");
        assert_eq!(child_entry.count_with_ancestors(), 1);
        assert_eq!(child_entry.size_with_ancestors(), child_entry.size);
        assert!(child_entry.parents().is_empty());
        assert_eq!(pool.usage(), child_entry.size);
    }

    #[test]
    fn ancestor_count_limit_reports_counts() {
        let mut pool = TxMemPool::new(MempoolConfig::default());
        let mut prev = OutPoint::new([1u8; 32], 0);
        for _ in 0..3 {
            let txid = add(&mut pool, tx_spending(&[prev], 1, u32::MAX), 1_000, 0);
            prev = OutPoint::new(txid, 0);
        }
        let limits = AncestorLimits {
            max_ancestors: 3,
            ..AncestorLimits::unlimited()
        };
        let entry = MempoolEntry::new(tx_spending(&[prev], 1, u32::MAX), 1_000, 0, 1, false);
        assert_eq!(
            pool.calculate_mempool_ancestors(&entry, &limits),
            Err("too many ancestors: 4 > 3".to_string())
        );
    }

    #[test]
    fn descendant_limits_guard_every_ancestor() {
        let mut pool = TxMemPool::new(MempoolConfig::default());
        let root = add(
            &mut pool,
            tx_spending(&[OutPoint::new([1u8; 32], 0)], 3, u32::MAX),
            1_000,
            0,
        );
        add(&mut pool, tx_spending(&[OutPoint::new(root, 0)], 1, u32::MAX), 1_000, 0);

        let entry = MempoolEntry::new(
            tx_spending(&[OutPoint::new(root, 1)], 1, u32::MAX),
            1_000,
            0,
            1,
            false,
        );
        let count_limited = AncestorLimits {
            max_descendants: 2,
            ..AncestorLimits::unlimited()
        };
        assert_eq!(
            pool.calculate_mempool_ancestors(&entry, &count_limited),
            Err("would exceed descendant limit".to_string())
        );

        let root_size = pool.get(&root).expect("root").size_with_descendants();
        let size_limited = AncestorLimits {
            max_descendant_size: root_size + entry.size - 1,
            ..AncestorLimits::unlimited()
        };
        assert_eq!(
            pool.calculate_mempool_ancestors(&entry, &size_limited),
            Err("would exceed descendant size limit".to_string())
        );

        let ancestor_size_limited = AncestorLimits {
            max_ancestor_size: entry.size,
            ..AncestorLimits::unlimited()
        };
        assert_eq!(
            pool.calculate_mempool_ancestors(&entry, &ancestor_size_limited),
            Err("exceeds ancestor size limit".to_string())
        );
    }

    #[test]
    fn long_cheap_packages_need_the_floor() {
        let mut pool = TxMemPool::new(MempoolConfig::default());
        let mut prev = OutPoint::new([1u8; 32], 0);
        for _ in 0..7 {
            let txid = add(&mut pool, tx_spending(&[prev], 1, u32::MAX), 0, 0);
            prev = OutPoint::new(txid, 0);
        }
        let entry = MempoolEntry::new(tx_spending(&[prev], 1, u32::MAX), 10, 0, 1, false);
        let limits = AncestorLimits {
            package_fee_floor: FeeRate::per_kb(1000),
            ..AncestorLimits::unlimited()
        };
        let err = pool
            .calculate_mempool_ancestors(&entry, &limits)
            .expect_err("cheap package");
        assert!(err.starts_with("package feerate too low"), "{err}");

        let generous = MempoolEntry::new(tx_spending(&[prev], 1, u32::MAX), 1_000_000, 0, 1, false);
        assert_eq!(
            pool.calculate_mempool_ancestors(&generous, &limits)
                .expect("well paid")
                .len(),
            7
        );
    }

    #[test]
    fn remove_recursive_takes_descendants_and_spenders() {
        let mut pool = TxMemPool::new(MempoolConfig::default());
        let confirmed = tx_spending(&[OutPoint::new([1u8; 32], 0)], 1, u32::MAX);
        let child = add(
            &mut pool,
            tx_spending(&[OutPoint::new(confirmed.txid(), 0)], 1, u32::MAX),
            500,
            0,
        );
        add(&mut pool, tx_spending(&[OutPoint::new(child, 0)], 1, u32::MAX), 500, 0);

        let removed = pool.remove_recursive(&confirmed, RemovalReason::Conflict);
        assert_eq!(removed.len(), 2);
        assert!(pool.is_empty());
        assert_eq!(pool.usage(), 0);
        assert!(pool.spender(&OutPoint::new(child, 0)).is_none());
    }

    #[test]
    fn block_conflicts_are_removed_with_descendants() {
        let mut pool = TxMemPool::new(MempoolConfig::default());
        let funding = OutPoint::new([4u8; 32], 0);
        let in_pool = add(&mut pool, tx_spending(&[funding], 1, u32::MAX), 500, 0);
        add(&mut pool, tx_spending(&[OutPoint::new(in_pool, 0)], 1, u32::MAX), 500, 0);

        let mut rival = tx_spending(&[funding], 1, u32::MAX);
        rival.lock_time = 7;
        let removed = pool.remove_for_block(&[rival], 10, 0);
        assert_eq!(removed.len(), 2);
        assert!(removed.iter().all(|item| item.reason == RemovalReason::Conflict));
        assert!(pool.is_empty());
    }

    #[test]
    fn expiry_takes_descendants_of_old_entries() {
        let mut pool = TxMemPool::new(MempoolConfig::default());
        let old = add(
            &mut pool,
            tx_spending(&[OutPoint::new([1u8; 32], 0)], 1, u32::MAX),
            500,
            10,
        );
        add(&mut pool, tx_spending(&[OutPoint::new(old, 0)], 1, u32::MAX), 500, 1_000);
        add(
            &mut pool,
            tx_spending(&[OutPoint::new([2u8; 32], 0)], 1, u32::MAX),
            500,
            1_000,
        );
        assert_eq!(pool.expire(500).len(), 2);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn trimming_raises_and_decays_the_floor() {
        let mut pool = TxMemPool::new(MempoolConfig::default());
        let cheap = add(
            &mut pool,
            tx_spending(&[OutPoint::new([1u8; 32], 0)], 1, u32::MAX),
            100,
            0,
        );
        let rich = add(
            &mut pool,
            tx_spending(&[OutPoint::new([2u8; 32], 0)], 1, u32::MAX),
            50_000,
            0,
        );
        let cheap_rate = pool.get(&cheap).expect("cheap").fee_rate();
        let limit = pool.usage() - 1;

        let removed = pool.trim_to_size(limit);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].entry.txid, cheap);
        assert!(pool.contains(&rich));

        let floor = cheap_rate.saturating_add(FeeRate::per_kb(1000));
        // no block since the bump: the floor holds
        assert_eq!(pool.get_min_fee(1_000_000, 1_000_000), floor);

        pool.remove_for_block(&[], 5, 0);
        let decayed = pool.get_min_fee(1_000_000, ROLLING_FEE_HALFLIFE as i64 / 4);
        assert!(decayed < floor);
        assert!(pool.get_min_fee(1_000_000, 100 * ROLLING_FEE_HALFLIFE as i64) == FeeRate::ZERO);
    }

    #[test]
    fn child_paying_for_parent_outranks_standalone_tx() {
        let mut pool = TxMemPool::new(MempoolConfig::default());
        let parent = add(
            &mut pool,
            tx_spending(&[OutPoint::new([1u8; 32], 0)], 1, u32::MAX),
            10,
            0,
        );
        let child = add(
            &mut pool,
            tx_spending(&[OutPoint::new(parent, 0)], 1, u32::MAX),
            100_000,
            0,
        );
        let other = add(
            &mut pool,
            tx_spending(&[OutPoint::new([2u8; 32], 0)], 1, u32::MAX),
            1_000,
            0,
        );

        let parent_entry = pool.get(&parent).expect("parent");
        let other_entry = pool.get(&other).expect("other");
        assert!(parent_entry.fee_rate() < other_entry.fee_rate());
        assert!(parent_entry.descendant_score() > other_entry.descendant_score());

        let removed = pool.trim_to_size(pool.usage() - 1);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].entry.txid, other);
        assert!(pool.contains(&parent));
        assert!(pool.contains(&child));
    }

    #[test]
    fn cheap_child_is_trimmed_before_its_parent() {
        let mut pool = TxMemPool::new(MempoolConfig::default());
        let parent = add(
            &mut pool,
            tx_spending(&[OutPoint::new([1u8; 32], 0)], 1, u32::MAX),
            50_000,
            0,
        );
        let child = add(
            &mut pool,
            tx_spending(&[OutPoint::new(parent, 0)], 1, u32::MAX),
            10,
            0,
        );

        let removed = pool.trim_to_size(pool.usage() - 1);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].entry.txid, child);
        assert!(pool.contains(&parent));
        assert_eq!(pool.get(&parent).expect("parent").count_with_descendants(), 1);
    }

    #[test]
    fn prioritisation_moves_package_fees() {
        let mut pool = TxMemPool::new(MempoolConfig::default());
        let parent = add(
            &mut pool,
            tx_spending(&[OutPoint::new([1u8; 32], 0)], 1, u32::MAX),
            1_000,
            0,
        );
        let child = add(&mut pool, tx_spending(&[OutPoint::new(parent, 0)], 1, u32::MAX), 1_000, 0);
        pool.prioritise_transaction(parent, 5_000);
        assert_eq!(pool.get(&parent).expect("parent").modified_fee(), 6_000);
        assert_eq!(pool.get(&child).expect("child").fees_with_ancestors(), 7_000);
        assert_eq!(pool.get(&parent).expect("parent").fees_with_descendants(), 7_000);
    }
}
