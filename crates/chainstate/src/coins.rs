//! Layered coin views: a read-only base overlaid by an in-memory cache that
//! can be flushed into its parent or discarded.

use std::collections::HashMap;
use std::fmt;

use lccd_consensus::money::{money_range, Amount};
use lccd_consensus::Hash256;
use lccd_primitives::outpoint::OutPoint;
use lccd_primitives::script::is_unspendable;
use lccd_primitives::transaction::Transaction;
use lccd_storage::StoreError;

use crate::utxo::Coin;

/// Height assigned to coins created by pool transactions.
pub const MEMPOOL_HEIGHT: i32 = 0x7fff_ffff;

const DIRTY: u8 = 1 << 0;
const FRESH: u8 = 1 << 1;

#[derive(Debug)]
pub enum CoinsError {
    Store(StoreError),
    Overwrite(OutPoint),
    MissingInput(OutPoint),
    ValueOutOfRange,
    Internal(&'static str),
}

impl fmt::Display for CoinsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoinsError::Store(err) => write!(f, "{err}"),
            CoinsError::Overwrite(outpoint) => {
                write!(f, "attempted to overwrite an unspent coin {outpoint}")
            }
            CoinsError::MissingInput(outpoint) => write!(f, "missing input {outpoint}"),
            CoinsError::ValueOutOfRange => write!(f, "input values out of range"),
            CoinsError::Internal(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for CoinsError {}

impl From<StoreError> for CoinsError {
    fn from(err: StoreError) -> Self {
        CoinsError::Store(err)
    }
}

pub trait CoinsView {
    /// Returns the unspent coin at `outpoint`, if any.
    fn get_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, CoinsError>;

    fn have_coin(&self, outpoint: &OutPoint) -> Result<bool, CoinsError> {
        Ok(self.get_coin(outpoint)?.is_some())
    }

    fn best_block(&self) -> Result<Option<Hash256>, CoinsError>;
}

/// One dirty overlay entry handed to a parent on flush. `coin` is `None` for a
/// spend. `fresh` promises the parent has no unspent coin at this outpoint.
#[derive(Clone, Debug)]
pub struct CoinChange {
    pub outpoint: OutPoint,
    pub coin: Option<Coin>,
    pub fresh: bool,
}

pub trait CoinsWriter {
    fn batch_write(
        &mut self,
        changes: Vec<CoinChange>,
        best_block: Option<Hash256>,
    ) -> Result<(), CoinsError>;
}

impl<T: CoinsView + ?Sized> CoinsView for &T {
    fn get_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, CoinsError> {
        (**self).get_coin(outpoint)
    }

    fn best_block(&self) -> Result<Option<Hash256>, CoinsError> {
        (**self).best_block()
    }
}

impl<T: CoinsView + ?Sized> CoinsView for &mut T {
    fn get_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, CoinsError> {
        (**self).get_coin(outpoint)
    }

    fn best_block(&self) -> Result<Option<Hash256>, CoinsError> {
        (**self).best_block()
    }
}

impl<T: CoinsWriter + ?Sized> CoinsWriter for &mut T {
    fn batch_write(
        &mut self,
        changes: Vec<CoinChange>,
        best_block: Option<Hash256>,
    ) -> Result<(), CoinsError> {
        (**self).batch_write(changes, best_block)
    }
}

#[derive(Clone, Debug)]
struct CacheEntry {
    outpoint: OutPoint,
    coin: Option<Coin>,
    flags: u8,
}

/// A mutable overlay on top of `base`. Entries live in a slot arena indexed by
/// outpoint; a missing base coin is memoized as a spent FRESH entry so the base
/// is asked at most once per outpoint.
pub struct CoinsViewCache<B> {
    base: B,
    slots: Vec<CacheEntry>,
    index: HashMap<OutPoint, usize>,
    best_block: Option<Hash256>,
}

impl<B: CoinsView> CoinsViewCache<B> {
    pub fn new(base: B) -> Self {
        Self {
            base,
            slots: Vec::new(),
            index: HashMap::new(),
            best_block: None,
        }
    }

    pub fn base(&self) -> &B {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut B {
        &mut self.base
    }

    /// Number of cached entries, spent tombstones included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn fetch(&mut self, outpoint: &OutPoint) -> Result<usize, CoinsError> {
        if let Some(slot) = self.index.get(outpoint) {
            return Ok(*slot);
        }
        let coin = self.base.get_coin(outpoint)?;
        let flags = if coin.is_none() { FRESH } else { 0 };
        Ok(self.insert_slot(CacheEntry {
            outpoint: *outpoint,
            coin,
            flags,
        }))
    }

    fn insert_slot(&mut self, entry: CacheEntry) -> usize {
        let slot = self.slots.len();
        self.index.insert(entry.outpoint, slot);
        self.slots.push(entry);
        slot
    }

    fn remove_slot(&mut self, slot: usize) {
        let removed = self.slots.swap_remove(slot);
        self.index.remove(&removed.outpoint);
        if let Some(moved) = self.slots.get(slot) {
            self.index.insert(moved.outpoint, slot);
        }
    }

    pub fn access_coin(&mut self, outpoint: &OutPoint) -> Result<Option<&Coin>, CoinsError> {
        let slot = self.fetch(outpoint)?;
        Ok(self.slots[slot].coin.as_ref())
    }

    pub fn have_coin_in_cache(&self, outpoint: &OutPoint) -> bool {
        self.index
            .get(outpoint)
            .is_some_and(|slot| self.slots[*slot].coin.is_some())
    }

    /// Adds a coin. Unless `possible_overwrite` is set, replacing an unspent coin
    /// is an error. Provably unspendable outputs are never stored.
    pub fn add_coin(
        &mut self,
        outpoint: OutPoint,
        coin: Coin,
        possible_overwrite: bool,
    ) -> Result<(), CoinsError> {
        if is_unspendable(&coin.script_pubkey) {
            return Ok(());
        }
        let slot = match self.index.get(&outpoint) {
            Some(slot) => *slot,
            None => self.insert_slot(CacheEntry {
                outpoint,
                coin: None,
                flags: 0,
            }),
        };
        let entry = &mut self.slots[slot];
        let mut fresh = false;
        if !possible_overwrite {
            if entry.coin.is_some() {
                return Err(CoinsError::Overwrite(outpoint));
            }
            // A dirty tombstone may still hide an unspent coin in the parent.
            fresh = entry.flags & DIRTY == 0;
        }
        entry.coin = Some(coin);
        entry.flags |= DIRTY | if fresh { FRESH } else { 0 };
        Ok(())
    }

    /// Spends the coin, returning it. `None` means the input is unknown or
    /// already spent.
    pub fn spend_coin(&mut self, outpoint: &OutPoint) -> Result<Option<Coin>, CoinsError> {
        let slot = self.fetch(outpoint)?;
        let entry = &mut self.slots[slot];
        let Some(coin) = entry.coin.take() else {
            return Ok(None);
        };
        if entry.flags & FRESH != 0 {
            self.remove_slot(slot);
        } else {
            entry.flags |= DIRTY;
        }
        Ok(Some(coin))
    }

    /// Drops a clean cached entry. Dirty entries are kept.
    pub fn uncache(&mut self, outpoint: &OutPoint) {
        if let Some(slot) = self.index.get(outpoint).copied() {
            if self.slots[slot].flags == 0 {
                self.remove_slot(slot);
            }
        }
    }

    pub fn have_inputs(&mut self, tx: &Transaction) -> Result<bool, CoinsError> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        for input in &tx.vin {
            if self.access_coin(&input.prevout)?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Sum of the values of `tx`'s inputs.
    pub fn get_value_in(&mut self, tx: &Transaction) -> Result<Amount, CoinsError> {
        if tx.is_coinbase() {
            return Ok(0);
        }
        let mut total: Amount = 0;
        for input in &tx.vin {
            let coin = self
                .access_coin(&input.prevout)?
                .ok_or(CoinsError::MissingInput(input.prevout))?;
            total = total
                .checked_add(coin.value)
                .filter(|sum| money_range(*sum))
                .ok_or(CoinsError::ValueOutOfRange)?;
        }
        Ok(total)
    }

    pub fn set_best_block(&mut self, hash: Hash256) {
        self.best_block = Some(hash);
    }

    pub fn get_best_block(&mut self) -> Result<Option<Hash256>, CoinsError> {
        if self.best_block.is_none() {
            self.best_block = self.base.best_block()?;
        }
        Ok(self.best_block)
    }

    /// Drops every cached entry without writing anything.
    pub fn discard(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.best_block = None;
    }

    fn dirty_changes(&self) -> Vec<CoinChange> {
        self.slots
            .iter()
            .filter(|entry| entry.flags & DIRTY != 0)
            .map(|entry| CoinChange {
                outpoint: entry.outpoint,
                coin: entry.coin.clone(),
                fresh: entry.flags & FRESH != 0,
            })
            .collect()
    }
}

impl<B: CoinsView + CoinsWriter> CoinsViewCache<B> {
    /// Writes dirty entries into the parent and empties the cache. On error
    /// the cache keeps every entry, so the flush can be retried.
    pub fn flush(&mut self) -> Result<usize, CoinsError> {
        let changes = self.dirty_changes();
        let written = changes.len();
        self.base.batch_write(changes, self.best_block)?;
        self.discard();
        Ok(written)
    }
}

impl<B: CoinsView> CoinsView for CoinsViewCache<B> {
    fn get_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, CoinsError> {
        match self.index.get(outpoint) {
            Some(slot) => Ok(self.slots[*slot].coin.clone()),
            None => self.base.get_coin(outpoint),
        }
    }

    fn best_block(&self) -> Result<Option<Hash256>, CoinsError> {
        match self.best_block {
            Some(hash) => Ok(Some(hash)),
            None => self.base.best_block(),
        }
    }
}

impl<B: CoinsView> CoinsWriter for CoinsViewCache<B> {
    fn batch_write(
        &mut self,
        changes: Vec<CoinChange>,
        best_block: Option<Hash256>,
    ) -> Result<(), CoinsError> {
        for change in changes {
            match self.index.get(&change.outpoint).copied() {
                None => {
                    // A fresh spend never reached anything below the child.
                    if change.fresh && change.coin.is_none() {
                        continue;
                    }
                    let flags = DIRTY | if change.fresh { FRESH } else { 0 };
                    self.insert_slot(CacheEntry {
                        outpoint: change.outpoint,
                        coin: change.coin,
                        flags,
                    });
                }
                Some(slot) => {
                    let entry = &mut self.slots[slot];
                    if change.fresh && entry.coin.is_some() {
                        return Err(CoinsError::Internal(
                            "FRESH flag misapplied to cache entry for base transaction with spendable outputs",
                        ));
                    }
                    if entry.flags & FRESH != 0 && change.coin.is_none() {
                        self.remove_slot(slot);
                    } else {
                        entry.coin = change.coin;
                        entry.flags |= DIRTY;
                    }
                }
            }
        }
        if let Some(hash) = best_block {
            self.best_block = Some(hash);
        }
        Ok(())
    }
}

/// Adds every output of `tx` at `height`. Coinbases may overwrite, matching
/// historical duplicate coinbase transactions.
pub fn add_coins<B: CoinsView>(
    cache: &mut CoinsViewCache<B>,
    tx: &Transaction,
    height: i32,
) -> Result<(), CoinsError> {
    let txid = tx.txid();
    let is_coinbase = tx.is_coinbase();
    for (index, output) in tx.vout.iter().enumerate() {
        cache.add_coin(
            OutPoint::new(txid, index as u32),
            Coin::from_output(output, height, is_coinbase),
            is_coinbase,
        )?;
    }
    Ok(())
}

/// Exposes pool transaction outputs as coins at [`MEMPOOL_HEIGHT`] on top of
/// another view.
pub struct MempoolCoinsView<'a, B> {
    base: B,
    pool: &'a lccd_mempool::TxMemPool,
}

impl<'a, B: CoinsView> MempoolCoinsView<'a, B> {
    pub fn new(base: B, pool: &'a lccd_mempool::TxMemPool) -> Self {
        Self { base, pool }
    }
}

impl<B: CoinsView> CoinsView for MempoolCoinsView<'_, B> {
    fn get_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, CoinsError> {
        if let Some(output) = self.pool.output(outpoint) {
            return Ok(Some(Coin::from_output(output, MEMPOOL_HEIGHT, false)));
        }
        self.base.get_coin(outpoint)
    }

    fn best_block(&self) -> Result<Option<Hash256>, CoinsError> {
        self.base.best_block()
    }
}
