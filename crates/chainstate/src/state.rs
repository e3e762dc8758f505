//! The validation engine. Sequences coin lookups, proof checks, script batches
//! and pool admission for transactions and blocks.
//!
//! Locks are taken in one order: `validation`, `tree`, `versionbits`,
//! `coins`, `mempool`. Observers run after every lock is released.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use lccd_consensus::money::{money_range, Amount};
use lccd_consensus::params::PowType;
use lccd_consensus::{block_subsidy, ConsensusParams, Deployment, Hash256, ALL_DEPLOYMENTS};
use lccd_log::{log_category, Category};
use lccd_mempool::policy::check_standard;
use lccd_mempool::{
    MempoolConfig, MempoolEntry, MempoolError, MempoolErrorKind, RemovedEntry, TxMemPool,
};
use lccd_pow::difficulty::{get_difficulty, next_work_required};
use lccd_pow::hive::{BctCoin, HiveInfoError};
use lccd_pow::validation::validate_pow_header;
use lccd_pow::{
    check_hive_proof, network_hive_info, BctSource, BlockKind, BlockSource, HeaderInfo, HiveInfo,
    PowError, PowHasher,
};
use lccd_primitives::block::Block;
use lccd_primitives::hash256_to_hex;
use lccd_primitives::outpoint::OutPoint;
use lccd_primitives::transaction::Transaction;
use lccd_storage::{KeyValueStore, StoreError};
use rayon::prelude::*;

use crate::blockindex::{
    median_time_past, BlockIndexError, BlockTree, STATUS_CONNECTED, STATUS_FAILED,
    STATUS_HAVE_DATA,
};
use crate::checkqueue::CheckQueue;
use crate::coins::{add_coins, CoinsError, CoinsView, CoinsViewCache, MempoolCoinsView};
use crate::observer::ValidationObserver;
use crate::script::{
    ScriptCheck, ScriptFlags, ScriptVerifier, MANDATORY_SCRIPT_VERIFY_FLAGS,
    SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY, SCRIPT_VERIFY_CHECKSEQUENCEVERIFY,
    STANDARD_SCRIPT_VERIFY_FLAGS,
};
use crate::utxo::{Coin, StoreCoinsView};
use crate::validation::{
    check_block, check_block_context, check_transaction, check_tx_inputs, is_final_tx,
    RejectClass, ValidationError, ValidationOutcome,
};
use crate::versionbits::{DeploymentStats, ThresholdState, VersionBitsCache};

/// Script check workers, not counting the thread that waits on a batch.
pub const MAX_SCRIPTCHECK_THREADS: usize = 16;
pub const DEFAULT_SCRIPTCHECK_BATCH: usize = 128;

#[derive(Debug)]
pub enum ChainStateError {
    Validation(ValidationError),
    Coins(CoinsError),
    Store(StoreError),
    BlockIndex(BlockIndexError),
    Mempool(MempoolError),
    HiveInfo(HiveInfoError),
    Io(io::Error),
    DuplicateBlock(Hash256),
    KnownInvalid(Hash256),
    /// The block's parent is known but is not the active tip.
    NotOnTip(Hash256),
    NoBlockSource,
    Internal(&'static str),
}

impl ChainStateError {
    /// Class and reject reason reported for this failure.
    pub fn outcome(&self) -> ValidationOutcome {
        match self {
            ChainStateError::Validation(err) => {
                ValidationOutcome::new(RejectClass::Consensus, err.reason())
            }
            ChainStateError::Mempool(err) => {
                let class = match err.kind {
                    MempoolErrorKind::MissingInputs => RejectClass::Orphan,
                    MempoolErrorKind::Internal => RejectClass::Internal,
                    _ => RejectClass::Policy,
                };
                ValidationOutcome::new(class, err.reason)
            }
            ChainStateError::BlockIndex(BlockIndexError::UnknownParent(_)) => {
                ValidationOutcome::new(RejectClass::Orphan, "prev-blk-not-found")
            }
            ChainStateError::BlockIndex(BlockIndexError::Compact(_)) => {
                ValidationOutcome::new(RejectClass::Consensus, "bad-diffbits")
            }
            ChainStateError::Coins(CoinsError::MissingInput(_)) => {
                ValidationOutcome::new(RejectClass::Consensus, "bad-txns-inputs-missingorspent")
            }
            ChainStateError::Coins(CoinsError::ValueOutOfRange) => {
                ValidationOutcome::new(RejectClass::Consensus, "bad-txns-inputvalues-outofrange")
            }
            ChainStateError::DuplicateBlock(_) => {
                ValidationOutcome::new(RejectClass::Policy, "duplicate")
            }
            ChainStateError::KnownInvalid(_) => {
                ValidationOutcome::new(RejectClass::Consensus, "duplicate-invalid")
            }
            ChainStateError::NotOnTip(_) => {
                ValidationOutcome::new(RejectClass::Policy, "inconclusive-not-best-prevblk")
            }
            other => ValidationOutcome::new(RejectClass::Internal, other.to_string()),
        }
    }
}

impl fmt::Display for ChainStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainStateError::Validation(err) => write!(f, "{err}"),
            ChainStateError::Coins(err) => write!(f, "{err}"),
            ChainStateError::Store(err) => write!(f, "{err}"),
            ChainStateError::BlockIndex(err) => write!(f, "{err}"),
            ChainStateError::Mempool(err) => write!(f, "{err}"),
            ChainStateError::HiveInfo(err) => write!(f, "{err}"),
            ChainStateError::Io(err) => write!(f, "{err}"),
            ChainStateError::DuplicateBlock(hash) => {
                write!(f, "block {} already connected", hash256_to_hex(hash))
            }
            ChainStateError::KnownInvalid(hash) => {
                write!(f, "block {} previously failed validation", hash256_to_hex(hash))
            }
            ChainStateError::NotOnTip(hash) => {
                write!(f, "block {} does not extend the active tip", hash256_to_hex(hash))
            }
            ChainStateError::NoBlockSource => write!(f, "no block source configured"),
            ChainStateError::Internal(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for ChainStateError {}

impl From<ValidationError> for ChainStateError {
    fn from(err: ValidationError) -> Self {
        ChainStateError::Validation(err)
    }
}

impl From<CoinsError> for ChainStateError {
    fn from(err: CoinsError) -> Self {
        ChainStateError::Coins(err)
    }
}

impl From<StoreError> for ChainStateError {
    fn from(err: StoreError) -> Self {
        ChainStateError::Store(err)
    }
}

impl From<BlockIndexError> for ChainStateError {
    fn from(err: BlockIndexError) -> Self {
        ChainStateError::BlockIndex(err)
    }
}

impl From<MempoolError> for ChainStateError {
    fn from(err: MempoolError) -> Self {
        ChainStateError::Mempool(err)
    }
}

impl From<HiveInfoError> for ChainStateError {
    fn from(err: HiveInfoError) -> Self {
        ChainStateError::HiveInfo(err)
    }
}

impl From<io::Error> for ChainStateError {
    fn from(err: io::Error) -> Self {
        ChainStateError::Io(err)
    }
}

#[derive(Clone, Debug)]
pub struct ChainStateConfig {
    /// Script check workers; capped at [`MAX_SCRIPTCHECK_THREADS`].
    pub script_threads: usize,
    pub script_batch_size: usize,
    pub mempool: MempoolConfig,
}

impl Default for ChainStateConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|cores| cores.get())
            .unwrap_or(1);
        Self {
            script_threads: cores.saturating_sub(1).min(MAX_SCRIPTCHECK_THREADS),
            script_batch_size: DEFAULT_SCRIPTCHECK_BATCH,
            mempool: MempoolConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MempoolAccept {
    pub txid: Hash256,
    pub fee: Amount,
    /// Pool entries evicted by this transaction replacing them.
    pub replaced: Vec<Hash256>,
    /// Orphans admitted because this transaction supplied their inputs.
    pub orphans_accepted: Vec<Hash256>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectedBlock {
    pub hash: Hash256,
    pub height: i32,
    pub fees: Amount,
    pub mempool_removed: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeploymentInfo {
    pub state: ThresholdState,
    pub since_height: i32,
    /// Signalling in the current window while the deployment is STARTED.
    pub statistics: Option<DeploymentStats>,
}

#[derive(Default)]
struct Notices {
    accepted: Vec<MempoolEntry>,
    removed: Vec<RemovedEntry>,
}

struct Admitted {
    tx: Transaction,
    fee: Amount,
    replaced: Vec<Hash256>,
}

struct ResolvedInputs {
    fee: Amount,
    spends_coinbase: bool,
    spent: Vec<(Vec<u8>, Amount)>,
}

/// Coin and history lookups for the Hive gate.
struct HiveLookup<'a, B> {
    coins: &'a B,
    blocks: Option<&'a (dyn BlockSource + Send + Sync)>,
}

impl<B: CoinsView> BctSource for HiveLookup<'_, B> {
    fn coin(&self, outpoint: &OutPoint) -> Option<BctCoin> {
        match self.coins.get_coin(outpoint) {
            Ok(coin) => coin.map(|coin| BctCoin {
                value: coin.value,
                script_pubkey: coin.script_pubkey,
                height: coin.height,
            }),
            Err(err) => {
                lccd_log::log_warn!("bee creation lookup failed: {err}");
                None
            }
        }
    }

    fn transaction(&self, txid: &Hash256, claimed_height: i32) -> Option<(Transaction, i32)> {
        let block = self.blocks?.block_at(claimed_height)?;
        block
            .transactions
            .into_iter()
            .find(|tx| tx.txid() == *txid)
            .map(|tx| (tx, claimed_height))
    }
}

type TipCoins<S> = CoinsViewCache<StoreCoinsView<Arc<S>>>;

pub struct ChainState<S: KeyValueStore> {
    params: ConsensusParams,
    validation: Mutex<()>,
    tree: RwLock<BlockTree>,
    versionbits: Mutex<VersionBitsCache>,
    coins: Mutex<TipCoins<S>>,
    mempool: Mutex<TxMemPool>,
    script_queue: CheckQueue<ScriptCheck>,
    verifier: Arc<dyn ScriptVerifier>,
    hasher: Arc<dyn PowHasher>,
    blocks: Option<Arc<dyn BlockSource + Send + Sync>>,
    observers: Vec<Arc<dyn ValidationObserver>>,
}

fn lock<'a, T>(
    mutex: &'a Mutex<T>,
    what: &'static str,
) -> Result<MutexGuard<'a, T>, ChainStateError> {
    mutex.lock().map_err(|_| ChainStateError::Internal(what))
}

impl<S: KeyValueStore> ChainState<S> {
    /// Opens the chain state over `store` with `genesis` as the only block.
    /// An empty store is initialised at genesis.
    pub fn new(
        store: Arc<S>,
        genesis: &Block,
        params: ConsensusParams,
        config: ChainStateConfig,
        verifier: Arc<dyn ScriptVerifier>,
        hasher: Arc<dyn PowHasher>,
    ) -> Result<Self, ChainStateError> {
        let genesis_hash = genesis.header.hash();
        let tree = BlockTree::new(&genesis.header)?;
        let mut coins = CoinsViewCache::new(StoreCoinsView::new(store));
        match coins.get_best_block()? {
            None => {
                coins.set_best_block(genesis_hash);
                coins.flush()?;
            }
            Some(best) if best == genesis_hash => {}
            Some(_) => {
                return Err(ChainStateError::Internal(
                    "coin store tip is not in the block index",
                ))
            }
        }
        let threads = config.script_threads.min(MAX_SCRIPTCHECK_THREADS);
        let script_queue = CheckQueue::new(threads, config.script_batch_size)?;
        lccd_log::log_info!(
            "chain state at genesis {} ({} network, {threads} script check threads)",
            hash256_to_hex(&genesis_hash),
            params.network.as_str()
        );
        Ok(Self {
            params,
            validation: Mutex::new(()),
            tree: RwLock::new(tree),
            versionbits: Mutex::new(VersionBitsCache::new()),
            coins: Mutex::new(coins),
            mempool: Mutex::new(TxMemPool::new(config.mempool)),
            script_queue,
            verifier,
            hasher,
            blocks: None,
            observers: Vec::new(),
        })
    }

    pub fn with_block_source(mut self, blocks: Arc<dyn BlockSource + Send + Sync>) -> Self {
        self.blocks = Some(blocks);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ValidationObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    fn read_tree(&self) -> Result<RwLockReadGuard<'_, BlockTree>, ChainStateError> {
        self.tree
            .read()
            .map_err(|_| ChainStateError::Internal("block tree lock poisoned"))
    }

    fn write_tree(&self) -> Result<RwLockWriteGuard<'_, BlockTree>, ChainStateError> {
        self.tree
            .write()
            .map_err(|_| ChainStateError::Internal("block tree lock poisoned"))
    }

    pub fn tip(&self) -> Result<HeaderInfo, ChainStateError> {
        Ok(self.read_tree()?.tip().info)
    }

    pub fn height(&self) -> Result<i32, ChainStateError> {
        Ok(self.read_tree()?.height())
    }

    /// Unspent coin at the active tip.
    pub fn coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, ChainStateError> {
        let coins = lock(&self.coins, "coins lock poisoned")?;
        Ok(coins.get_coin(outpoint)?)
    }

    pub fn with_mempool<R>(&self, f: impl FnOnce(&TxMemPool) -> R) -> Result<R, ChainStateError> {
        let pool = lock(&self.mempool, "mempool lock poisoned")?;
        Ok(f(&pool))
    }

    pub fn prioritise_transaction(&self, txid: Hash256, fee_delta: Amount) -> Result<(), ChainStateError> {
        let mut pool = lock(&self.mempool, "mempool lock poisoned")?;
        pool.prioritise_transaction(txid, fee_delta);
        Ok(())
    }

    /// Validates `tx` against the active tip and the pool and admits it. A
    /// transaction with unknown inputs is held as an orphan and reported as
    /// such; orphans it unblocks are admitted in the same call.
    pub fn accept_to_memory_pool(
        &self,
        tx: Transaction,
        now: i64,
    ) -> Result<MempoolAccept, ValidationOutcome> {
        let txid = tx.txid();
        let mut notices = Notices::default();
        let result = self.accept_locked(tx, now, &mut notices);
        self.publish(&notices);
        result.map_err(|err| {
            let outcome = err.outcome();
            match outcome.class {
                RejectClass::Orphan => log_category!(
                    Category::Mempool,
                    "transaction {} held as orphan",
                    hash256_to_hex(&txid)
                ),
                _ => lccd_log::log_warn!(
                    "transaction {} rejected: {err} ({})",
                    hash256_to_hex(&txid),
                    outcome.class.as_str()
                ),
            }
            outcome
        })
    }

    fn accept_locked(
        &self,
        tx: Transaction,
        now: i64,
        notices: &mut Notices,
    ) -> Result<MempoolAccept, ChainStateError> {
        let _validation = lock(&self.validation, "validation lock poisoned")?;
        let tree = self.read_tree()?;
        let mut coins = lock(&self.coins, "coins lock poisoned")?;
        let mut pool = lock(&self.mempool, "mempool lock poisoned")?;

        let cutoff = now.saturating_sub(pool.config().expiry_secs());
        notices.removed.extend(pool.expire(cutoff));

        let admitted = self.accept_one(&tree, &mut coins, &mut pool, tx, now, notices)?;
        let mut accepted = MempoolAccept {
            txid: admitted.tx.txid(),
            fee: admitted.fee,
            replaced: admitted.replaced,
            orphans_accepted: Vec::new(),
        };

        let mut work: VecDeque<Transaction> =
            pool.orphans_mut().take_children(&admitted.tx).into();
        while let Some(orphan) = work.pop_front() {
            let orphan_txid = orphan.txid();
            match self.accept_one(&tree, &mut coins, &mut pool, orphan, now, notices) {
                Ok(child) => {
                    accepted.orphans_accepted.push(orphan_txid);
                    work.extend(pool.orphans_mut().take_children(&child.tx));
                }
                Err(err) => log_category!(
                    Category::Mempool,
                    "orphan {} not admitted: {err}",
                    hash256_to_hex(&orphan_txid)
                ),
            }
        }
        Ok(accepted)
    }

    fn accept_one(
        &self,
        tree: &BlockTree,
        coins: &mut TipCoins<S>,
        pool: &mut TxMemPool,
        tx: Transaction,
        now: i64,
        notices: &mut Notices,
    ) -> Result<Admitted, ChainStateError> {
        let txid = tx.txid();
        check_transaction(&tx)?;
        if tx.is_coinbase() {
            return Err(ValidationError::InvalidTransaction("coinbase").into());
        }

        let config = pool.config().clone();
        if config.require_standard {
            check_standard(
                &tx,
                config.min_relay_fee,
                &self.params.hive.bee_creation_key_hash,
            )?;
        }

        let tip = tree.tip().info;
        let spend_height = tip.height + 1;
        if !is_final_tx(&tx, spend_height, median_time_past(tree, tip.height)) {
            return Err(MempoolError::new(MempoolErrorKind::NonStandard, "non-final").into());
        }
        if pool.contains(&txid) {
            return Err(MempoolError::already_in_mempool().into());
        }

        let resolved = resolve_inputs(
            MempoolCoinsView::new(&*coins, &*pool),
            &tx,
            txid,
            spend_height,
            &self.params,
        );
        let resolved = match resolved {
            Err(ChainStateError::Mempool(err)) if err.kind == MempoolErrorKind::MissingInputs => {
                if pool.orphans_mut().add(tx, now) {
                    log_category!(
                        Category::Mempool,
                        "stored orphan {} missing {} inputs",
                        hash256_to_hex(&txid),
                        err.missing_inputs.len()
                    );
                }
                return Err(err.into());
            }
            other => other?,
        };

        let size = tx.serialized_size() as u64;
        let min_fee = pool.get_min_fee(config.max_bytes as u64, now).fee(size);
        if resolved.fee < min_fee {
            return Err(MempoolError::with_detail(
                MempoolErrorKind::MinFeeNotMet,
                "mempool min fee not met",
                format!("{} < {}", resolved.fee, min_fee),
            )
            .into());
        }
        let relay_fee = config.min_relay_fee.fee(size);
        if resolved.fee < relay_fee {
            return Err(MempoolError::with_detail(
                MempoolErrorKind::InsufficientFee,
                "min relay fee not met",
                format!("{} < {}", resolved.fee, relay_fee),
            )
            .into());
        }

        let shared = Arc::new(tx.clone());
        let standard =
            self.script_jobs(&shared, txid, &resolved.spent, STANDARD_SCRIPT_VERIFY_FLAGS);
        if !self.run_scripts(standard) {
            let mandatory =
                self.script_jobs(&shared, txid, &resolved.spent, MANDATORY_SCRIPT_VERIFY_FLAGS);
            return match mandatory.iter().position(|job| job.run().is_err()) {
                Some(input_index) => {
                    Err(ValidationError::Script { txid, input_index }.into())
                }
                None => Err(MempoolError::new(
                    MempoolErrorKind::NonStandard,
                    "non-mandatory-script-verify-flag",
                )
                .into()),
            };
        }

        let entry = MempoolEntry::new(
            tx.clone(),
            resolved.fee,
            now,
            tip.height,
            resolved.spends_coinbase,
        );
        let limits = pool.ancestor_limits(now);
        let ancestors = pool
            .calculate_mempool_ancestors(&entry, &limits)
            .map_err(MempoolError::too_long_chain)?;

        let conflicts = pool.conflicts_of(&tx);
        let mut replaced = Vec::new();
        if !conflicts.is_empty() {
            let evicted = pool.check_replacement(&entry, &conflicts)?;
            let removed = pool.remove_replaced(&evicted);
            replaced.extend(removed.iter().map(|removed| removed.entry.txid));
            notices.removed.extend(removed);
        }

        pool.add_unchecked(entry, &ancestors);
        notices
            .removed
            .extend(pool.trim_to_size(config.max_bytes as u64));
        let Some(entry) = pool.get(&txid) else {
            return Err(MempoolError::new(MempoolErrorKind::MempoolFull, "mempool full").into());
        };
        notices.accepted.push(entry.clone());
        log_category!(
            Category::Mempool,
            "accepted {} (fee {}, {size} bytes, pool {} txs)",
            hash256_to_hex(&txid),
            resolved.fee,
            pool.len()
        );
        Ok(Admitted {
            tx,
            fee: resolved.fee,
            replaced,
        })
    }

    fn script_jobs(
        &self,
        tx: &Arc<Transaction>,
        txid: Hash256,
        spent: &[(Vec<u8>, Amount)],
        flags: ScriptFlags,
    ) -> Vec<ScriptCheck> {
        spent
            .iter()
            .enumerate()
            .map(|(input_index, (script_pubkey, amount))| ScriptCheck {
                verifier: Arc::clone(&self.verifier),
                tx: Arc::clone(tx),
                txid,
                input_index,
                script_pubkey: script_pubkey.clone(),
                amount: *amount,
                flags,
            })
            .collect()
    }

    /// Caller holds the validation lock, so at most one control is live.
    fn run_scripts(&self, jobs: Vec<ScriptCheck>) -> bool {
        let mut control = self.script_queue.control();
        control.add(jobs);
        control.wait()
    }

    /// Fully validates `block` on top of the active tip and connects it. The
    /// coin changes reach the store only when every check has passed.
    pub fn connect_block(&self, block: &Block, now: i64) -> Result<ConnectedBlock, ValidationOutcome> {
        let hash = block.header.hash();
        let mut notices = Notices::default();
        let result = self.connect_locked(block, hash, now, &mut notices);
        self.publish(&notices);
        match result {
            Ok(connected) => {
                for observer in &self.observers {
                    observer.block_connected(block, connected.height);
                }
                lccd_log::log_info!(
                    "connected block {} at height {} ({} txs, fees {})",
                    hash256_to_hex(&hash),
                    connected.height,
                    block.transactions.len(),
                    connected.fees
                );
                Ok(connected)
            }
            Err(err) => {
                let outcome = err.outcome();
                lccd_log::log_warn!(
                    "block {} rejected: {err} ({})",
                    hash256_to_hex(&hash),
                    outcome.class.as_str()
                );
                Err(outcome)
            }
        }
    }

    fn connect_locked(
        &self,
        block: &Block,
        hash: Hash256,
        now: i64,
        notices: &mut Notices,
    ) -> Result<ConnectedBlock, ChainStateError> {
        let _validation = lock(&self.validation, "validation lock poisoned")?;
        let mut tree = self.write_tree()?;
        if let Some(node) = tree.get(&hash) {
            if node.status & STATUS_FAILED != 0 {
                return Err(ChainStateError::KnownInvalid(hash));
            }
            if node.status & STATUS_CONNECTED != 0 {
                return Err(ChainStateError::DuplicateBlock(hash));
            }
        }
        let prev_slot = tree
            .slot(&block.header.prev_block)
            .ok_or(BlockIndexError::UnknownParent(block.header.prev_block))?;
        if prev_slot != tree.tip_slot() {
            return Err(ChainStateError::NotOnTip(hash));
        }
        let prev = tree.node(prev_slot).info;

        let fees = match self.validate_and_apply(&tree, &prev, block, hash, now) {
            Ok(fees) => fees,
            Err(err) => {
                if err.outcome().class == RejectClass::Consensus {
                    if let Ok(slot) = tree.insert_header(&block.header) {
                        tree.set_status(slot, STATUS_FAILED);
                    }
                }
                return Err(err);
            }
        };

        let slot = tree.insert_header(&block.header)?;
        tree.set_status(slot, STATUS_HAVE_DATA | STATUS_CONNECTED);
        tree.set_tip(slot);
        let height = prev.height + 1;
        self.advance_deployments(&tree, &prev)?;

        let mut pool = lock(&self.mempool, "mempool lock poisoned")?;
        let removed = pool.remove_for_block(&block.transactions, height, now);
        let mempool_removed = removed.len();
        notices.removed.extend(removed);
        Ok(ConnectedBlock {
            hash,
            height,
            fees,
            mempool_removed,
        })
    }

    /// Every check of `block` against its parent `prev`, then the coin update.
    /// Returns the fees the block collects.
    fn validate_and_apply(
        &self,
        tree: &BlockTree,
        prev: &HeaderInfo,
        block: &Block,
        hash: Hash256,
        now: i64,
    ) -> Result<Amount, ChainStateError> {
        let height = prev.height + 1;
        let txids: Vec<Hash256> = block.transactions.par_iter().map(Transaction::txid).collect();
        check_block(block, &txids)?;

        let mut flags = MANDATORY_SCRIPT_VERIFY_FLAGS | SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY;
        let activations = {
            let mut versionbits = lock(&self.versionbits, "versionbits lock poisoned")?;
            if versionbits.state_for(tree, Some(prev), Deployment::Csv, &self.params)
                == ThresholdState::Active
            {
                flags |= SCRIPT_VERIFY_CHECKSEQUENCEVERIFY;
            }
            versionbits.activations(tree, Some(prev), &self.params)
        };
        let is_hive = block.header.is_hive_mined(self.params.hive.hive_nonce_marker);
        let kind = if is_hive {
            BlockKind::Hive
        } else {
            match block.header.pow_type() {
                Some(pow_type) => BlockKind::Pow(pow_type),
                None if activations.minotaurx_enabled(prev.height) => {
                    return Err(ValidationError::from(PowError::UnknownPowType(
                        block.header.version,
                    ))
                    .into());
                }
                None => BlockKind::Pow(PowType::Sha256d),
            }
        };
        let expected = next_work_required(
            tree,
            prev,
            i64::from(block.header.time),
            kind,
            &activations,
            &self.params,
        )
        .map_err(ValidationError::from)?;
        if block.header.bits != expected {
            return Err(ValidationError::InvalidHeader("bad-diffbits").into());
        }

        let mut coins = lock(&self.coins, "coins lock poisoned")?;
        if is_hive {
            let lookup = HiveLookup {
                coins: &*coins,
                blocks: self.blocks.as_deref(),
            };
            check_hive_proof(
                block,
                prev,
                tree,
                &lookup,
                self.hasher.as_ref(),
                &activations,
                &self.params,
            )
            .map_err(ValidationError::from)?;
        } else {
            validate_pow_header(&block.header, self.hasher.as_ref(), &self.params)
                .map_err(ValidationError::from)?;
        }
        check_block_context(block, height, median_time_past(tree, prev.height), now)?;

        let mut view = CoinsViewCache::new(&mut *coins);
        let mut fees: Amount = 0;
        let mut control = self.script_queue.control();
        for (tx, txid) in block.transactions.iter().zip(&txids) {
            if !tx.is_coinbase() {
                let fee = check_tx_inputs(tx, &mut view, height, &self.params)?;
                fees = fees
                    .checked_add(fee)
                    .filter(|fees| money_range(*fees))
                    .ok_or(ValidationError::InvalidBlock(
                        "bad-txns-accumulated-fee-outofrange",
                    ))?;
                let shared = Arc::new(tx.clone());
                let mut jobs = Vec::with_capacity(tx.vin.len());
                for (input_index, input) in tx.vin.iter().enumerate() {
                    let coin = view.spend_coin(&input.prevout)?.ok_or(
                        ValidationError::InvalidTransaction("bad-txns-inputs-missingorspent"),
                    )?;
                    jobs.push(ScriptCheck {
                        verifier: Arc::clone(&self.verifier),
                        tx: Arc::clone(&shared),
                        txid: *txid,
                        input_index,
                        script_pubkey: coin.script_pubkey,
                        amount: coin.value,
                        flags,
                    });
                }
                control.add(jobs);
            }
            add_coins(&mut view, tx, height)?;
        }

        let reward = fees.saturating_add(block_subsidy(height, &self.params));
        let coinbase_out = block.transactions[0]
            .value_out()
            .ok_or(ValidationError::InvalidBlock("bad-cb-amount"))?;
        if coinbase_out > reward {
            return Err(ValidationError::InvalidBlock("bad-cb-amount").into());
        }
        if !control.wait() {
            return Err(ValidationError::ScriptBatch.into());
        }
        drop(control);

        view.set_best_block(hash);
        view.flush()?;
        drop(view);
        let written = coins.flush()?;
        log_category!(
            Category::Coins,
            "flushed {written} coin changes at height {height}"
        );
        Ok(fees)
    }

    /// Warms the deployment cache for the new tip and logs state changes.
    fn advance_deployments(&self, tree: &BlockTree, prev: &HeaderInfo) -> Result<(), ChainStateError> {
        let tip = tree.tip().info;
        let mut versionbits = lock(&self.versionbits, "versionbits lock poisoned")?;
        for deployment in ALL_DEPLOYMENTS {
            let before = versionbits.state_for(tree, Some(prev), deployment, &self.params);
            let after = versionbits.state_for(tree, Some(&tip), deployment, &self.params);
            if before != after {
                lccd_log::log_info!(
                    "deployment {} is {} from height {}",
                    deployment.name(),
                    after.as_str(),
                    tip.height + 1
                );
            }
        }
        Ok(())
    }

    fn publish(&self, notices: &Notices) {
        for observer in &self.observers {
            for removed in &notices.removed {
                observer.transaction_removed(&removed.entry, removed.reason);
            }
            for entry in &notices.accepted {
                observer.transaction_accepted(entry);
            }
        }
    }

    /// Compact target required of the next block of `kind` at `next_time`.
    pub fn get_next_work_required(
        &self,
        kind: BlockKind,
        next_time: i64,
    ) -> Result<u32, ValidationOutcome> {
        self.next_work(kind, next_time).map_err(|err| err.outcome())
    }

    fn next_work(&self, kind: BlockKind, next_time: i64) -> Result<u32, ChainStateError> {
        let tree = self.read_tree()?;
        let tip = tree.tip().info;
        let activations = lock(&self.versionbits, "versionbits lock poisoned")?
            .activations(&*tree, Some(&tip), &self.params);
        Ok(
            next_work_required(&*tree, &tip, next_time, kind, &activations, &self.params)
                .map_err(ValidationError::from)?,
        )
    }

    /// Difficulty of the active tip relative to the minimum.
    pub fn get_difficulty(&self) -> Result<f64, ValidationOutcome> {
        self.tip()
            .map(|tip| get_difficulty(tip.bits))
            .map_err(|err| err.outcome())
    }

    /// BIP9 state of `deployment` for the block after the active tip.
    pub fn deployment_state(&self, deployment: Deployment) -> Result<DeploymentInfo, ValidationOutcome> {
        self.deployment_info(deployment).map_err(|err| err.outcome())
    }

    fn deployment_info(&self, deployment: Deployment) -> Result<DeploymentInfo, ChainStateError> {
        let tree = self.read_tree()?;
        let tip = tree.tip().info;
        let mut versionbits = lock(&self.versionbits, "versionbits lock poisoned")?;
        let state = versionbits.state_for(&*tree, Some(&tip), deployment, &self.params);
        let since_height =
            versionbits.state_since_height(&*tree, Some(&tip), deployment, &self.params);
        let statistics = (state == ThresholdState::Started)
            .then(|| versionbits.statistics(&*tree, Some(&tip), deployment, &self.params));
        Ok(DeploymentInfo {
            state,
            since_height,
            statistics,
        })
    }

    /// Version a miner should put in the next block.
    pub fn compute_block_version(&self) -> Result<i32, ValidationOutcome> {
        let version = || -> Result<i32, ChainStateError> {
            let tree = self.read_tree()?;
            let tip = tree.tip().info;
            let mut versionbits = lock(&self.versionbits, "versionbits lock poisoned")?;
            Ok(versionbits.compute_block_version(&*tree, Some(&tip), &self.params))
        };
        version().map_err(|err| err.outcome())
    }

    /// Bee population and reward outlook from the active tip. Needs a block
    /// source to scan for bee creations.
    pub fn network_hive_info(&self, with_population: bool) -> Result<HiveInfo, ValidationOutcome> {
        self.hive_info(with_population).map_err(|err| err.outcome())
    }

    fn hive_info(&self, with_population: bool) -> Result<HiveInfo, ChainStateError> {
        let blocks = self.blocks.as_deref().ok_or(ChainStateError::NoBlockSource)?;
        let tree = self.read_tree()?;
        let tip = tree.tip().info;
        let activations = lock(&self.versionbits, "versionbits lock poisoned")?
            .activations(&*tree, Some(&tip), &self.params);
        Ok(network_hive_info(
            &*tree,
            blocks,
            &tip,
            &activations,
            &self.params,
            with_population,
        )?)
    }
}

/// Resolves every input of `tx` through `base`, reporting unknown ones as
/// missing inputs, and runs the contextual input checks.
fn resolve_inputs<B: CoinsView>(
    base: B,
    tx: &Transaction,
    txid: Hash256,
    spend_height: i32,
    params: &ConsensusParams,
) -> Result<ResolvedInputs, ChainStateError> {
    let mut view = CoinsViewCache::new(base);
    for index in 0..tx.vout.len() as u32 {
        if view.access_coin(&OutPoint::new(txid, index))?.is_some() {
            return Err(MempoolError::new(
                MempoolErrorKind::AlreadyInMempool,
                "txn-already-known",
            )
            .into());
        }
    }

    let mut missing = Vec::new();
    let mut seen = HashSet::new();
    for input in &tx.vin {
        if view.access_coin(&input.prevout)?.is_none() && seen.insert(input.prevout) {
            missing.push(input.prevout);
        }
    }
    if !missing.is_empty() {
        return Err(MempoolError::missing_inputs(missing).into());
    }

    let fee = check_tx_inputs(tx, &mut view, spend_height, params)?;
    let mut spends_coinbase = false;
    let mut spent = Vec::with_capacity(tx.vin.len());
    for input in &tx.vin {
        let coin = view
            .access_coin(&input.prevout)?
            .ok_or(ChainStateError::Internal("resolved input vanished"))?;
        spends_coinbase |= coin.is_coinbase;
        spent.push((coin.script_pubkey.clone(), coin.value));
    }
    Ok(ResolvedInputs {
        fee,
        spends_coinbase,
        spent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_classes_follow_error_kind() {
        let consensus = ChainStateError::from(ValidationError::InvalidBlock("bad-cb-amount"));
        assert_eq!(
            consensus.outcome(),
            ValidationOutcome::new(RejectClass::Consensus, "bad-cb-amount")
        );

        let orphan = ChainStateError::from(MempoolError::missing_inputs(vec![OutPoint::new(
            [1u8; 32], 0,
        )]));
        assert_eq!(orphan.outcome().class, RejectClass::Orphan);
        assert_eq!(orphan.outcome().reason, "missing-inputs");

        let policy = ChainStateError::from(MempoolError::too_long_chain("too many ancestors: 26 > 25"));
        assert_eq!(policy.outcome().class, RejectClass::Policy);
        assert_eq!(policy.outcome().reason, "too-long-mempool-chain");

        let internal = ChainStateError::from(MempoolError::new(MempoolErrorKind::Internal, "broken"));
        assert_eq!(internal.outcome().class, RejectClass::Internal);

        let unknown_parent = ChainStateError::from(BlockIndexError::UnknownParent([2u8; 32]));
        assert_eq!(unknown_parent.outcome().class, RejectClass::Orphan);

        let store = ChainStateError::from(StoreError::Backend("disk gone".to_string()));
        assert_eq!(store.outcome().class, RejectClass::Internal);
        assert!(store.outcome().reason.contains("disk gone"));

        let hive = ChainStateError::from(HiveInfoError::MissingBlock(7));
        assert_eq!(hive.outcome().class, RejectClass::Internal);
    }

    #[test]
    fn default_config_caps_script_threads() {
        let config = ChainStateConfig::default();
        assert!(config.script_threads <= MAX_SCRIPTCHECK_THREADS);
        assert_eq!(config.script_batch_size, DEFAULT_SCRIPTCHECK_BATCH);
    }
}
