//! Transaction and block rule checks, and the structured rejection they map to.

use std::collections::HashSet;
use std::fmt;

use lccd_consensus::constants::{LOCKTIME_THRESHOLD, MAX_BLOCK_SIGOPS, MAX_BLOCK_SIZE, SEQUENCE_FINAL};
use lccd_consensus::money::{money_range, Amount, MAX_MONEY};
use lccd_consensus::{ConsensusParams, Hash256};
use lccd_pow::{DifficultyError, HiveError, PowError};
use lccd_primitives::block::Block;
use lccd_primitives::merkle::compute_merkle_root;
use lccd_primitives::script::legacy_sigop_count;
use lccd_primitives::transaction::Transaction;

use crate::coins::{CoinsView, CoinsViewCache};
use crate::state::ChainStateError;

/// Blocks may be timestamped at most this far ahead of the local clock.
pub const MAX_FUTURE_BLOCK_TIME: i64 = 2 * 60 * 60;

/// How a rejected transaction or block should be treated by the caller.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RejectClass {
    /// Inputs are not known yet. Retry once they are.
    Orphan,
    /// Valid by consensus but refused by local policy.
    Policy,
    /// Permanently invalid. Never retried.
    Consensus,
    /// Local failure such as a corrupt store.
    Internal,
}

impl RejectClass {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectClass::Orphan => "orphan",
            RejectClass::Policy => "policy",
            RejectClass::Consensus => "consensus",
            RejectClass::Internal => "internal",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidationOutcome {
    pub class: RejectClass,
    pub reason: String,
}

impl ValidationOutcome {
    pub fn new(class: RejectClass, reason: impl Into<String>) -> Self {
        Self {
            class,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.reason, self.class.as_str())
    }
}

#[derive(Debug)]
pub enum ValidationError {
    InvalidBlock(&'static str),
    InvalidHeader(&'static str),
    InvalidTransaction(&'static str),
    Pow(PowError),
    Hive(HiveError),
    Difficulty(DifficultyError),
    Script { txid: Hash256, input_index: usize },
    ScriptBatch,
}

impl ValidationError {
    /// Reject reason reported to peers.
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::InvalidBlock(reason)
            | ValidationError::InvalidHeader(reason)
            | ValidationError::InvalidTransaction(reason) => reason,
            ValidationError::Pow(err) => err.reason(),
            ValidationError::Hive(err) => err.reason(),
            ValidationError::Difficulty(_) => "bad-diffbits",
            ValidationError::Script { .. } | ValidationError::ScriptBatch => {
                "mandatory-script-verify-flag-failed"
            }
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidBlock(reason)
            | ValidationError::InvalidHeader(reason)
            | ValidationError::InvalidTransaction(reason) => write!(f, "{reason}"),
            ValidationError::Pow(err) => write!(f, "{err}"),
            ValidationError::Hive(err) => write!(f, "{err}"),
            ValidationError::Difficulty(err) => write!(f, "{err}"),
            ValidationError::Script { txid, input_index } => write!(
                f,
                "script verification failed for {} input {input_index}",
                lccd_primitives::hash256_to_hex(txid)
            ),
            ValidationError::ScriptBatch => write!(f, "block script verification failed"),
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<PowError> for ValidationError {
    fn from(err: PowError) -> Self {
        ValidationError::Pow(err)
    }
}

impl From<HiveError> for ValidationError {
    fn from(err: HiveError) -> Self {
        ValidationError::Hive(err)
    }
}

impl From<DifficultyError> for ValidationError {
    fn from(err: DifficultyError) -> Self {
        ValidationError::Difficulty(err)
    }
}

/// Rules that need nothing but the transaction itself.
pub fn check_transaction(tx: &Transaction) -> Result<(), ValidationError> {
    if tx.vin.is_empty() {
        return Err(ValidationError::InvalidTransaction("bad-txns-vin-empty"));
    }
    if tx.vout.is_empty() {
        return Err(ValidationError::InvalidTransaction("bad-txns-vout-empty"));
    }
    if tx.serialized_size() > MAX_BLOCK_SIZE as usize {
        return Err(ValidationError::InvalidTransaction("bad-txns-oversize"));
    }

    let mut value_out: Amount = 0;
    for output in &tx.vout {
        if output.value < 0 {
            return Err(ValidationError::InvalidTransaction("bad-txns-vout-negative"));
        }
        if output.value > MAX_MONEY {
            return Err(ValidationError::InvalidTransaction("bad-txns-vout-toolarge"));
        }
        value_out += output.value;
        if !money_range(value_out) {
            return Err(ValidationError::InvalidTransaction(
                "bad-txns-txouttotal-toolarge",
            ));
        }
    }

    let mut seen = HashSet::with_capacity(tx.vin.len());
    for input in &tx.vin {
        if !seen.insert(input.prevout) {
            return Err(ValidationError::InvalidTransaction("bad-txns-inputs-duplicate"));
        }
    }

    if tx.is_coinbase() {
        let len = tx.vin[0].script_sig.len();
        if !(2..=100).contains(&len) {
            return Err(ValidationError::InvalidTransaction("bad-cb-length"));
        }
    } else if tx.vin.iter().any(|input| input.prevout.is_null()) {
        return Err(ValidationError::InvalidTransaction("bad-txns-prevout-null"));
    }
    Ok(())
}

pub fn is_final_tx(tx: &Transaction, height: i32, block_time: i64) -> bool {
    if tx.lock_time == 0 {
        return true;
    }
    let lock_time = i64::from(tx.lock_time);
    let compare = if tx.lock_time < LOCKTIME_THRESHOLD {
        i64::from(height)
    } else {
        block_time
    };
    if lock_time < compare {
        return true;
    }
    tx.vin.iter().all(|input| input.sequence == SEQUENCE_FINAL)
}

/// Checks `tx`'s inputs against the coin view for a block at `spend_height`
/// and returns the fee. Inputs must be present; a missing one is a double
/// spend from the block's point of view.
pub fn check_tx_inputs<B: CoinsView>(
    tx: &Transaction,
    view: &mut CoinsViewCache<B>,
    spend_height: i32,
    params: &ConsensusParams,
) -> Result<Amount, ChainStateError> {
    if !view.have_inputs(tx)? {
        return Err(ValidationError::InvalidTransaction("bad-txns-inputs-missingorspent").into());
    }
    let mut value_in: Amount = 0;
    for input in &tx.vin {
        let coin = view
            .access_coin(&input.prevout)?
            .ok_or(ValidationError::InvalidTransaction("bad-txns-inputs-missingorspent"))?;
        if !coin.is_mature(spend_height, params.coinbase_maturity) {
            return Err(ValidationError::InvalidTransaction(
                "bad-txns-premature-spend-of-coinbase",
            )
            .into());
        }
        value_in = value_in.saturating_add(coin.value);
        if !money_range(coin.value) || !money_range(value_in) {
            return Err(ValidationError::InvalidTransaction(
                "bad-txns-inputvalues-outofrange",
            )
            .into());
        }
    }
    let value_out = tx
        .value_out()
        .ok_or(ValidationError::InvalidTransaction("bad-txns-txouttotal-toolarge"))?;
    if value_in < value_out {
        return Err(ValidationError::InvalidTransaction("bad-txns-in-belowout").into());
    }
    let fee = value_in - value_out;
    if !money_range(fee) {
        return Err(ValidationError::InvalidTransaction("bad-txns-fee-outofrange").into());
    }
    Ok(fee)
}

/// Context-free block rules. `txids` are the ids of `block.transactions` in
/// order.
pub fn check_block(block: &Block, txids: &[Hash256]) -> Result<(), ValidationError> {
    let merkle = compute_merkle_root(txids);
    if merkle.root != block.header.merkle_root {
        return Err(ValidationError::InvalidBlock("bad-txnmrklroot"));
    }
    if merkle.duplicate_pair {
        return Err(ValidationError::InvalidBlock("bad-txns-duplicate"));
    }

    if block.transactions.is_empty() || block.serialized_size() > MAX_BLOCK_SIZE as usize {
        return Err(ValidationError::InvalidBlock("bad-blk-length"));
    }
    if !block.transactions[0].is_coinbase() {
        return Err(ValidationError::InvalidBlock("bad-cb-missing"));
    }
    if block.transactions[1..].iter().any(Transaction::is_coinbase) {
        return Err(ValidationError::InvalidBlock("bad-cb-multiple"));
    }
    for tx in &block.transactions {
        check_transaction(tx)?;
    }
    if block_sigops(block) > MAX_BLOCK_SIGOPS {
        return Err(ValidationError::InvalidBlock("bad-blk-sigops"));
    }
    Ok(())
}

/// Block rules that depend on the parent: timestamps and transaction
/// finality.
pub fn check_block_context(
    block: &Block,
    height: i32,
    median_time_past: i64,
    adjusted_now: i64,
) -> Result<(), ValidationError> {
    let block_time = i64::from(block.header.time);
    if block_time <= median_time_past {
        return Err(ValidationError::InvalidHeader("time-too-old"));
    }
    if block_time > adjusted_now + MAX_FUTURE_BLOCK_TIME {
        return Err(ValidationError::InvalidHeader("time-too-new"));
    }
    if block
        .transactions
        .iter()
        .any(|tx| !is_final_tx(tx, height, block_time))
    {
        return Err(ValidationError::InvalidBlock("bad-txns-nonfinal"));
    }
    Ok(())
}

pub fn block_sigops(block: &Block) -> u32 {
    block
        .transactions
        .iter()
        .map(|tx| {
            let input_ops: u32 = tx
                .vin
                .iter()
                .map(|input| legacy_sigop_count(&input.script_sig))
                .sum();
            let output_ops: u32 = tx
                .vout
                .iter()
                .map(|output| legacy_sigop_count(&output.script_pubkey))
                .sum();
            input_ops + output_ops
        })
        .sum()
}
