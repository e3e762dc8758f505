//! Hive: blocks produced by proving ownership of live bees instead of hashing.
//!
//! A bee creation transaction (BCT) burns coins to the bee creation address and
//! names a honey address. After `bee_gestation_blocks` its bees may mine for
//! `bee_lifespan_blocks`. A Hive block's coinbase carries the proof in its
//! first output:
//!
//! ```text
//! [0]      OP_RETURN
//! [1]      OP_BEE
//! [2]      push 4, [3..7] bee nonce (LE)
//! [7]      push 4, [8..12] BCT height (LE)
//! [12]     OP_TRUE when the BCT paid the community fund
//! [13]     push 64, [14..78] BCT txid as ASCII hex
//! [78]     push 65, [79..144] compact signature by the honey key
//! ```

use lccd_consensus::money::Amount;
use lccd_consensus::{bee_cost, block_subsidy, ConsensusParams, Hash256};
use lccd_log::Category;
use lccd_primitives::block::Block;
use lccd_primitives::encoding::Encoder;
use lccd_primitives::hash::{hash160, hash256_to_hex, sha256d};
use lccd_primitives::outpoint::OutPoint;
use lccd_primitives::script::{
    bct_honey_script, p2pkh_key_hash, p2pkh_script, OP_BEE, OP_FALSE, OP_RETURN, OP_TRUE,
};
use lccd_primitives::transaction::Transaction;
use primitive_types::U256;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, Secp256k1, VerifyOnly};
use std::sync::OnceLock;

use crate::activation::{Activations, HiveEra};
use crate::difficulty::{
    compact_to_u256, limit_to_u256, prev_header, require_prev, u256_to_compact, DifficultyError,
    HeaderInfo, HeaderSource,
};
use crate::validation::PowHasher;

pub const HIVE_PROOF_MIN_LEN: usize = 144;
const NONCE_OFFSET: usize = 3;
const HEIGHT_OFFSET: usize = 8;
const COMMUNITY_OFFSET: usize = 12;
const TXID_OFFSET: usize = 14;
const SIG_OFFSET: usize = 79;
const COMPACT_SIG_LEN: usize = 65;

static SECP256K1_VERIFY: OnceLock<Secp256k1<VerifyOnly>> = OnceLock::new();

fn secp256k1_verify() -> &'static Secp256k1<VerifyOnly> {
    SECP256K1_VERIFY.get_or_init(Secp256k1::verification_only)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HiveError {
    NotEnabled,
    TooManyConsecutive(i32),
    MustFollowPow,
    ContainsBct,
    BadCoinbase,
    BadOutputCount(usize),
    ProofTooShort(usize),
    BadMarker,
    HashAboveTarget,
    HasherUnavailable,
    BadHoneyAddress,
    BadSignature,
    BctNotFound,
    CommunityContribNotFound,
    CommunityContribMismatch { paid: Amount, expected: Amount },
    HeightMismatch { claimed: u32, found: i32 },
    BctImmature,
    BctExpired,
    NotBctScript,
    HoneyMismatch,
    BelowMinBeeCost,
    BelowBeeCost,
    NonceTooHigh { nonce: u32, bees: Amount },
    Difficulty(DifficultyError),
}

impl HiveError {
    /// Reject reason reported to peers.
    pub fn reason(&self) -> &'static str {
        match self {
            HiveError::NotEnabled => "bad-hive-not-enabled",
            HiveError::TooManyConsecutive(_) => "bad-hive-consecutive",
            HiveError::MustFollowPow => "bad-hive-follows-hive",
            HiveError::ContainsBct => "bad-hive-contains-bct",
            HiveError::BadCoinbase => "bad-hive-coinbase",
            HiveError::BadOutputCount(_) => "bad-hive-coinbase-vouts",
            HiveError::ProofTooShort(_) => "bad-hive-proof-length",
            HiveError::BadMarker => "bad-hive-proof-marker",
            HiveError::HashAboveTarget => "bad-hive-bee-hash",
            HiveError::HasherUnavailable => "hive-hasher-unavailable",
            HiveError::BadHoneyAddress => "bad-hive-honey-address",
            HiveError::BadSignature => "bad-hive-signature",
            HiveError::BctNotFound => "bad-hive-bct-not-found",
            HiveError::CommunityContribNotFound => "bad-hive-community-missing",
            HiveError::CommunityContribMismatch { .. } => "bad-hive-community-amount",
            HiveError::HeightMismatch { .. } => "bad-hive-bct-height",
            HiveError::BctImmature => "bad-hive-bct-immature",
            HiveError::BctExpired => "bad-hive-bct-expired",
            HiveError::NotBctScript => "bad-hive-bct-script",
            HiveError::HoneyMismatch => "bad-hive-honey-mismatch",
            HiveError::BelowMinBeeCost | HiveError::BelowBeeCost => "bad-hive-bct-value",
            HiveError::NonceTooHigh { .. } => "bad-hive-bee-nonce",
            HiveError::Difficulty(_) => "bad-hive-history",
        }
    }
}

impl std::fmt::Display for HiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HiveError::NotEnabled => write!(f, "hive is not enabled on the network"),
            HiveError::TooManyConsecutive(count) => {
                write!(f, "{count} hive blocks at tip without a pow block")
            }
            HiveError::MustFollowPow => write!(f, "hive block must follow a pow block"),
            HiveError::ContainsBct => write!(f, "hive-mined block contains bee creation txs"),
            HiveError::BadCoinbase => write!(f, "first transaction is not a coinbase"),
            HiveError::BadOutputCount(count) => write!(f, "unexpected coinbase vout count {count}"),
            HiveError::ProofTooShort(len) => write!(f, "hive proof script too short ({len} bytes)"),
            HiveError::BadMarker => write!(f, "hive proof does not start OP_RETURN OP_BEE"),
            HiveError::HashAboveTarget => write!(f, "bee does not meet hash target"),
            HiveError::HasherUnavailable => write!(f, "minotaurx hasher unavailable"),
            HiveError::BadHoneyAddress => write!(f, "honey output is not pay-to-pubkey-hash"),
            HiveError::BadSignature => write!(f, "proof signature does not match honey key"),
            HiveError::BctNotFound => write!(f, "indicated bee creation tx not found"),
            HiveError::CommunityContribNotFound => {
                write!(f, "community contribution indicated but not found")
            }
            HiveError::CommunityContribMismatch { paid, expected } => write!(
                f,
                "bee creation tx pays community fund {paid} (expected {expected})"
            ),
            HiveError::HeightMismatch { claimed, found } => write!(
                f,
                "claimed bee creation height {claimed} conflicts with found height {found}"
            ),
            HiveError::BctImmature => write!(f, "indicated bee creation tx is immature"),
            HiveError::BctExpired => write!(f, "indicated bee creation tx is too old"),
            HiveError::NotBctScript => write!(f, "indicated output is not a bee creation script"),
            HiveError::HoneyMismatch => {
                write!(f, "bee creation honey address does not match claimed address")
            }
            HiveError::BelowMinBeeCost => write!(f, "bee creation fee below minimum bee cost"),
            HiveError::BelowBeeCost => write!(f, "bee creation fee below cost of one bee"),
            HiveError::NonceTooHigh { nonce, bees } => {
                write!(f, "bee nonce {nonce} not below bee count {bees}")
            }
            HiveError::Difficulty(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for HiveError {}

impl From<DifficultyError> for HiveError {
    fn from(err: DifficultyError) -> Self {
        HiveError::Difficulty(err)
    }
}

/// Unspent bee creation (or community fund) output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BctCoin {
    pub value: Amount,
    pub script_pubkey: Vec<u8>,
    pub height: i32,
}

/// Where the Hive gate looks up bee creation transactions.
pub trait BctSource {
    /// Unspent output from the coin set.
    fn coin(&self, outpoint: &OutPoint) -> Option<BctCoin>;

    /// Historical transaction by id, searched around `claimed_height`, with the
    /// height it was found at. Used once the outputs are spent.
    fn transaction(&self, _txid: &Hash256, _claimed_height: i32) -> Option<(Transaction, i32)> {
        None
    }
}

/// Full blocks by height, for scanning bee creations.
pub trait BlockSource {
    fn block_at(&self, height: i32) -> Option<Block>;
}

/// Fields of a coinbase Hive proof script.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HiveProof<'a> {
    pub bee_nonce: u32,
    pub claimed_height: u32,
    pub community_contrib: bool,
    pub txid_hex: &'a [u8],
    pub signature: &'a [u8],
}

impl<'a> HiveProof<'a> {
    pub fn parse(script: &'a [u8]) -> Result<Self, HiveError> {
        if script.len() < HIVE_PROOF_MIN_LEN {
            return Err(HiveError::ProofTooShort(script.len()));
        }
        if script[0] != OP_RETURN || script[1] != OP_BEE {
            return Err(HiveError::BadMarker);
        }
        Ok(Self {
            bee_nonce: read_le32(&script[NONCE_OFFSET..]),
            claimed_height: read_le32(&script[HEIGHT_OFFSET..]),
            community_contrib: script[COMMUNITY_OFFSET] == OP_TRUE,
            txid_hex: &script[TXID_OFFSET..TXID_OFFSET + 64],
            signature: &script[SIG_OFFSET..SIG_OFFSET + COMPACT_SIG_LEN],
        })
    }

    /// The BCT id the proof names, or `None` if the hex is malformed.
    pub fn bct_txid(&self) -> Option<Hash256> {
        let mut out = [0u8; 32];
        for (i, pair) in self.txid_hex.chunks_exact(2).enumerate() {
            let text = std::str::from_utf8(pair).ok()?;
            out[31 - i] = u8::from_str_radix(text, 16).ok()?;
        }
        Some(out)
    }
}

fn read_le32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Builds the coinbase proof script a bee miner commits to.
pub fn hive_proof_script(
    bee_nonce: u32,
    bct_height: u32,
    community_contrib: bool,
    bct_txid: &Hash256,
    signature: &[u8; COMPACT_SIG_LEN],
) -> Vec<u8> {
    let mut script = Vec::with_capacity(HIVE_PROOF_MIN_LEN);
    script.extend_from_slice(&[OP_RETURN, OP_BEE, 0x04]);
    script.extend_from_slice(&bee_nonce.to_le_bytes());
    script.push(0x04);
    script.extend_from_slice(&bct_height.to_le_bytes());
    script.push(if community_contrib { OP_TRUE } else { OP_FALSE });
    script.push(0x40);
    script.extend_from_slice(hash256_to_hex(bct_txid).as_bytes());
    script.push(COMPACT_SIG_LEN as u8);
    script.extend_from_slice(signature);
    script
}

/// Target for a Hive block following `tip`.
pub fn get_next_hive_work_required<S: HeaderSource + ?Sized>(
    chain: &S,
    tip: &HeaderInfo,
    activations: &Activations,
    params: &ConsensusParams,
) -> Result<u32, DifficultyError> {
    match activations.hive_era(tip.height) {
        HiveEra::V1_2 => hive_1_2_work(chain, tip, activations, params),
        HiveEra::V1_1 => hive_1_1_work(chain, tip, params),
        HiveEra::V1_0 => hive_1_0_work(chain, tip, params),
    }
}

fn hive_1_0_work<S: HeaderSource + ?Sized>(
    chain: &S,
    tip: &HeaderInfo,
    params: &ConsensusParams,
) -> Result<u32, DifficultyError> {
    let hive = &params.hive;
    let pow_limit = limit_to_u256(&hive.pow_limit_hive);

    let mut cursor = *tip;
    let mut pow_blocks: u64 = 0;
    let mut target = loop {
        let prev = prev_header(chain, &cursor);
        if prev.is_none() || cursor.height < hive.min_hive_check_block {
            lccd_log::log_category!(Category::Hive, "hive 1.0: no hive-mined blocks in history");
            return Ok(u256_to_compact(pow_limit));
        }
        if cursor.is_hive_mined(params) {
            break compact_to_u256(cursor.bits)?;
        }
        if let Some(prev) = prev {
            cursor = prev;
        }
        pow_blocks += 1;
    };

    if pow_blocks == 0 {
        return Ok(0);
    }

    let spacing = hive.hive_block_spacing_target as u64;
    let interval = (hive.hive_target_adjust_aggression / hive.hive_block_spacing_target) as u64;
    target = target
        .overflowing_mul(U256::from((interval - 1) * spacing + 2 * pow_blocks))
        .0;
    target /= U256::from((interval + 1) * spacing);

    Ok(u256_to_compact(target.min(pow_limit)))
}

struct HiveWindow {
    target_sum: U256,
    hive_blocks: u64,
    total_blocks: u64,
}

fn scan_hive_window<S, F>(
    chain: &S,
    tip: &HeaderInfo,
    params: &ConsensusParams,
    mut in_range: F,
) -> Result<HiveWindow, DifficultyError>
where
    S: HeaderSource + ?Sized,
    F: FnMut(&HeaderInfo) -> bool,
{
    let window = params.hive.hive_difficulty_window.max(0) as u64;
    let mut scan = HiveWindow {
        target_sum: U256::zero(),
        hive_blocks: 0,
        total_blocks: 0,
    };
    let mut cursor = *tip;
    while scan.hive_blocks < window && in_range(&cursor) {
        let Some(prev) = prev_header(chain, &cursor) else {
            break;
        };
        if cursor.is_hive_mined(params) {
            scan.target_sum = scan
                .target_sum
                .overflowing_add(compact_to_u256(cursor.bits)?)
                .0;
            scan.hive_blocks += 1;
        }
        scan.total_blocks += 1;
        cursor = prev;
    }
    Ok(scan)
}

fn scaled_window_target(scan: &HiveWindow, params: &ConsensusParams) -> u32 {
    let pow_limit = limit_to_u256(&params.hive.pow_limit_hive);
    let mut target = scan.target_sum / U256::from(scan.hive_blocks);
    target = target.overflowing_mul(U256::from(scan.total_blocks)).0;
    target /= U256::from(scan.hive_blocks * params.hive.hive_block_spacing_target as u64);
    u256_to_compact(target.min(pow_limit))
}

fn hive_1_1_work<S: HeaderSource + ?Sized>(
    chain: &S,
    tip: &HeaderInfo,
    params: &ConsensusParams,
) -> Result<u32, DifficultyError> {
    let min_height = params.hive.min_hive_check_block;
    let scan = scan_hive_window(chain, tip, params, |cursor| cursor.height >= min_height)?;
    if scan.hive_blocks == 0 {
        lccd_log::log_category!(Category::Hive, "hive 1.1: no previous hive blocks found");
        return Ok(target_limit(params));
    }
    Ok(scaled_window_target(&scan, params))
}

fn hive_1_2_work<S: HeaderSource + ?Sized>(
    chain: &S,
    tip: &HeaderInfo,
    activations: &Activations,
    params: &ConsensusParams,
) -> Result<u32, DifficultyError> {
    let scan = scan_hive_window(chain, tip, params, |cursor| {
        activations.minotaurx_enabled(cursor.height)
    })?;
    if scan.hive_blocks < params.hive.hive_difficulty_window.max(1) as u64 {
        lccd_log::log_category!(Category::Hive, "hive 1.2: insufficient hive blocks");
        return Ok(target_limit(params));
    }
    Ok(scaled_window_target(&scan, params))
}

fn target_limit(params: &ConsensusParams) -> u32 {
    u256_to_compact(limit_to_u256(&params.hive.pow_limit_hive))
}

/// Seed every bee hash for the next block commits to: the id of the block nine
/// below the last PoW block at or before `prev`.
pub fn deterministic_rand_string<S: HeaderSource + ?Sized>(
    chain: &S,
    prev: &HeaderInfo,
    params: &ConsensusParams,
) -> Result<String, DifficultyError> {
    let mut cursor = *prev;
    while cursor.is_hive_mined(params) {
        cursor = require_prev(chain, &cursor)?;
    }
    let height = (cursor.height - 9).max(0);
    let ancestor = chain
        .header_at(height)
        .ok_or(DifficultyError::MissingAncestor(height))?;
    Ok(hash256_to_hex(&ancestor.hash))
}

/// Digest the honey key signs: SHA256d of the length-prefixed rand string.
pub fn hive_message_hash(rand_string: &str) -> Hash256 {
    let mut encoder = Encoder::new();
    encoder.write_var_str(rand_string);
    sha256d(&encoder.into_inner())
}

/// Hash a bee nonce is judged by. SHA256d of the serialized seed, txid and
/// nonce before MinotaurX; MinotaurX over their concatenated text after.
pub fn bee_hash(
    rand_string: &str,
    txid_hex: &[u8],
    bee_nonce: u32,
    era: HiveEra,
    hasher: &dyn PowHasher,
) -> Result<U256, HiveError> {
    let digest = match era {
        HiveEra::V1_2 => {
            let mut data = Vec::with_capacity(rand_string.len() + txid_hex.len() + 10);
            data.extend_from_slice(rand_string.as_bytes());
            data.extend_from_slice(txid_hex);
            data.extend_from_slice(bee_nonce.to_string().as_bytes());
            hasher
                .minotaurx_string(&data)
                .ok_or(HiveError::HasherUnavailable)?
        }
        HiveEra::V1_0 | HiveEra::V1_1 => {
            let mut encoder = Encoder::new();
            encoder.write_var_str(rand_string);
            encoder.write_var_bytes(txid_hex);
            encoder.write_u32_le(bee_nonce);
            sha256d(&encoder.into_inner())
        }
    };
    Ok(U256::from_little_endian(&digest))
}

fn recover_key_hash(signature: &[u8], digest: &Hash256) -> Option<[u8; 20]> {
    if signature.len() != COMPACT_SIG_LEN {
        return None;
    }
    let header = signature[0];
    if !(27..=34).contains(&header) {
        return None;
    }
    let compressed = header >= 31;
    let recovery = if compressed { header - 31 } else { header - 27 };
    let rec_id = RecoveryId::from_i32(recovery as i32).ok()?;
    let sig = RecoverableSignature::from_compact(&signature[1..], rec_id).ok()?;
    let msg = Message::from_digest_slice(digest).ok()?;
    let pubkey = secp256k1_verify().recover_ecdsa(&msg, &sig).ok()?;
    Some(if compressed {
        hash160(&pubkey.serialize())
    } else {
        hash160(&pubkey.serialize_uncompressed())
    })
}

/// Where and how a proof's BCT was resolved.
struct ResolvedBct {
    value: Amount,
    script_pubkey: Vec<u8>,
    height: i32,
    minotaurx: bool,
    tx: Option<Transaction>,
}

fn resolve_bct<B: BctSource + ?Sized>(
    bcts: &B,
    txid: &Hash256,
    claimed_height: i32,
    activations: &Activations,
) -> Result<ResolvedBct, HiveError> {
    if let Some(coin) = bcts.coin(&OutPoint::new(*txid, 0)) {
        lccd_log::log_category!(Category::Hive, "hive proof: bct found in coin set");
        return Ok(ResolvedBct {
            value: coin.value,
            minotaurx: activations.minotaurx_enabled(coin.height),
            height: coin.height,
            script_pubkey: coin.script_pubkey,
            tx: None,
        });
    }
    lccd_log::log_category!(Category::Hive, "hive proof: deep drill for bct");
    let (tx, height) = bcts
        .transaction(txid, claimed_height)
        .ok_or(HiveError::BctNotFound)?;
    let first = tx.vout.first().ok_or(HiveError::BctNotFound)?;
    Ok(ResolvedBct {
        value: first.value,
        script_pubkey: first.script_pubkey.clone(),
        height,
        minotaurx: activations.minotaurx_enabled(height),
        tx: Some(tx),
    })
}

fn community_donation<B: BctSource + ?Sized>(
    bcts: &B,
    bct: &mut ResolvedBct,
    txid: &Hash256,
    claimed_height: i32,
    params: &ConsensusParams,
) -> Result<Amount, HiveError> {
    let community_script = p2pkh_script(&params.hive.community_key_hash);
    if bct.tx.is_none() {
        match bcts.coin(&OutPoint::new(*txid, 1)) {
            Some(coin) => {
                if coin.script_pubkey != community_script {
                    return Err(HiveError::CommunityContribNotFound);
                }
                return Ok(coin.value);
            }
            None => {
                lccd_log::log_category!(Category::Hive, "hive proof: deep drill for community output");
                let (tx, _) = bcts
                    .transaction(txid, claimed_height)
                    .ok_or(HiveError::BctNotFound)?;
                bct.tx = Some(tx);
            }
        }
    }
    match bct.tx.as_ref().and_then(|tx| tx.vout.get(1)) {
        Some(out) if out.script_pubkey == community_script => Ok(out.value),
        _ => Err(HiveError::CommunityContribNotFound),
    }
}

/// Expected community fund payment for a BCT burning `fee` and donating
/// `donation`.
pub fn expected_donation(
    fee: Amount,
    donation: Amount,
    minotaurx: bool,
    params: &ConsensusParams,
) -> Amount {
    let mut expected = (fee + donation) / params.hive.community_contrib_factor;
    if minotaurx {
        expected += expected >> 1;
    }
    expected
}

/// Validates the bee proof of a Hive-mined block whose parent is `prev`.
pub fn check_hive_proof<S, B>(
    block: &Block,
    prev: &HeaderInfo,
    chain: &S,
    bcts: &B,
    hasher: &dyn PowHasher,
    activations: &Activations,
    params: &ConsensusParams,
) -> Result<(), HiveError>
where
    S: HeaderSource + ?Sized,
    B: BctSource + ?Sized,
{
    let result = check_hive_proof_inner(block, prev, chain, bcts, hasher, activations, params);
    if let Err(err) = &result {
        lccd_log::log_category!(
            Category::Hive,
            "hive proof rejected at height {}: {} ({})",
            prev.height + 1,
            err,
            err.reason()
        );
    }
    result
}

fn check_hive_proof_inner<S, B>(
    block: &Block,
    prev: &HeaderInfo,
    chain: &S,
    bcts: &B,
    hasher: &dyn PowHasher,
    activations: &Activations,
    params: &ConsensusParams,
) -> Result<(), HiveError>
where
    S: HeaderSource + ?Sized,
    B: BctSource + ?Sized,
{
    let hive = &params.hive;
    let block_height = prev.height + 1;

    if !activations.hive_enabled(prev.height) {
        return Err(HiveError::NotEnabled);
    }

    if activations.hive_1_1_enabled(prev.height) {
        let mut at_tip = 0;
        let mut cursor = *prev;
        while cursor.is_hive_mined(params) {
            cursor = require_prev(chain, &cursor)?;
            at_tip += 1;
        }
        if at_tip >= hive.max_consecutive_hive_blocks {
            return Err(HiveError::TooManyConsecutive(at_tip));
        }
    } else if prev.is_hive_mined(params) {
        return Err(HiveError::MustFollowPow);
    }

    if block
        .transactions
        .iter()
        .skip(1)
        .any(|tx| tx.is_bct(&hive.bee_creation_key_hash))
    {
        return Err(HiveError::ContainsBct);
    }

    let coinbase = block
        .transactions
        .first()
        .filter(|tx| tx.is_coinbase())
        .ok_or(HiveError::BadCoinbase)?;
    if !(2..=3).contains(&coinbase.vout.len()) {
        return Err(HiveError::BadOutputCount(coinbase.vout.len()));
    }

    let proof = HiveProof::parse(&coinbase.vout[0].script_pubkey)?;
    lccd_log::log_category!(
        Category::Hive,
        "hive proof: height={} nonce={} bct_height={} community={}",
        block_height,
        proof.bee_nonce,
        proof.claimed_height,
        proof.community_contrib
    );

    let rand_string = deterministic_rand_string(chain, prev, params)?;
    let target = compact_to_u256(get_next_hive_work_required(chain, prev, activations, params)?)
        .map_err(DifficultyError::from)?;
    let era = activations.hive_era(prev.height);
    let hash = bee_hash(&rand_string, proof.txid_hex, proof.bee_nonce, era, hasher)?;
    if hash >= target {
        return Err(HiveError::HashAboveTarget);
    }

    let honey_key =
        p2pkh_key_hash(&coinbase.vout[1].script_pubkey).ok_or(HiveError::BadHoneyAddress)?;
    let signer = recover_key_hash(proof.signature, &hive_message_hash(&rand_string))
        .ok_or(HiveError::BadSignature)?;
    if signer != honey_key {
        return Err(HiveError::BadSignature);
    }

    let txid = proof.bct_txid().ok_or(HiveError::BctNotFound)?;
    let claimed_height = proof.claimed_height as i32;
    let mut bct = resolve_bct(bcts, &txid, claimed_height, activations)?;

    if proof.community_contrib {
        let donation = community_donation(bcts, &mut bct, &txid, claimed_height, params)?;
        let expected = expected_donation(bct.value, donation, bct.minotaurx, params);
        if donation != expected {
            return Err(HiveError::CommunityContribMismatch {
                paid: donation,
                expected,
            });
        }
        bct.value += donation;
    }

    if i64::from(bct.height) != i64::from(proof.claimed_height) {
        return Err(HiveError::HeightMismatch {
            claimed: proof.claimed_height,
            found: bct.height,
        });
    }

    let depth = block_height - bct.height;
    if depth < hive.bee_gestation_blocks {
        return Err(HiveError::BctImmature);
    }
    if depth > hive.bee_gestation_blocks + hive.bee_lifespan_blocks {
        return Err(HiveError::BctExpired);
    }

    let bct_honey = bct_honey_script(&bct.script_pubkey, &hive.bee_creation_key_hash)
        .ok_or(HiveError::NotBctScript)?;
    if p2pkh_key_hash(bct_honey) != Some(honey_key) {
        return Err(HiveError::HoneyMismatch);
    }

    let cost = bee_cost(bct.height, params);
    if bct.value < hive.min_bee_cost {
        return Err(HiveError::BelowMinBeeCost);
    }
    if bct.value < cost {
        return Err(HiveError::BelowBeeCost);
    }
    let bees = bct.value / cost;
    lccd_log::log_category!(
        Category::Hive,
        "hive proof: bct_value={} bee_cost={} bees={}",
        bct.value,
        cost,
        bees
    );
    if Amount::from(proof.bee_nonce) >= bees {
        return Err(HiveError::NonceTooHigh {
            nonce: proof.bee_nonce,
            bees,
        });
    }

    Ok(())
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BeePopulation {
    pub immature: u64,
    pub mature: u64,
}

/// Live bees on the network as seen from a tip.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HiveInfo {
    pub immature_bees: u64,
    pub immature_bcts: u32,
    pub mature_bees: u64,
    pub mature_bcts: u32,
    pub potential_lifespan_rewards: Amount,
    /// Projected population per block ahead of the tip, when requested.
    pub population: Option<Vec<BeePopulation>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HiveInfoError {
    MissingBlock(i32),
}

impl std::fmt::Display for HiveInfoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HiveInfoError::MissingBlock(height) => {
                write!(f, "block at height {height} not available; can't count bees")
            }
        }
    }
}

impl std::error::Error for HiveInfoError {}

/// Counts the bees created in the last `gestation + lifespan` blocks up to and
/// including `tip`.
pub fn network_hive_info<S, B>(
    chain: &S,
    blocks: &B,
    tip: &HeaderInfo,
    activations: &Activations,
    params: &ConsensusParams,
    with_population: bool,
) -> Result<HiveInfo, HiveInfoError>
where
    S: HeaderSource + ?Sized,
    B: BlockSource + ?Sized,
{
    let hive = &params.hive;
    let total_lifespan = hive.bee_lifespan_blocks + hive.bee_gestation_blocks;

    let mut reward = block_subsidy(tip.height, params);
    if activations.minotaurx_enabled(tip.height) {
        reward += reward >> 1;
    }
    let typical = if activations.hive_1_1_enabled(tip.height) {
        hive.hive_block_spacing_target_typical_1_1
    } else {
        hive.hive_block_spacing_target_typical
    };

    let mut info = HiveInfo {
        potential_lifespan_rewards: Amount::from(hive.bee_lifespan_blocks) * reward
            / Amount::from(typical),
        population: with_population
            .then(|| vec![BeePopulation::default(); total_lifespan.max(0) as usize]),
        ..HiveInfo::default()
    };

    let mut cursor = *tip;
    for i in 0..total_lifespan {
        if !cursor.is_hive_mined(params) {
            let block = blocks
                .block_at(cursor.height)
                .ok_or(HiveInfoError::MissingBlock(cursor.height))?;
            count_block_bees(&block, cursor.height, i, tip.height, activations, params, &mut info);
        }
        match prev_header(chain, &cursor) {
            Some(prev) => cursor = prev,
            None => break,
        }
    }

    Ok(info)
}

fn count_block_bees(
    block: &Block,
    height: i32,
    depth: i32,
    tip_height: i32,
    activations: &Activations,
    params: &ConsensusParams,
    info: &mut HiveInfo,
) {
    let hive = &params.hive;
    let cost = bee_cost(height, params);
    let minotaurx = activations.minotaurx_enabled(height);

    for tx in &block.transactions {
        let Some(creation) = tx.bee_creation(&hive.bee_creation_key_hash) else {
            continue;
        };
        let mut fee = creation.fee_paid;
        if let Some(donation) = tx.community_donation(&hive.community_key_hash) {
            if donation != expected_donation(fee, donation, minotaurx, params) {
                continue;
            }
            fee += donation;
        }
        let bees = (fee / cost).max(0) as u64;
        if depth < hive.bee_gestation_blocks {
            info.immature_bees += bees;
            info.immature_bcts += 1;
        } else {
            info.mature_bees += bees;
            info.mature_bcts += 1;
        }

        if let Some(population) = info.population.as_mut() {
            let matures = height + hive.bee_gestation_blocks;
            let dies = matures + hive.bee_lifespan_blocks;
            for block_height in height..dies {
                let pos = block_height - tip_height;
                if pos <= 0 || pos as usize >= population.len() {
                    continue;
                }
                let slot = &mut population[pos as usize];
                if block_height < matures {
                    slot.immature += bees;
                } else {
                    slot.mature += bees;
                }
            }
        }
    }
}
