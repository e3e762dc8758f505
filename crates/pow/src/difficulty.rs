//! Difficulty and compact target utilities.

use std::cmp::Ordering;

use lccd_consensus::params::PowType;
use lccd_consensus::{ConsensusParams, Hash256};
use lccd_log::Category;
use lccd_primitives::block::BlockHeader;
use primitive_types::U256;

use crate::activation::Activations;
use crate::hive::get_next_hive_work_required;

/// Number of past blocks Dark Gravity Wave averages over.
pub const DGW_PAST_BLOCKS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactError {
    Negative,
    Overflow,
}

impl std::fmt::Display for CompactError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactError::Negative => write!(f, "compact target has negative sign bit"),
            CompactError::Overflow => write!(f, "compact target overflows 256-bit range"),
        }
    }
}

impl std::error::Error for CompactError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifficultyError {
    MissingAncestor(i32),
    Compact(CompactError),
}

impl std::fmt::Display for DifficultyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DifficultyError::MissingAncestor(height) => {
                write!(f, "header at height {height} not available")
            }
            DifficultyError::Compact(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for DifficultyError {}

impl From<CompactError> for DifficultyError {
    fn from(err: CompactError) -> Self {
        DifficultyError::Compact(err)
    }
}

/// The header fields difficulty and Hive rules look at, plus the block's height
/// and id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderInfo {
    pub height: i32,
    pub hash: Hash256,
    pub version: i32,
    pub time: i64,
    pub bits: u32,
    pub nonce: u32,
}

impl HeaderInfo {
    pub fn from_header(header: &BlockHeader, height: i32) -> Self {
        Self {
            height,
            hash: header.hash(),
            version: header.version,
            time: i64::from(header.time),
            bits: header.bits,
            nonce: header.nonce,
        }
    }

    pub fn is_hive_mined(&self, params: &ConsensusParams) -> bool {
        self.nonce == params.hive.hive_nonce_marker
    }

    pub fn pow_type(&self) -> Option<PowType> {
        PowType::from_version(self.version)
    }
}

/// Read access to the ancestors of the block being validated, by height.
pub trait HeaderSource {
    fn header_at(&self, height: i32) -> Option<HeaderInfo>;
}

impl HeaderSource for [HeaderInfo] {
    fn header_at(&self, height: i32) -> Option<HeaderInfo> {
        let base = self.first()?.height;
        let offset = usize::try_from(height.checked_sub(base)?).ok()?;
        self.get(offset).copied()
    }
}

impl HeaderSource for Vec<HeaderInfo> {
    fn header_at(&self, height: i32) -> Option<HeaderInfo> {
        self.as_slice().header_at(height)
    }
}

/// Parent of `header` if the source knows it.
pub fn prev_header<S: HeaderSource + ?Sized>(chain: &S, header: &HeaderInfo) -> Option<HeaderInfo> {
    if header.height <= 0 {
        return None;
    }
    chain.header_at(header.height - 1)
}

pub(crate) fn require_prev<S: HeaderSource + ?Sized>(
    chain: &S,
    header: &HeaderInfo,
) -> Result<HeaderInfo, DifficultyError> {
    prev_header(chain, header).ok_or(DifficultyError::MissingAncestor(header.height - 1))
}

/// What kind of block the next target is requested for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    Pow(PowType),
    Hive,
}

pub fn compact_to_u256(bits: u32) -> Result<U256, CompactError> {
    let size = bits >> 24;
    let mut word = bits & 0x007f_ffff;

    let value = if size <= 3 {
        word >>= 8 * (3 - size);
        U256::from(word)
    } else {
        let shift = 8 * (size - 3);
        if shift >= 256 {
            U256::zero()
        } else {
            U256::from(word) << shift
        }
    };

    if word != 0 {
        if bits & 0x0080_0000 != 0 {
            return Err(CompactError::Negative);
        }
        let overflow = size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32);
        if overflow {
            return Err(CompactError::Overflow);
        }
    }

    Ok(value)
}

pub fn u256_to_compact(value: U256) -> u32 {
    if value.is_zero() {
        return 0;
    }

    let mut size = value.bits().div_ceil(8) as u32;
    let mut compact: u32;

    if size <= 3 {
        compact = value.low_u32() << (8 * (3 - size));
    } else {
        let shift = 8 * (size - 3);
        compact = (value >> shift).low_u32();
    }

    if (compact & 0x0080_0000) != 0 {
        compact >>= 8;
        size += 1;
    }

    (size << 24) | (compact & 0x007f_ffff)
}

pub fn compact_to_target(bits: u32) -> Result<Hash256, CompactError> {
    let value = compact_to_u256(bits)?;
    Ok(value.to_little_endian())
}

pub fn target_to_compact(target: &Hash256) -> u32 {
    u256_to_compact(U256::from_little_endian(target))
}

pub fn limit_to_u256(limit: &Hash256) -> U256 {
    U256::from_little_endian(limit)
}

pub fn hash_meets_target(hash: &Hash256, target: &Hash256) -> bool {
    U256::from_little_endian(hash) <= U256::from_little_endian(target)
}

/// Expected number of hashes for a block at `bits`.
pub fn block_proof(bits: u32) -> Result<U256, CompactError> {
    let target = compact_to_u256(bits)?;
    if target.is_zero() {
        return Ok(U256::zero());
    }
    let one = U256::from(1u64);
    Ok((!target / (target + one)) + one)
}

pub fn cmp_be(a: &Hash256, b: &Hash256) -> Ordering {
    U256::from_little_endian(a).cmp(&U256::from_little_endian(b))
}

/// Difficulty as a multiple of the minimum (`0x1d00ffff`) target.
pub fn get_difficulty(bits: u32) -> f64 {
    let mut shift = (bits >> 24) & 0xff;
    let mut difficulty = f64::from(0x0000_ffffu32) / f64::from((bits & 0x00ff_ffff).max(1));
    while shift < 29 {
        difficulty *= 256.0;
        shift += 1;
    }
    while shift > 29 {
        difficulty /= 256.0;
        shift -= 1;
    }
    difficulty
}

fn capped(value: U256, limit: U256) -> u32 {
    u256_to_compact(value.min(limit))
}

/// Target for the block after `tip`, of the given kind.
pub fn next_work_required<S: HeaderSource + ?Sized>(
    chain: &S,
    tip: &HeaderInfo,
    next_time: i64,
    kind: BlockKind,
    activations: &Activations,
    params: &ConsensusParams,
) -> Result<u32, DifficultyError> {
    match kind {
        BlockKind::Hive => get_next_hive_work_required(chain, tip, activations, params),
        BlockKind::Pow(pow_type) if activations.minotaurx_enabled(tip.height) => {
            lwma_next_work_required(chain, tip, next_time, pow_type, params)
        }
        BlockKind::Pow(_) => get_next_work_required(chain, tip, next_time, activations, params),
    }
}

/// Proof-of-work target before MinotaurX: Dark Gravity Wave once the scrypt era
/// has ended, the Litecoin retarget before that.
pub fn get_next_work_required<S: HeaderSource + ?Sized>(
    chain: &S,
    tip: &HeaderInfo,
    next_time: i64,
    activations: &Activations,
    params: &ConsensusParams,
) -> Result<u32, DifficultyError> {
    if tip.height >= params.last_scrypt_block {
        dark_gravity_wave(chain, tip, next_time, activations, params)
    } else {
        classic_next_work_required(chain, tip, next_time, params)
    }
}

/// Linearly weighted moving average over the last `lwma_averaging_window`
/// blocks of `pow_type`.
pub fn lwma_next_work_required<S: HeaderSource + ?Sized>(
    chain: &S,
    tip: &HeaderInfo,
    next_time: i64,
    pow_type: PowType,
    params: &ConsensusParams,
) -> Result<u32, DifficultyError> {
    let pow_limit = limit_to_u256(params.pow_type_limit(pow_type));
    let limit_bits = u256_to_compact(pow_limit);

    let t = params.pow_target_spacing * 2;
    let n = params.lwma_averaging_window;
    let k = n * (n + 1) * t / 2;

    if params.pow_allow_min_difficulty_blocks && next_time > tip.time + t * 10 {
        lccd_log::log_category!(
            Category::Pow,
            "lwma: allowing {} pow limit (apparent stall)",
            pow_type.name()
        );
        return Ok(limit_bits);
    }

    if i64::from(tip.height) < n {
        return Ok(limit_bits);
    }

    let mut wanted = Vec::with_capacity(n as usize);
    let mut cursor = *tip;
    loop {
        if cursor.version >= 0x2000_0000 {
            lccd_log::log_category!(
                Category::Pow,
                "lwma: allowing {} pow limit (reached fork point at height {})",
                pow_type.name(),
                cursor.height
            );
            return Ok(limit_bits);
        }
        if cursor.is_hive_mined(params) || cursor.pow_type() != Some(pow_type) {
            cursor = require_prev(chain, &cursor)?;
            continue;
        }
        wanted.push(cursor);
        if wanted.len() as i64 == n {
            break;
        }
        cursor = require_prev(chain, &cursor)?;
    }

    let mut previous_timestamp = cursor.time;
    let mut sum_weighted_solvetimes: i64 = 0;
    let mut avg_target = U256::zero();
    let divisor_n = U256::from(n as u64);
    let divisor_k = U256::from(k as u64);

    for (j, block) in wanted.iter().rev().enumerate() {
        let this_timestamp = if block.time > previous_timestamp {
            block.time
        } else {
            previous_timestamp + 1
        };
        let solvetime = (6 * t).min(this_timestamp - previous_timestamp);
        previous_timestamp = this_timestamp;
        sum_weighted_solvetimes += solvetime * (j as i64 + 1);

        let target = compact_to_u256(block.bits)?;
        avg_target = avg_target.overflowing_add(target / divisor_n / divisor_k).0;
    }

    let (next_target, _) = avg_target.overflowing_mul(U256::from(sum_weighted_solvetimes as u64));
    if next_target > pow_limit {
        return Ok(limit_bits);
    }
    Ok(u256_to_compact(next_target))
}

/// Dark Gravity Wave v3 over the SHA256d limit, skipping Hive blocks.
pub fn dark_gravity_wave<S: HeaderSource + ?Sized>(
    chain: &S,
    tip: &HeaderInfo,
    next_time: i64,
    activations: &Activations,
    params: &ConsensusParams,
) -> Result<u32, DifficultyError> {
    let pow_limit = limit_to_u256(&params.pow_limit_sha);
    let limit_bits = u256_to_compact(pow_limit);

    if params.pow_allow_min_difficulty_blocks
        && next_time > tip.time + params.pow_target_spacing * 10
    {
        return Ok(limit_bits);
    }

    let mut last = *tip;
    if activations.hive_1_1_enabled(tip.height) {
        while last.is_hive_mined(params) {
            last = require_prev(chain, &last)?;
        }
    }

    if i64::from(last.height) - i64::from(params.last_scrypt_block) < DGW_PAST_BLOCKS {
        return Ok(limit_bits);
    }

    let mut cursor = last;
    let mut past_target_avg = U256::zero();
    for count in 1..=DGW_PAST_BLOCKS {
        while cursor.is_hive_mined(params) {
            cursor = require_prev(chain, &cursor)?;
        }
        let target = compact_to_u256(cursor.bits)?;
        past_target_avg = if count == 1 {
            target
        } else {
            let (scaled, _) = past_target_avg.overflowing_mul(U256::from(count as u64));
            scaled.overflowing_add(target).0 / U256::from((count + 1) as u64)
        };
        if count != DGW_PAST_BLOCKS {
            cursor = require_prev(chain, &cursor)?;
        }
    }

    let target_timespan = DGW_PAST_BLOCKS * params.pow_target_spacing;
    let actual_timespan = (last.time - cursor.time).clamp(target_timespan / 3, target_timespan * 3);

    let (mut next, _) = past_target_avg.overflowing_mul(U256::from(actual_timespan as u64));
    next /= U256::from(target_timespan as u64);

    Ok(capped(next, pow_limit))
}

/// Litecoin-style retarget every `difficulty_adjustment_interval` blocks.
pub fn classic_next_work_required<S: HeaderSource + ?Sized>(
    chain: &S,
    tip: &HeaderInfo,
    next_time: i64,
    params: &ConsensusParams,
) -> Result<u32, DifficultyError> {
    let limit_bits = target_to_compact(&params.pow_limit);
    let interval = params.difficulty_adjustment_interval();

    if (i64::from(tip.height) + 1) % interval != 0 {
        if params.pow_allow_min_difficulty_blocks {
            if next_time > tip.time + params.pow_target_spacing * 2 {
                return Ok(limit_bits);
            }
            let mut cursor = *tip;
            let mut blocks_to_search = interval - 1;
            while i64::from(cursor.height) % interval != 0
                && cursor.bits == limit_bits
                && blocks_to_search > 0
            {
                match prev_header(chain, &cursor) {
                    Some(prev) => cursor = prev,
                    None => break,
                }
                blocks_to_search -= 1;
            }
            return Ok(cursor.bits);
        }
        return Ok(tip.bits);
    }

    let blocks_to_go_back = if i64::from(tip.height) + 1 != interval {
        interval
    } else {
        interval - 1
    };

    let first_height = i64::from(tip.height) - blocks_to_go_back;
    let first = i32::try_from(first_height)
        .ok()
        .filter(|height| *height >= 0)
        .and_then(|height| chain.header_at(height))
        .ok_or(DifficultyError::MissingAncestor(first_height as i32))?;

    calculate_next_work_required(tip, first.time, params)
}

pub fn calculate_next_work_required(
    tip: &HeaderInfo,
    first_block_time: i64,
    params: &ConsensusParams,
) -> Result<u32, DifficultyError> {
    if params.pow_no_retargeting {
        return Ok(tip.bits);
    }

    let timespan = params.pow_target_timespan;
    let actual_timespan = (tip.time - first_block_time).clamp(timespan / 4, timespan * 4);

    let pow_limit = limit_to_u256(&params.pow_limit);
    let mut next = compact_to_u256(tip.bits)?;
    let shift = next.bits() > pow_limit.bits() - 1;
    if shift {
        next >>= 1;
    }
    next = next.overflowing_mul(U256::from(actual_timespan as u64)).0;
    next /= U256::from(timespan as u64);
    if shift {
        next <<= 1;
    }

    Ok(capped(next, pow_limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lccd_consensus::params::{consensus_params, Network};

    fn make_chain(
        base_height: i32,
        count: usize,
        base_time: i64,
        spacing: i64,
        bits: u32,
        version: i32,
    ) -> Vec<HeaderInfo> {
        (0..count)
            .map(|offset| HeaderInfo {
                height: base_height + offset as i32,
                hash: [offset as u8; 32],
                version,
                time: base_time + offset as i64 * spacing,
                bits,
                nonce: 0,
            })
            .collect()
    }

    #[test]
    fn compact_rejects_negative_and_overflow() {
        assert_eq!(compact_to_u256(0x0492_3456), Err(CompactError::Negative));
        assert_eq!(compact_to_u256(0x0180_0001), Ok(U256::zero()));
        assert_eq!(compact_to_u256(0x2301_0000), Err(CompactError::Overflow));
        // a set sign bit with a zero mantissa is zero, not negative
        assert_eq!(compact_to_u256(0x0180_0000), Ok(U256::zero()));
        assert_eq!(compact_to_u256(0x0112_3456), Ok(U256::from(0x12u64)));
    }

    #[test]
    fn difficulty_of_minimum_target_is_one() {
        assert!((get_difficulty(0x1d00_ffff) - 1.0).abs() < 1e-12);
        assert!(get_difficulty(0x1b04_04cb) > 16_000.0);
    }

    #[test]
    fn classic_retarget_clamps_to_quarter() {
        let mut params = consensus_params(Network::Mainnet);
        params.last_scrypt_block = i32::MAX;
        let interval = params.difficulty_adjustment_interval() as usize;
        // blocks ten times too fast
        let chain = make_chain(0, interval * 2, 1_000_000, 15, 0x1d00_ffff, 1);
        let tip = chain[interval * 2 - 1];
        let activations = Activations::default();
        let bits = get_next_work_required(&chain, &tip, tip.time + 150, &activations, &params)
            .expect("retarget");
        let old = compact_to_u256(0x1d00_ffff).expect("old");
        let new = compact_to_u256(bits).expect("new");
        assert_eq!(new, old / U256::from(4u64));

        // off a boundary the previous bits carry over
        let tip = chain[interval];
        let bits = get_next_work_required(&chain, &tip, tip.time + 150, &activations, &params)
            .expect("carry");
        assert_eq!(bits, 0x1d00_ffff);
    }

    #[test]
    fn classic_retarget_honours_no_retargeting() {
        let params = consensus_params(Network::Regtest);
        let tip = HeaderInfo {
            height: 1,
            hash: [0u8; 32],
            version: 1,
            time: 100,
            bits: 0x207f_ffff,
            nonce: 0,
        };
        assert_eq!(
            calculate_next_work_required(&tip, 0, &params).expect("bits"),
            0x207f_ffff
        );
    }

    #[test]
    fn dgw_returns_limit_near_scrypt_end_and_is_stable() {
        let params = consensus_params(Network::Mainnet);
        let limit_bits = target_to_compact(&params.pow_limit_sha);
        let spacing = params.pow_target_spacing;

        let activations = Activations::default();
        let base = params.last_scrypt_block;
        let chain = make_chain(base, 30, 1_600_000_000, spacing, 0x1c0f_ffff, 0x2000_0000);
        let early = chain[10];
        let bits = dark_gravity_wave(&chain, &early, early.time + spacing, &activations, &params)
            .expect("dgw");
        assert_eq!(bits, limit_bits);

        let tip = chain[29];
        let bits = dark_gravity_wave(&chain, &tip, tip.time + spacing, &activations, &params)
            .expect("dgw");
        let expected = compact_to_u256(0x1c0f_ffff).expect("target")
            * U256::from((23 * spacing) as u64)
            / U256::from((24 * spacing) as u64);
        assert_eq!(bits, u256_to_compact(expected));
    }

    #[test]
    fn dgw_skips_hive_blocks() {
        let params = consensus_params(Network::Mainnet);
        let spacing = params.pow_target_spacing;
        let activations = Activations::default();
        let base = params.last_scrypt_block;
        let mut chain = make_chain(base, 40, 1_600_000_000, spacing, 0x1c0f_ffff, 0x2000_0000);
        let tip = chain[39];
        let plain = dark_gravity_wave(&chain, &tip, 0, &activations, &params).expect("dgw");

        for header in chain.iter_mut().skip(30).step_by(3).take(3) {
            header.nonce = params.hive.hive_nonce_marker;
            header.bits = 0x207f_ffff;
        }
        let with_hive = dark_gravity_wave(&chain, &tip, 0, &activations, &params).expect("dgw");
        assert_ne!(with_hive, 0x207f_ffff);
        let plain_target = compact_to_u256(plain).expect("target");
        let hive_target = compact_to_u256(with_hive).expect("target");
        // skipped blocks stretch the measured timespan, easing the target
        assert!(hive_target >= plain_target);
    }

    #[test]
    fn lwma_stable_under_perfect_timing() {
        let params = consensus_params(Network::Mainnet);
        let n = params.lwma_averaging_window as usize;
        let t = params.pow_target_spacing * 2;
        let chain = make_chain(5_000, n + 1, 1_700_000_000, t, 0x1d00_ffff, 0x1000_0000);
        let tip = chain[n];
        let bits = lwma_next_work_required(&chain, &tip, tip.time + t, PowType::Sha256d, &params)
            .expect("lwma");
        let expected = compact_to_u256(0x1d00_ffff).expect("target");
        let actual = compact_to_u256(bits).expect("target");
        // integer division in the averaging loses at most a few units per block
        assert!(actual <= expected);
        assert!(expected - actual < expected / U256::from(1_000u64));
    }

    #[test]
    fn lwma_hits_limit_at_fork_point_and_filters_types() {
        let params = consensus_params(Network::Mainnet);
        let n = params.lwma_averaging_window as usize;
        let t = params.pow_target_spacing * 2;
        let limit_bits = target_to_compact(params.pow_type_limit(PowType::MinotaurX));

        // only sha256d blocks: walking for minotaurx reaches the old versions
        let mut chain = make_chain(5_000, n * 2, 1_700_000_000, t, 0x1d00_ffff, 0x2000_0000);
        for header in chain.iter_mut().skip(n) {
            header.version = 0x1000_0000;
        }
        let tip = chain[n * 2 - 1];
        let bits = lwma_next_work_required(&chain, &tip, tip.time + t, PowType::MinotaurX, &params)
            .expect("lwma");
        assert_eq!(bits, limit_bits);

        let short = make_chain(0, 10, 1_700_000_000, t, 0x1d00_ffff, 0x1000_0000);
        let bits = lwma_next_work_required(&short, &short[9], 0, PowType::Sha256d, &params)
            .expect("lwma");
        assert_eq!(bits, target_to_compact(params.pow_type_limit(PowType::Sha256d)));
    }

    #[test]
    fn missing_history_is_an_error() {
        let params = consensus_params(Network::Mainnet);
        let t = params.pow_target_spacing * 2;
        let chain = make_chain(5_000, 3, 1_700_000_000, t, 0x1d00_ffff, 0x1000_0000);
        let err = lwma_next_work_required(&chain, &chain[2], 0, PowType::Sha256d, &params)
            .expect_err("history too short");
        assert_eq!(err, DifficultyError::MissingAncestor(4_999));
    }
}
