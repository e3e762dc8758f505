use lccd_consensus::params::PowType;
use lccd_consensus::{ConsensusParams, Hash256};
use lccd_primitives::block::BlockHeader;
use primitive_types::U256;

use crate::difficulty::{compact_to_u256, limit_to_u256, CompactError};

/// Hash functions the node links from elsewhere. SHA256d is built in; the
/// scrypt and MinotaurX implementations are supplied by the embedder.
pub trait PowHasher: Send + Sync {
    /// scrypt(1024, 1, 1) over the 80-byte header.
    fn scrypt(&self, header: &[u8]) -> Option<Hash256>;
    /// MinotaurX over the 80-byte header.
    fn minotaurx_header(&self, header: &[u8]) -> Option<Hash256>;
    /// MinotaurX over an arbitrary string, as Hive 1.2 bee hashes use it.
    fn minotaurx_string(&self, data: &[u8]) -> Option<Hash256>;
}

/// Hasher that supports none of the external algorithms. Blocks needing them
/// fail with [`PowError::HasherUnavailable`].
#[derive(Clone, Copy, Debug, Default)]
pub struct NoExternalHashers;

impl PowHasher for NoExternalHashers {
    fn scrypt(&self, _header: &[u8]) -> Option<Hash256> {
        None
    }

    fn minotaurx_header(&self, _header: &[u8]) -> Option<Hash256> {
        None
    }

    fn minotaurx_string(&self, _data: &[u8]) -> Option<Hash256> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowError {
    InvalidBits(&'static str),
    HashMismatch,
    UnknownPowType(i32),
    HasherUnavailable(&'static str),
    Compact(CompactError),
}

impl PowError {
    /// Reject reason reported to peers.
    pub fn reason(&self) -> &'static str {
        match self {
            PowError::InvalidBits(_) | PowError::Compact(_) => "bad-diffbits",
            PowError::HashMismatch => "high-hash",
            PowError::UnknownPowType(_) => "bad-pow-type",
            PowError::HasherUnavailable(_) => "pow-hasher-unavailable",
        }
    }
}

impl std::fmt::Display for PowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowError::InvalidBits(message) => write!(f, "{message}"),
            PowError::HashMismatch => write!(f, "pow hash does not meet target"),
            PowError::UnknownPowType(version) => {
                write!(f, "unknown pow type in version {version:#010x}")
            }
            PowError::HasherUnavailable(name) => write!(f, "{name} hasher unavailable"),
            PowError::Compact(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for PowError {}

impl From<CompactError> for PowError {
    fn from(err: CompactError) -> Self {
        PowError::Compact(err)
    }
}

/// Highest target any pow type may use.
pub fn max_pow_type_limit(params: &ConsensusParams) -> U256 {
    params
        .pow_type_limits
        .iter()
        .map(limit_to_u256)
        .max()
        .unwrap_or_default()
}

/// Whether `hash` satisfies the compact target `bits`.
pub fn check_proof_of_work(hash: &Hash256, bits: u32, params: &ConsensusParams) -> bool {
    verify_proof_of_work(hash, bits, params).is_ok()
}

/// Checks `hash` against the compact target `bits`, naming the failure.
pub fn verify_proof_of_work(
    hash: &Hash256,
    bits: u32,
    params: &ConsensusParams,
) -> Result<(), PowError> {
    let target = compact_to_u256(bits)?;
    if target.is_zero() {
        return Err(PowError::InvalidBits("pow target is zero"));
    }
    if target > max_pow_type_limit(params) {
        return Err(PowError::InvalidBits("pow target above limit"));
    }
    if U256::from_little_endian(hash) > target {
        return Err(PowError::HashMismatch);
    }
    Ok(())
}

/// The hash a header's proof of work is measured with: scrypt up to the fork
/// time, then SHA256d or MinotaurX by pow type.
pub fn pow_hash(
    header: &BlockHeader,
    hasher: &dyn PowHasher,
    params: &ConsensusParams,
) -> Result<Hash256, PowError> {
    let bytes = header.consensus_encode();
    if i64::from(header.time) <= params.pow_fork_time {
        return hasher
            .scrypt(&bytes)
            .ok_or(PowError::HasherUnavailable("scrypt"));
    }
    if header.version >= 0x2000_0000 {
        return Ok(header.hash());
    }
    match header.pow_type() {
        Some(PowType::Sha256d) => Ok(header.hash()),
        Some(PowType::MinotaurX) => hasher
            .minotaurx_header(&bytes)
            .ok_or(PowError::HasherUnavailable("minotaurx")),
        None => Err(PowError::UnknownPowType(header.version)),
    }
}

/// Full header proof check for a PoW (not Hive) block.
pub fn validate_pow_header(
    header: &BlockHeader,
    hasher: &dyn PowHasher,
    params: &ConsensusParams,
) -> Result<(), PowError> {
    if header.prev_block == [0u8; 32] && header.hash() == params.hash_genesis_block {
        return Ok(());
    }
    let hash = pow_hash(header, hasher, params)?;
    verify_proof_of_work(&hash, header.bits, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lccd_consensus::params::{consensus_params, Network};

    #[test]
    fn rejects_hash_above_target_and_target_above_ceiling() {
        let params = consensus_params(Network::Mainnet);
        let bits = 0x1d00_ffff;
        let easy_hash = [0u8; 32];
        assert!(check_proof_of_work(&easy_hash, bits, &params));

        let mut hard_hash = [0u8; 32];
        hard_hash[31] = 0x01;
        assert!(!check_proof_of_work(&hard_hash, bits, &params));
        assert_eq!(
            verify_proof_of_work(&hard_hash, bits, &params),
            Err(PowError::HashMismatch)
        );

        // regtest-style easy target is above every mainnet type limit
        assert!(!check_proof_of_work(&easy_hash, 0x207f_ffff, &params));
        assert!(matches!(
            verify_proof_of_work(&easy_hash, 0, &params),
            Err(PowError::InvalidBits(_))
        ));
        assert_eq!(
            verify_proof_of_work(&easy_hash, 0x0492_3456, &params),
            Err(PowError::Compact(CompactError::Negative))
        );
    }

    #[test]
    fn pow_hash_selects_algorithm() {
        let params = consensus_params(Network::Mainnet);
        let mut header = BlockHeader {
            version: 0x2000_0000,
            time: (params.pow_fork_time + 1) as u32,
            bits: 0x1d00_ffff,
            ..Default::default()
        };
        assert_eq!(
            pow_hash(&header, &NoExternalHashers, &params),
            Ok(header.hash())
        );

        header.version = 0x1001_0000;
        assert_eq!(
            pow_hash(&header, &NoExternalHashers, &params),
            Err(PowError::HasherUnavailable("minotaurx"))
        );

        header.version = 0x1007_0000;
        assert!(matches!(
            pow_hash(&header, &NoExternalHashers, &params),
            Err(PowError::UnknownPowType(_))
        ));

        header.time = params.pow_fork_time as u32;
        assert_eq!(
            pow_hash(&header, &NoExternalHashers, &params),
            Err(PowError::HasherUnavailable("scrypt"))
        );
    }
}
