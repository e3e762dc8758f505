//! Consensus parameter definitions.

use crate::constants::COINBASE_MATURITY;
use crate::deployments::{Bip9Deployment, Deployment, Hash256, MAX_DEPLOYMENTS};
use crate::money::{Amount, COIN, COIN_SCALE};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "main",
            Network::Testnet => "test",
            Network::Regtest => "regtest",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "main" | "mainnet" => Some(Network::Mainnet),
            "test" | "testnet" => Some(Network::Testnet),
            "regtest" => Some(Network::Regtest),
            _ => None,
        }
    }
}

/// Hashing algorithm selected by a post-fork block header.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum PowType {
    Sha256d = 0,
    MinotaurX = 1,
}

pub const NUM_POW_TYPES: usize = 2;

impl PowType {
    pub const ALL: [PowType; NUM_POW_TYPES] = [PowType::Sha256d, PowType::MinotaurX];

    /// Pow type encoded in bits 16..24 of the block version.
    pub fn from_version(version: i32) -> Option<Self> {
        match (version >> 16) & 0xff {
            0 => Some(PowType::Sha256d),
            1 => Some(PowType::MinotaurX),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PowType::Sha256d => "sha256d",
            PowType::MinotaurX => "minotaurx",
        }
    }

    pub const fn as_usize(self) -> usize {
        self as usize
    }
}

/// Parameters of the bee-driven Hive block production path.
#[derive(Clone, Debug)]
pub struct HiveParams {
    pub min_bee_cost: Amount,
    pub bee_cost_factor: Amount,
    /// P2PKH key hash of the unspendable bee creation address.
    pub bee_creation_key_hash: [u8; 20],
    /// P2PKH key hash of the community fund address.
    pub community_key_hash: [u8; 20],
    pub community_contrib_factor: Amount,
    pub bee_gestation_blocks: i32,
    pub bee_lifespan_blocks: i32,
    pub pow_limit_hive: Hash256,
    pub min_hive_check_block: i32,
    pub hive_target_adjust_aggression: i32,
    pub hive_block_spacing_target: i32,
    pub hive_block_spacing_target_typical: i32,
    pub hive_block_spacing_target_typical_1_1: i32,
    pub hive_nonce_marker: u32,
    pub max_consecutive_hive_blocks: i32,
    pub hive_difficulty_window: i32,
}

#[derive(Clone, Debug)]
pub struct ConsensusParams {
    pub network: Network,
    pub hash_genesis_block: Hash256,
    pub subsidy_halving_interval: i32,
    pub slow_start_blocks: i32,
    pub premine_amount: Amount,
    pub total_money_supply_height: i32,
    pub coinbase_maturity: i32,
    pub pow_limit: Hash256,
    pub pow_limit_sha: Hash256,
    pub pow_type_limits: [Hash256; NUM_POW_TYPES],
    pub pow_target_timespan: i64,
    pub pow_target_spacing: i64,
    pub pow_allow_min_difficulty_blocks: bool,
    pub pow_no_retargeting: bool,
    pub pow_fork_time: i64,
    pub last_scrypt_block: i32,
    pub lwma_averaging_window: i64,
    pub rule_change_activation_threshold: u32,
    pub miner_confirmation_window: u32,
    pub deployments: [Bip9Deployment; MAX_DEPLOYMENTS],
    pub hive: HiveParams,
}

impl ConsensusParams {
    pub fn difficulty_adjustment_interval(&self) -> i64 {
        self.pow_target_timespan / self.pow_target_spacing
    }

    pub fn deployment(&self, deployment: Deployment) -> &Bip9Deployment {
        &self.deployments[deployment.as_usize()]
    }

    pub fn deployment_mut(&mut self, deployment: Deployment) -> &mut Bip9Deployment {
        &mut self.deployments[deployment.as_usize()]
    }

    pub fn pow_type_limit(&self, pow_type: PowType) -> &Hash256 {
        &self.pow_type_limits[pow_type.as_usize()]
    }
}

#[derive(Debug)]
pub enum HexError {
    InvalidLength,
    InvalidHex,
}

impl std::fmt::Display for HexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HexError::InvalidLength => write!(f, "invalid hex length"),
            HexError::InvalidHex => write!(f, "invalid hex digit"),
        }
    }
}

impl std::error::Error for HexError {}

/// Parses a display-order (big-endian) hex string into an internal
/// little-endian hash, left-padding short input with zeros.
pub fn hash256_from_hex(input: &str) -> Result<Hash256, HexError> {
    let hex = input.trim();
    let hex = hex
        .strip_prefix("0x")
        .or_else(|| hex.strip_prefix("0X"))
        .unwrap_or(hex);
    if hex.is_empty() || hex.len() > 64 {
        return Err(HexError::InvalidLength);
    }

    let padded = format!("{hex:0>64}");
    let mut bytes = [0u8; 32];
    for (i, byte_out) in bytes.iter_mut().enumerate() {
        let start = i * 2;
        *byte_out =
            u8::from_str_radix(&padded[start..start + 2], 16).map_err(|_| HexError::InvalidHex)?;
    }
    bytes.reverse();
    Ok(bytes)
}

pub fn key_hash_from_hex(input: &str) -> Result<[u8; 20], HexError> {
    let hex = input.trim();
    if hex.len() != 40 {
        return Err(HexError::InvalidLength);
    }
    let mut bytes = [0u8; 20];
    for (i, byte_out) in bytes.iter_mut().enumerate() {
        let start = i * 2;
        *byte_out =
            u8::from_str_radix(&hex[start..start + 2], 16).map_err(|_| HexError::InvalidHex)?;
    }
    Ok(bytes)
}

pub fn consensus_params(network: Network) -> ConsensusParams {
    match network {
        Network::Mainnet => mainnet_consensus_params(),
        Network::Testnet => testnet_consensus_params(),
        Network::Regtest => regtest_consensus_params(),
    }
}

const ONE_YEAR: i64 = 31_536_000;

fn mainnet_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Mainnet,
        hash_genesis_block: hash256_from_hex(
            "12a765e31ffd4059bada1e25190f6e98c99d9714d334efa41a195a7e7e04bfe2",
        )
        .expect("mainnet genesis hash"),
        subsidy_halving_interval: 840_000,
        slow_start_blocks: 2_000,
        premine_amount: 550_000 * COIN * COIN_SCALE,
        total_money_supply_height: 6_215_968,
        coinbase_maturity: COINBASE_MATURITY,
        pow_limit: hash256_from_hex(
            "00000fffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        )
        .expect("mainnet pow limit"),
        pow_limit_sha: hash256_from_hex(
            "00000000ffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        )
        .expect("mainnet sha pow limit"),
        pow_type_limits: [
            hash256_from_hex("00000000ffffffffffffffffffffffffffffffffffffffffffffffffffffffff")
                .expect("mainnet sha256d type limit"),
            hash256_from_hex("000fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff")
                .expect("mainnet minotaurx type limit"),
        ],
        pow_target_timespan: 302_400,
        pow_target_spacing: 150,
        pow_allow_min_difficulty_blocks: false,
        pow_no_retargeting: false,
        pow_fork_time: 1_518_982_404,
        last_scrypt_block: 1_371_111,
        lwma_averaging_window: 90,
        rule_change_activation_threshold: 6_048,
        miner_confirmation_window: 8_064,
        deployments: [
            Bip9Deployment::new(28, 1_199_145_601, 1_230_767_999),
            Bip9Deployment::new(0, 1_485_561_600, 1_517_356_801),
            Bip9Deployment::new(1, 1_485_561_600, 1_517_356_801),
            Bip9Deployment::new(7, 1_545_782_400, 1_577_318_400),
            Bip9Deployment::new(9, 1_568_937_600, 1_600_560_000),
            Bip9Deployment::new(7, 1_631_793_600, 1_631_793_600 + ONE_YEAR),
            Bip9Deployment::new(9, 2_000_000_000, 2_000_000_000 + ONE_YEAR),
        ],
        hive: HiveParams {
            min_bee_cost: 10_000,
            bee_cost_factor: 2_500,
            bee_creation_key_hash: key_hash_from_hex("64bef321f2d4e128f4f26016476eb425165d90ba")
                .expect("mainnet bee creation address"),
            community_key_hash: key_hash_from_hex("c9f2c053d8d9f5ab9f02deabcd58bfda774f4746")
                .expect("mainnet community address"),
            community_contrib_factor: 10,
            bee_gestation_blocks: 48 * 24,
            bee_lifespan_blocks: 48 * 24 * 14,
            pow_limit_hive: hash256_from_hex(
                "0fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
            )
            .expect("mainnet hive limit"),
            min_hive_check_block: 1_537_566,
            hive_target_adjust_aggression: 30,
            hive_block_spacing_target: 2,
            hive_block_spacing_target_typical: 3,
            hive_block_spacing_target_typical_1_1: 2,
            hive_nonce_marker: 192,
            max_consecutive_hive_blocks: 2,
            hive_difficulty_window: 36,
        },
    }
}

fn testnet_consensus_params() -> ConsensusParams {
    let mut params = mainnet_consensus_params();
    params.network = Network::Testnet;
    params.hash_genesis_block =
        hash256_from_hex("4966625a4b2851d9fdee139e56211a0d88575f59ed816ff5e6a63deb4e3e29a0")
            .expect("testnet genesis hash");
    params.slow_start_blocks = 40;
    params.pow_allow_min_difficulty_blocks = true;
    params.pow_limit_sha =
        hash256_from_hex("000000ffffffffffffffffffffffffffffffffffffffffffffffffffffffffff")
            .expect("testnet sha pow limit");
    params.pow_type_limits[PowType::Sha256d.as_usize()] = params.pow_limit_sha;
    params.pow_fork_time = 1_707_828_195;
    params.last_scrypt_block = 10;
    params.rule_change_activation_threshold = 15;
    params.miner_confirmation_window = 20;
    params.deployments = [
        Bip9Deployment::new(28, 1_199_145_601, 1_230_767_999),
        Bip9Deployment::new(0, 1_707_828_286, 1_707_828_286 + ONE_YEAR),
        Bip9Deployment::new(1, 1_707_828_286, 1_707_828_286 + ONE_YEAR),
        Bip9Deployment::new(7, 1_707_828_286, 1_707_828_286 + ONE_YEAR),
        Bip9Deployment::new(9, 1_707_828_695, 1_707_828_695 + ONE_YEAR),
        Bip9Deployment::new(7, 1_707_829_366, 1_707_829_366 + ONE_YEAR),
        Bip9Deployment::new(9, 1_707_923_363, 1_707_923_363 + ONE_YEAR),
    ];
    params.hive.bee_creation_key_hash =
        key_hash_from_hex("573d62d0300f26c311a3ee592242def0e884e9f7")
            .expect("testnet bee creation address");
    params.hive.community_key_hash = key_hash_from_hex("3d8df0183b12b9537caff4c48a2ada83ea9a8d01")
        .expect("testnet community address");
    params.hive.bee_gestation_blocks = 40;
    params.hive.min_hive_check_block = 50;
    params
}

fn regtest_consensus_params() -> ConsensusParams {
    let mut params = testnet_consensus_params();
    params.network = Network::Regtest;
    params.hash_genesis_block =
        hash256_from_hex("530827f38f93b43ed12af0b3ad25a288dc02ed74d6d7857862df51fc56c416f9")
            .expect("regtest genesis hash");
    params.subsidy_halving_interval = 150;
    params.pow_limit =
        hash256_from_hex("7fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff")
            .expect("regtest pow limit");
    params.pow_limit_sha = params.pow_limit;
    params.pow_type_limits = [params.pow_limit, params.pow_limit];
    params.pow_no_retargeting = true;
    params.pow_fork_time = 1_543_765_622;
    params.last_scrypt_block = 200;
    params.rule_change_activation_threshold = 108;
    params.miner_confirmation_window = 144;
    params.deployments = [
        Bip9Deployment::new(28, 0, Bip9Deployment::NO_TIMEOUT),
        Bip9Deployment::new(0, 0, Bip9Deployment::NO_TIMEOUT),
        Bip9Deployment::always_active(1),
        Bip9Deployment::never_active(7),
        Bip9Deployment::never_active(9),
        Bip9Deployment::never_active(7),
        Bip9Deployment::never_active(9),
    ];
    params.hive.bee_gestation_blocks = 10;
    params.hive.bee_lifespan_blocks = 100;
    params.hive.min_hive_check_block = 0;
    params
}
