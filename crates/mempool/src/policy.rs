use lccd_consensus::money::Amount;
use lccd_primitives::encoding::varint_len;
use lccd_primitives::script::{
    bct_honey_script, classify_script_pubkey, is_push_only, is_unspendable, ScriptType,
};
use lccd_primitives::transaction::Transaction;

use crate::error::{MempoolError, MempoolErrorKind};

pub const DEFAULT_MAX_MEMPOOL_BYTES: usize = 300 * 1_000_000;
pub const DEFAULT_ANCESTOR_LIMIT: usize = 25;
pub const DEFAULT_ANCESTOR_SIZE_LIMIT: u64 = 101 * 1000;
pub const DEFAULT_DESCENDANT_LIMIT: u64 = 25;
pub const DEFAULT_DESCENDANT_SIZE_LIMIT: u64 = 101 * 1000;
pub const DEFAULT_MIN_RELAY_FEE_PER_KB: Amount = 1000;
pub const DEFAULT_INCREMENTAL_RELAY_FEE_PER_KB: Amount = 1000;
pub const DEFAULT_EXPIRY_HOURS: i64 = 336;
pub const DEFAULT_MAX_ORPHANS: usize = 100;

const MAX_STANDARD_TX_SIZE: usize = 100_000;
const MAX_STANDARD_SCRIPTSIG_SIZE: usize = 1650;
const MAX_OP_RETURN_RELAY: usize = 83;
/// Bytes needed to spend a typical output, counted into the dust threshold.
const SPEND_INPUT_SIZE: usize = 148;

/// Fee rate in base units per 1000 bytes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FeeRate(Amount);

impl FeeRate {
    pub const ZERO: FeeRate = FeeRate(0);

    pub const fn per_kb(per_kb: Amount) -> Self {
        Self(per_kb)
    }

    /// Rate of paying `fee` for `size` bytes.
    pub fn from_fee(fee: Amount, size: u64) -> Self {
        if size == 0 {
            return Self(0);
        }
        let rate = i128::from(fee) * 1000 / i128::from(size);
        Self(rate.clamp(i128::from(Amount::MIN), i128::from(Amount::MAX)) as Amount)
    }

    pub fn fee_per_kb(&self) -> Amount {
        self.0
    }

    /// Fee this rate asks for `size` bytes. A positive rate never rounds to zero.
    pub fn fee(&self, size: u64) -> Amount {
        let fee = i128::from(self.0) * i128::from(size) / 1000;
        let fee = fee.clamp(i128::from(Amount::MIN), i128::from(Amount::MAX)) as Amount;
        if fee == 0 && size != 0 && self.0 > 0 {
            return 1;
        }
        fee
    }

    pub fn saturating_add(self, other: FeeRate) -> FeeRate {
        FeeRate(self.0.saturating_add(other.0))
    }
}

impl std::fmt::Display for FeeRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} per kB", self.0)
    }
}

#[derive(Clone, Debug)]
pub struct MempoolConfig {
    pub max_bytes: usize,
    /// Ancestor count limit, counting the entry itself.
    pub ancestor_limit: usize,
    pub ancestor_size_limit: u64,
    /// Descendant count limit, counting the entry itself.
    pub descendant_limit: u64,
    pub descendant_size_limit: u64,
    pub min_relay_fee: FeeRate,
    pub incremental_relay_fee: FeeRate,
    pub expiry_hours: i64,
    pub max_orphans: usize,
    pub enable_replacement: bool,
    pub require_standard: bool,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_MEMPOOL_BYTES,
            ancestor_limit: DEFAULT_ANCESTOR_LIMIT,
            ancestor_size_limit: DEFAULT_ANCESTOR_SIZE_LIMIT,
            descendant_limit: DEFAULT_DESCENDANT_LIMIT,
            descendant_size_limit: DEFAULT_DESCENDANT_SIZE_LIMIT,
            min_relay_fee: FeeRate::per_kb(DEFAULT_MIN_RELAY_FEE_PER_KB),
            incremental_relay_fee: FeeRate::per_kb(DEFAULT_INCREMENTAL_RELAY_FEE_PER_KB),
            expiry_hours: DEFAULT_EXPIRY_HOURS,
            max_orphans: DEFAULT_MAX_ORPHANS,
            enable_replacement: true,
            require_standard: true,
        }
    }
}

impl MempoolConfig {
    pub fn expiry_secs(&self) -> i64 {
        self.expiry_hours.saturating_mul(60 * 60)
    }
}

/// Outputs worth less than three times the fee to spend them are dust.
pub fn is_dust(value: Amount, script_pubkey: &[u8], min_relay_fee: FeeRate) -> bool {
    if is_unspendable(script_pubkey) {
        return false;
    }
    let out_size = 8 + varint_len(script_pubkey.len() as u64) + script_pubkey.len();
    let spend_size = (out_size + SPEND_INPUT_SIZE) as u64;
    value < min_relay_fee.fee(spend_size).saturating_mul(3)
}

/// Relay standardness of a transaction's shape. Bee creation outputs paying
/// `bee_creation_key_hash` count as standard.
pub fn check_standard(
    tx: &Transaction,
    min_relay_fee: FeeRate,
    bee_creation_key_hash: &[u8; 20],
) -> Result<(), MempoolError> {
    if !(1..=2).contains(&tx.version) {
        return Err(MempoolError::new(MempoolErrorKind::NonStandard, "version"));
    }
    if tx.serialized_size() > MAX_STANDARD_TX_SIZE {
        return Err(MempoolError::new(MempoolErrorKind::NonStandard, "tx-size"));
    }
    for input in &tx.vin {
        if input.script_sig.len() > MAX_STANDARD_SCRIPTSIG_SIZE {
            return Err(MempoolError::new(
                MempoolErrorKind::NonStandard,
                "scriptsig-size",
            ));
        }
        if !is_push_only(&input.script_sig) {
            return Err(MempoolError::new(
                MempoolErrorKind::NonStandard,
                "scriptsig-not-pushonly",
            ));
        }
    }

    let mut op_return_count = 0usize;
    for output in &tx.vout {
        match classify_script_pubkey(&output.script_pubkey) {
            ScriptType::NullData => {
                if output.script_pubkey.len() > MAX_OP_RETURN_RELAY {
                    return Err(MempoolError::new(
                        MempoolErrorKind::NonStandard,
                        "scriptpubkey",
                    ));
                }
                op_return_count += 1;
                continue;
            }
            ScriptType::P2Pk | ScriptType::P2Pkh | ScriptType::P2Sh => {}
            ScriptType::P2Wpkh | ScriptType::P2Wsh => {
                return Err(MempoolError::new(
                    MempoolErrorKind::NonStandard,
                    "witness-program",
                ));
            }
            ScriptType::Unknown => {
                if bct_honey_script(&output.script_pubkey, bee_creation_key_hash).is_none() {
                    return Err(MempoolError::new(
                        MempoolErrorKind::NonStandard,
                        "scriptpubkey",
                    ));
                }
            }
        }
        if is_dust(output.value, &output.script_pubkey, min_relay_fee) {
            return Err(MempoolError::new(MempoolErrorKind::NonStandard, "dust"));
        }
    }
    if op_return_count > 1 {
        return Err(MempoolError::new(
            MempoolErrorKind::NonStandard,
            "multi-op-return",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lccd_primitives::outpoint::OutPoint;
    use lccd_primitives::script::{bct_script, p2pkh_script, OP_RETURN};
    use lccd_primitives::transaction::{TxIn, TxOut};

    fn spend(outputs: Vec<TxOut>) -> Transaction {
        Transaction {
            version: 1,
            vin: vec![TxIn::new(OutPoint::new([1u8; 32], 0), vec![0x01, 0x02])],
            vout: outputs,
            lock_time: 0,
        }
    }

    #[test]
    fn fee_rate_rounds_up_to_one_unit() {
        let rate = FeeRate::per_kb(1000);
        assert_eq!(rate.fee(250), 250);
        assert_eq!(FeeRate::per_kb(1).fee(10), 1);
        assert_eq!(FeeRate::ZERO.fee(10), 0);
        assert_eq!(FeeRate::from_fee(500, 250), FeeRate::per_kb(2000));
        assert_eq!(FeeRate::from_fee(500, 0), FeeRate::ZERO);
    }

    #[test]
    fn dust_threshold_follows_relay_fee() {
        let script = p2pkh_script(&[3u8; 20]);
        // 34 byte output plus 148 byte spend at 1000/kB, times three
        assert!(is_dust(545, &script, FeeRate::per_kb(1000)));
        assert!(!is_dust(546, &script, FeeRate::per_kb(1000)));
        assert!(!is_dust(0, &[OP_RETURN], FeeRate::per_kb(1000)));
    }

    #[test]
    fn standardness_rejects_unknown_and_dust_outputs() {
        let relay = FeeRate::per_kb(1000);
        let key = [9u8; 20];
        let ok = spend(vec![TxOut::new(10_000, p2pkh_script(&[3u8; 20]))]);
        assert!(check_standard(&ok, relay, &key).is_ok());

        let dust = spend(vec![TxOut::new(1, p2pkh_script(&[3u8; 20]))]);
        assert_eq!(check_standard(&dust, relay, &key).unwrap_err().reason, "dust");

        let unknown = spend(vec![TxOut::new(10_000, vec![0x76])]);
        assert_eq!(
            check_standard(&unknown, relay, &key).unwrap_err().reason,
            "scriptpubkey"
        );

        let bct = spend(vec![TxOut::new(10_000, bct_script(&key, &[4u8; 20]))]);
        assert!(check_standard(&bct, relay, &key).is_ok());

        let two_data = spend(vec![
            TxOut::new(0, vec![OP_RETURN, 0x01, 0xaa]),
            TxOut::new(0, vec![OP_RETURN, 0x01, 0xbb]),
        ]);
        assert_eq!(
            check_standard(&two_data, relay, &key).unwrap_err().reason,
            "multi-op-return"
        );
    }
}
