//! Transaction types and their consensus encoding.

use lccd_consensus::constants::{MAX_BIP125_RBF_SEQUENCE, SEQUENCE_FINAL};
use lccd_consensus::money::Amount;
use lccd_consensus::Hash256;

use crate::encoding::{decode, encode, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;
use crate::outpoint::OutPoint;
use crate::script::{bct_honey_script, p2pkh_key_hash, OP_BEE, OP_RETURN};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxIn {
    pub fn new(prevout: OutPoint, script_sig: Vec<u8>) -> Self {
        Self {
            prevout,
            script_sig,
            sequence: SEQUENCE_FINAL,
        }
    }
}

impl Encodable for TxIn {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.prevout.consensus_encode(encoder);
        encoder.write_var_bytes(&self.script_sig);
        encoder.write_u32_le(self.sequence);
    }
}

impl Decodable for TxIn {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let prevout = OutPoint::consensus_decode(decoder)?;
        let script_sig = decoder.read_var_bytes()?;
        let sequence = decoder.read_u32_le()?;
        Ok(Self {
            prevout,
            script_sig,
            sequence,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOut {
    pub value: Amount,
    pub script_pubkey: Vec<u8>,
}

impl TxOut {
    pub fn new(value: Amount, script_pubkey: Vec<u8>) -> Self {
        Self {
            value,
            script_pubkey,
        }
    }
}

impl Encodable for TxOut {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
    }
}

impl Decodable for TxOut {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let value = decoder.read_i64_le()?;
        let script_pubkey = decoder.read_var_bytes()?;
        Ok(Self {
            value,
            script_pubkey,
        })
    }
}

/// Bee creation details extracted from a transaction's first output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BeeCreation<'a> {
    pub fee_paid: Amount,
    pub honey_script: &'a [u8],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn consensus_encode(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode(bytes)
    }

    pub fn txid(&self) -> Hash256 {
        sha256d(&self.consensus_encode())
    }

    pub fn serialized_size(&self) -> usize {
        self.consensus_encode().len()
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].prevout.is_null()
    }

    /// Coinbase of a Hive-mined block: a zero-valued `OP_RETURN OP_BEE`
    /// proof output in first position.
    pub fn is_hive_coinbase(&self) -> bool {
        self.is_coinbase()
            && self.vout.first().is_some_and(|out| {
                out.value == 0
                    && out.script_pubkey.len() > 1
                    && out.script_pubkey[0] == OP_RETURN
                    && out.script_pubkey[1] == OP_BEE
            })
    }

    /// Returns the bee creation details when this is a bee creation transaction
    /// paying `bee_creation_key_hash`.
    pub fn bee_creation(&self, bee_creation_key_hash: &[u8; 20]) -> Option<BeeCreation<'_>> {
        let first = self.vout.first()?;
        let honey_script = bct_honey_script(&first.script_pubkey, bee_creation_key_hash)?;
        Some(BeeCreation {
            fee_paid: first.value,
            honey_script,
        })
    }

    pub fn is_bct(&self, bee_creation_key_hash: &[u8; 20]) -> bool {
        self.bee_creation(bee_creation_key_hash).is_some()
    }

    /// Returns the community fund donation when output 1 pays the fund.
    pub fn community_donation(&self, community_key_hash: &[u8; 20]) -> Option<Amount> {
        let out = self.vout.get(1)?;
        (p2pkh_key_hash(&out.script_pubkey)? == *community_key_hash).then_some(out.value)
    }

    /// Sum of output values, or `None` on overflow.
    pub fn value_out(&self) -> Option<Amount> {
        self.vout
            .iter()
            .try_fold(0i64, |acc, out| acc.checked_add(out.value))
    }

    /// True when any input opts into replacement (sequence below final - 1).
    pub fn signals_opt_in_rbf(&self) -> bool {
        self.vin
            .iter()
            .any(|input| input.sequence <= MAX_BIP125_RBF_SEQUENCE)
    }
}

impl Encodable for Transaction {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_le(self.version);
        encoder.write_varint(self.vin.len() as u64);
        for input in &self.vin {
            input.consensus_encode(encoder);
        }
        encoder.write_varint(self.vout.len() as u64);
        for output in &self.vout {
            output.consensus_encode(encoder);
        }
        encoder.write_u32_le(self.lock_time);
    }
}

impl Decodable for Transaction {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_i32_le()?;
        let vin_count = decoder.read_varint()? as usize;
        let mut vin = Vec::with_capacity(vin_count.min(decoder.remaining() / 41));
        for _ in 0..vin_count {
            vin.push(TxIn::consensus_decode(decoder)?);
        }
        let vout_count = decoder.read_varint()? as usize;
        let mut vout = Vec::with_capacity(vout_count.min(decoder.remaining() / 9));
        for _ in 0..vout_count {
            vout.push(TxOut::consensus_decode(decoder)?);
        }
        let lock_time = decoder.read_u32_le()?;
        Ok(Self {
            version,
            vin,
            vout,
            lock_time,
        })
    }
}
