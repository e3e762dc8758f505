//! Block header and block types.

use lccd_consensus::params::PowType;
use lccd_consensus::Hash256;

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;
use crate::merkle::{compute_merkle_root, MerkleRoot};
use crate::transaction::Transaction;

pub const HEADER_SIZE: usize = 80;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn consensus_encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(HEADER_SIZE);
        Encodable::consensus_encode(self, &mut encoder);
        encoder.into_inner()
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        crate::encoding::decode(bytes)
    }

    pub fn hash(&self) -> Hash256 {
        sha256d(&self.consensus_encode())
    }

    /// Hive-mined headers carry the network's nonce marker instead of a
    /// proof-of-work nonce.
    pub fn is_hive_mined(&self, hive_nonce_marker: u32) -> bool {
        self.nonce == hive_nonce_marker
    }

    /// Hashing algorithm named in the version field, `None` for unknown types.
    pub fn pow_type(&self) -> Option<PowType> {
        PowType::from_version(self.version)
    }

    pub fn is_null(&self) -> bool {
        self.bits == 0
    }
}

impl Encodable for BlockHeader {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_le(self.version);
        encoder.write_hash_le(&self.prev_block);
        encoder.write_hash_le(&self.merkle_root);
        encoder.write_u32_le(self.time);
        encoder.write_u32_le(self.bits);
        encoder.write_u32_le(self.nonce);
    }
}

impl Decodable for BlockHeader {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            version: decoder.read_i32_le()?,
            prev_block: decoder.read_hash_le()?,
            merkle_root: decoder.read_hash_le()?,
            time: decoder.read_u32_le()?,
            bits: decoder.read_u32_le()?,
            nonce: decoder.read_u32_le()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn consensus_encode(&self) -> Vec<u8> {
        crate::encoding::encode(self)
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, BlockDecodeError> {
        let mut decoder = Decoder::new(bytes);
        let header = <BlockHeader as Decodable>::consensus_decode(&mut decoder)?;
        let count = decoder.read_varint()?;
        let count = usize::try_from(count).map_err(|_| DecodeError::SizeTooLarge)?;
        let mut transactions = Vec::with_capacity(count.min(decoder.remaining() / 10));
        for _ in 0..count {
            transactions.push(<Transaction as Decodable>::consensus_decode(&mut decoder)?);
        }
        if !decoder.is_empty() {
            return Err(BlockDecodeError::Decode(DecodeError::TrailingBytes));
        }
        Ok(Self {
            header,
            transactions,
        })
    }

    pub fn serialized_size(&self) -> usize {
        self.consensus_encode().len()
    }

    /// Merkle root over the transaction ids.
    pub fn compute_merkle_root(&self) -> MerkleRoot {
        let txids: Vec<Hash256> = self.transactions.iter().map(Transaction::txid).collect();
        compute_merkle_root(&txids)
    }

    pub fn is_hive_mined(&self, hive_nonce_marker: u32) -> bool {
        self.header.is_hive_mined(hive_nonce_marker)
    }
}

impl Encodable for Block {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        Encodable::consensus_encode(&self.header, encoder);
        encoder.write_varint(self.transactions.len() as u64);
        for tx in &self.transactions {
            Encodable::consensus_encode(tx, encoder);
        }
    }
}

#[derive(Debug)]
pub enum BlockDecodeError {
    Decode(DecodeError),
}

impl From<DecodeError> for BlockDecodeError {
    fn from(error: DecodeError) -> Self {
        BlockDecodeError::Decode(error)
    }
}

impl std::fmt::Display for BlockDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockDecodeError::Decode(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for BlockDecodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_eighty_bytes() {
        let header = BlockHeader {
            version: 0x2001_0000,
            nonce: 192,
            ..Default::default()
        };
        assert_eq!(header.consensus_encode().len(), HEADER_SIZE);
        assert!(header.is_hive_mined(192));
        assert!(!header.is_hive_mined(0));
        assert_eq!(header.pow_type(), Some(PowType::MinotaurX));
    }

    #[test]
    fn block_decode_rejects_trailing_bytes() {
        let mut bytes = BlockHeader::default().consensus_encode();
        bytes.push(0);
        let block = Block::consensus_decode(&bytes).expect("empty block decodes");
        assert!(block.transactions.is_empty());

        bytes.push(0xff);
        assert!(matches!(
            Block::consensus_decode(&bytes),
            Err(BlockDecodeError::Decode(DecodeError::TrailingBytes))
        ));
    }
}
