//! Unspent output records and the coin view backed by the storage trait.

use lccd_consensus::money::Amount;
use lccd_consensus::Hash256;
use lccd_primitives::encoding::{DecodeError, Decoder, Encoder};
use lccd_primitives::outpoint::OutPoint;
use lccd_primitives::transaction::TxOut;
use lccd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::coins::{CoinChange, CoinsError, CoinsView, CoinsWriter};

pub const OUTPOINT_KEY_LEN: usize = 36;
const BEST_BLOCK_KEY: &[u8] = b"best_block";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Coin {
    pub value: Amount,
    pub script_pubkey: Vec<u8>,
    pub height: i32,
    pub is_coinbase: bool,
}

impl Coin {
    pub fn from_output(out: &TxOut, height: i32, is_coinbase: bool) -> Self {
        Self {
            value: out.value,
            script_pubkey: out.script_pubkey.clone(),
            height,
            is_coinbase,
        }
    }

    /// Whether a coinbase coin may be spent in a block at `spend_height`.
    pub fn is_mature(&self, spend_height: i32, maturity: i32) -> bool {
        !self.is_coinbase || spend_height - self.height >= maturity
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
        encoder.write_i32_le(self.height);
        encoder.write_u8(if self.is_coinbase { 1 } else { 0 });
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let value = decoder.read_i64_le()?;
        let script_pubkey = decoder.read_var_bytes()?;
        let height = decoder.read_i32_le()?;
        let is_coinbase = decoder.read_u8()? != 0;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            value,
            script_pubkey,
            height,
            is_coinbase,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct OutPointKey([u8; OUTPOINT_KEY_LEN]);

impl OutPointKey {
    pub fn new(outpoint: &OutPoint) -> Self {
        let mut bytes = [0u8; OUTPOINT_KEY_LEN];
        bytes[..32].copy_from_slice(&outpoint.hash);
        bytes[32..].copy_from_slice(&outpoint.index.to_le_bytes());
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; OUTPOINT_KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn outpoint(&self) -> OutPoint {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&self.0[..32]);
        let mut index = [0u8; 4];
        index.copy_from_slice(&self.0[32..]);
        OutPoint::new(hash, u32::from_le_bytes(index))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

/// The persistent coin set: the bottom layer every cache flushes into.
pub struct StoreCoinsView<S> {
    store: S,
}

impl<S> StoreCoinsView<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: KeyValueStore> StoreCoinsView<S> {
    /// Visits every stored coin in key order.
    pub fn for_each_coin(
        &self,
        visitor: &mut dyn FnMut(OutPoint, Coin) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        self.store
            .for_each_prefix(Column::Coins, &[], &mut |key, value| {
                let key = OutPointKey::from_slice(key)
                    .ok_or_else(|| StoreError::Corrupt("coin key length".to_string()))?;
                let coin =
                    Coin::decode(value).map_err(|err| StoreError::Corrupt(err.to_string()))?;
                visitor(key.outpoint(), coin)
            })
    }
}

impl<S: KeyValueStore> CoinsView for StoreCoinsView<S> {
    fn get_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, CoinsError> {
        let key = OutPointKey::new(outpoint);
        match self.store.get(Column::Coins, key.as_bytes())? {
            Some(bytes) => Ok(Some(
                Coin::decode(&bytes).map_err(|err| StoreError::Corrupt(err.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    fn best_block(&self) -> Result<Option<Hash256>, CoinsError> {
        match self.store.get(Column::Meta, BEST_BLOCK_KEY)? {
            Some(bytes) => {
                let hash: Hash256 = bytes.as_slice().try_into().map_err(|_| {
                    StoreError::Corrupt("best block hash length".to_string())
                })?;
                Ok(Some(hash))
            }
            None => Ok(None),
        }
    }
}

impl<S: KeyValueStore> CoinsWriter for StoreCoinsView<S> {
    fn batch_write(
        &mut self,
        changes: Vec<CoinChange>,
        best_block: Option<Hash256>,
    ) -> Result<(), CoinsError> {
        let mut batch = WriteBatch::new();
        batch.reserve(changes.len() + 1);
        for change in changes {
            let key = OutPointKey::new(&change.outpoint);
            match change.coin {
                Some(coin) => batch.put(Column::Coins, key.as_bytes(), coin.encode()),
                None => batch.delete(Column::Coins, key.as_bytes()),
            }
        }
        if let Some(hash) = best_block {
            batch.put(Column::Meta, BEST_BLOCK_KEY, hash);
        }
        self.store.write_batch(&batch)?;
        Ok(())
    }
}
