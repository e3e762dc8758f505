//! Core block/transaction types and consensus serialization.

pub mod block;
pub mod encoding;
pub mod hash;
pub mod merkle;
pub mod outpoint;
pub mod script;
pub mod transaction;

pub use block::{Block, BlockDecodeError, BlockHeader};
pub use hash::{hash160, hash256_to_hex, sha256, sha256d};
pub use merkle::{compute_merkle_root, merkle_branch, root_from_branch, MerkleRoot};
pub use outpoint::OutPoint;
pub use transaction::{BeeCreation, Transaction, TxIn, TxOut};
