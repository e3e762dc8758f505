//! Proof-of-work targets, proof checks and the Hive bee proof.

pub mod activation;
pub mod difficulty;
pub mod hive;
pub mod validation;

pub use activation::{Activations, HiveEra};
pub use difficulty::{BlockKind, DifficultyError, HeaderInfo, HeaderSource};
pub use hive::{check_hive_proof, network_hive_info, BctSource, BlockSource, HiveError, HiveInfo};
pub use validation::{check_proof_of_work, PowError, PowHasher};
