//! Chainstate: the layered coin view, the block tree, deployment tracking and
//! the validation engine that drives them together with the pool.

pub mod blockindex;
pub mod checkqueue;
pub mod coins;
pub mod observer;
pub mod script;
pub mod state;
pub mod utxo;
pub mod validation;
pub mod versionbits;

pub use coins::{CoinsError, CoinsView, CoinsViewCache, CoinsWriter};
pub use observer::ValidationObserver;
pub use script::{PushOnlyVerifier, ScriptCheck, ScriptVerifier};
pub use state::{ChainState, ChainStateConfig, ChainStateError, ConnectedBlock, DeploymentInfo, MempoolAccept};
pub use utxo::{Coin, StoreCoinsView};
pub use validation::{RejectClass, ValidationError, ValidationOutcome};
pub use versionbits::{ThresholdState, VersionBitsCache};
