//! Pool of unconfirmed transactions: the spend graph with its ancestor and
//! descendant aggregates, fee-based eviction, replacement and the orphan pool.

pub mod entry;
pub mod error;
pub mod orphans;
pub mod policy;
pub mod pool;

pub use entry::MempoolEntry;
pub use error::{MempoolError, MempoolErrorKind};
pub use orphans::OrphanPool;
pub use policy::{FeeRate, MempoolConfig};
pub use pool::{AncestorLimits, RemovalReason, RemovedEntry, TxMemPool};
