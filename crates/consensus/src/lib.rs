//! Consensus constants, network parameters, deployments, and the subsidy schedule.

pub mod constants;
pub mod deployments;
pub mod money;
pub mod params;
pub mod subsidy;

pub use deployments::{Bip9Deployment, Deployment, Hash256, ALL_DEPLOYMENTS, MAX_DEPLOYMENTS};
pub use params::{consensus_params, ConsensusParams, HiveParams, Network, PowType};
pub use subsidy::{bee_cost, block_subsidy};
