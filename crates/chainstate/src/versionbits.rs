//! Soft-fork deployment state machine over fixed signalling windows.

use std::collections::HashMap;

use lccd_consensus::constants::{VERSIONBITS_TOP_BITS, VERSIONBITS_TOP_MASK};
use lccd_consensus::{Bip9Deployment, ConsensusParams, Deployment, Hash256, ALL_DEPLOYMENTS, MAX_DEPLOYMENTS};
use lccd_pow::{Activations, HeaderInfo, HeaderSource};

use crate::blockindex::median_time_past;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ThresholdState {
    Defined,
    Started,
    LockedIn,
    Active,
    Failed,
}

impl ThresholdState {
    pub fn as_str(self) -> &'static str {
        match self {
            ThresholdState::Defined => "defined",
            ThresholdState::Started => "started",
            ThresholdState::LockedIn => "locked_in",
            ThresholdState::Active => "active",
            ThresholdState::Failed => "failed",
        }
    }
}

/// Signalling progress inside the current window.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DeploymentStats {
    pub period: i32,
    pub threshold: i32,
    pub elapsed: i32,
    pub count: i32,
    /// Whether the threshold can still be reached in this window.
    pub possible: bool,
}

/// Whether `header` signals for `deployment`. Before the pow fork the BIP9
/// top bits have to be present as well.
pub fn signals(header: &HeaderInfo, deployment: &Bip9Deployment, params: &ConsensusParams) -> bool {
    let bit_set = header.version as u32 & deployment.mask() != 0;
    if header.time > params.pow_fork_time {
        return bit_set;
    }
    header.version & VERSIONBITS_TOP_MASK == VERSIONBITS_TOP_BITS && bit_set
}

/// Per-deployment state memo keyed by the hash of the last block of a window.
#[derive(Clone, Debug)]
pub struct VersionBitsCache {
    states: [HashMap<Hash256, ThresholdState>; MAX_DEPLOYMENTS],
}

impl Default for VersionBitsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionBitsCache {
    pub fn new() -> Self {
        Self {
            states: std::array::from_fn(|_| HashMap::new()),
        }
    }

    pub fn clear(&mut self) {
        for states in &mut self.states {
            states.clear();
        }
    }

    pub fn cached(&self, deployment: Deployment) -> usize {
        self.states[deployment.as_usize()].len()
    }

    /// State of `deployment` for the block after `prev` (`None` for genesis).
    pub fn state_for<S: HeaderSource + ?Sized>(
        &mut self,
        chain: &S,
        prev: Option<&HeaderInfo>,
        deployment: Deployment,
        params: &ConsensusParams,
    ) -> ThresholdState {
        let bip9 = params.deployment(deployment);
        if bip9.start_time == Bip9Deployment::ALWAYS_ACTIVE {
            return ThresholdState::Active;
        }
        if bip9.start_time == Bip9Deployment::NEVER_ACTIVE {
            return ThresholdState::Failed;
        }
        let period = params.miner_confirmation_window as i32;
        let threshold = params.rule_change_activation_threshold as i32;
        let cache = &mut self.states[deployment.as_usize()];

        // Every block of a window shares the state of its first block, so
        // work from the last block of the previous window.
        let mut cursor = prev.and_then(|prev| window_end(chain, prev, period));
        let mut to_compute: Vec<HeaderInfo> = Vec::new();
        let mut state = loop {
            let Some(index) = cursor else {
                break ThresholdState::Defined;
            };
            if let Some(state) = cache.get(&index.hash) {
                break *state;
            }
            if median_time_past(chain, index.height) < bip9.start_time {
                cache.insert(index.hash, ThresholdState::Defined);
                break ThresholdState::Defined;
            }
            to_compute.push(index);
            cursor = ancestor(chain, index.height - period);
        };

        while let Some(index) = to_compute.pop() {
            let mtp = median_time_past(chain, index.height);
            let next = match state {
                ThresholdState::Defined => {
                    if mtp >= bip9.timeout {
                        ThresholdState::Failed
                    } else if mtp >= bip9.start_time {
                        ThresholdState::Started
                    } else {
                        ThresholdState::Defined
                    }
                }
                ThresholdState::Started => {
                    if mtp >= bip9.timeout {
                        ThresholdState::Failed
                    } else {
                        let first = index.height - period + 1;
                        let count = (first.max(0)..=index.height)
                            .filter_map(|height| chain.header_at(height))
                            .filter(|header| signals(header, bip9, params))
                            .count() as i32;
                        if count >= threshold {
                            ThresholdState::LockedIn
                        } else {
                            ThresholdState::Started
                        }
                    }
                }
                ThresholdState::LockedIn => ThresholdState::Active,
                terminal => terminal,
            };
            cache.insert(index.hash, next);
            state = next;
        }
        state
    }

    /// First height of the run of windows that share the current state.
    pub fn state_since_height<S: HeaderSource + ?Sized>(
        &mut self,
        chain: &S,
        prev: Option<&HeaderInfo>,
        deployment: Deployment,
        params: &ConsensusParams,
    ) -> i32 {
        if params.deployment(deployment).start_time == Bip9Deployment::ALWAYS_ACTIVE {
            return 0;
        }
        let initial = self.state_for(chain, prev, deployment, params);
        if initial == ThresholdState::Defined {
            return 0;
        }
        let period = params.miner_confirmation_window as i32;
        let Some(mut index) = prev.and_then(|prev| window_end(chain, prev, period)) else {
            return 0;
        };
        while let Some(parent) = ancestor(chain, index.height - period) {
            if self.state_for(chain, Some(&parent), deployment, params) != initial {
                break;
            }
            index = parent;
        }
        index.height + 1
    }

    /// Signalling count in the window containing the block after `prev`.
    pub fn statistics<S: HeaderSource + ?Sized>(
        &self,
        chain: &S,
        prev: Option<&HeaderInfo>,
        deployment: Deployment,
        params: &ConsensusParams,
    ) -> DeploymentStats {
        let period = params.miner_confirmation_window as i32;
        let threshold = params.rule_change_activation_threshold as i32;
        let mut stats = DeploymentStats {
            period,
            threshold,
            ..DeploymentStats::default()
        };
        let Some(prev) = prev else {
            return stats;
        };
        let bip9 = params.deployment(deployment);
        let end_of_prev_period = prev.height - (prev.height + 1) % period;
        stats.elapsed = prev.height - end_of_prev_period;
        stats.count = (end_of_prev_period + 1..=prev.height)
            .filter_map(|height| chain.header_at(height))
            .filter(|header| signals(header, bip9, params))
            .count() as i32;
        stats.possible = period - threshold >= stats.elapsed - stats.count;
        stats
    }

    /// Version for a block built on `prev`: the top bits plus the bit of every
    /// deployment in STARTED or LOCKED_IN.
    pub fn compute_block_version<S: HeaderSource + ?Sized>(
        &mut self,
        chain: &S,
        prev: Option<&HeaderInfo>,
        params: &ConsensusParams,
    ) -> i32 {
        let mut version = VERSIONBITS_TOP_BITS as u32;
        for deployment in ALL_DEPLOYMENTS {
            match self.state_for(chain, prev, deployment, params) {
                ThresholdState::Started | ThresholdState::LockedIn => {
                    version |= params.deployment(deployment).mask();
                }
                _ => {}
            }
        }
        version as i32
    }

    /// Activation heights of the deployments difficulty and Hive checks use.
    pub fn activations<S: HeaderSource + ?Sized>(
        &mut self,
        chain: &S,
        prev: Option<&HeaderInfo>,
        params: &ConsensusParams,
    ) -> Activations {
        let mut since = |deployment| {
            if self.state_for(chain, prev, deployment, params) == ThresholdState::Active {
                Some(self.state_since_height(chain, prev, deployment, params))
            } else {
                None
            }
        };
        Activations {
            hive: since(Deployment::Hive),
            hive_1_1: since(Deployment::Hive1_1),
            minotaurx: since(Deployment::MinotaurX),
        }
    }
}

fn ancestor<S: HeaderSource + ?Sized>(chain: &S, height: i32) -> Option<HeaderInfo> {
    if height < 0 {
        return None;
    }
    chain.header_at(height)
}

fn window_end<S: HeaderSource + ?Sized>(
    chain: &S,
    prev: &HeaderInfo,
    period: i32,
) -> Option<HeaderInfo> {
    let height = prev.height - (prev.height + 1) % period;
    if height == prev.height {
        return Some(*prev);
    }
    ancestor(chain, height)
}
