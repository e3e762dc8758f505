//! Activation heights of the rule sets difficulty and Hive checks branch on.

/// First heights at which each deployment's rules apply, as reported by the
/// versionbits engine. `None` means not active on this chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Activations {
    pub hive: Option<i32>,
    pub hive_1_1: Option<i32>,
    pub minotaurx: Option<i32>,
}

/// Hive rule generation in force for a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HiveEra {
    V1_0,
    V1_1,
    V1_2,
}

impl Activations {
    /// Every rule set active from genesis.
    pub fn all_from(height: i32) -> Self {
        Self {
            hive: Some(height),
            hive_1_1: Some(height),
            minotaurx: Some(height),
        }
    }

    fn active_after(since: Option<i32>, prev_height: i32) -> bool {
        since.is_some_and(|since| prev_height + 1 >= since)
    }

    /// Whether Hive blocks may follow the block at `prev_height`.
    pub fn hive_enabled(&self, prev_height: i32) -> bool {
        Self::active_after(self.hive, prev_height)
    }

    pub fn hive_1_1_enabled(&self, prev_height: i32) -> bool {
        Self::active_after(self.hive_1_1, prev_height)
    }

    pub fn minotaurx_enabled(&self, prev_height: i32) -> bool {
        Self::active_after(self.minotaurx, prev_height)
    }

    pub fn hive_era(&self, prev_height: i32) -> HiveEra {
        if self.minotaurx_enabled(prev_height) {
            HiveEra::V1_2
        } else if self.hive_1_1_enabled(prev_height) {
            HiveEra::V1_1
        } else {
            HiveEra::V1_0
        }
    }
}
