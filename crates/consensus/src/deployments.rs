//! Soft-fork deployments signalled through versionbits.

pub type Hash256 = [u8; 32];

/// Every versionbits deployment this chain knows about. The set is fixed by
/// consensus, so new entries arrive with a new release rather than at runtime.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[repr(u8)]
pub enum Deployment {
    TestDummy = 0,
    Csv = 1,
    Segwit = 2,
    Hive = 3,
    Hive1_1 = 4,
    MinotaurX = 5,
    Rialto = 6,
}

pub const MAX_DEPLOYMENTS: usize = 7;

pub const ALL_DEPLOYMENTS: [Deployment; MAX_DEPLOYMENTS] = [
    Deployment::TestDummy,
    Deployment::Csv,
    Deployment::Segwit,
    Deployment::Hive,
    Deployment::Hive1_1,
    Deployment::MinotaurX,
    Deployment::Rialto,
];

impl Deployment {
    pub const fn as_usize(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Deployment::TestDummy => "testdummy",
            Deployment::Csv => "csv",
            Deployment::Segwit => "segwit",
            Deployment::Hive => "hive",
            Deployment::Hive1_1 => "hive_1_1",
            Deployment::MinotaurX => "minotaurx_and_hive_1_2",
            Deployment::Rialto => "rialto",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ALL_DEPLOYMENTS
            .into_iter()
            .find(|deployment| deployment.name() == name)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Bip9Deployment {
    pub bit: u8,
    pub start_time: i64,
    pub timeout: i64,
}

impl Bip9Deployment {
    /// Start time that makes the deployment active from genesis.
    pub const ALWAYS_ACTIVE: i64 = -1;
    /// Start time that keeps the deployment failed forever.
    pub const NEVER_ACTIVE: i64 = -2;
    pub const NO_TIMEOUT: i64 = i64::MAX;

    pub const fn new(bit: u8, start_time: i64, timeout: i64) -> Self {
        Self {
            bit,
            start_time,
            timeout,
        }
    }

    pub const fn always_active(bit: u8) -> Self {
        Self::new(bit, Self::ALWAYS_ACTIVE, Self::NO_TIMEOUT)
    }

    pub const fn never_active(bit: u8) -> Self {
        Self::new(bit, Self::NEVER_ACTIVE, Self::NO_TIMEOUT)
    }

    pub fn mask(&self) -> u32 {
        1u32 << self.bit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_names_round_trip() {
        for deployment in ALL_DEPLOYMENTS {
            assert_eq!(Deployment::from_name(deployment.name()), Some(deployment));
        }
        assert_eq!(Deployment::from_name("nope"), None);
        assert_eq!(Deployment::MinotaurX.as_usize(), 5);
    }

    #[test]
    fn masks_follow_bit() {
        assert_eq!(Bip9Deployment::new(28, 0, 1).mask(), 0x1000_0000);
        assert_eq!(Bip9Deployment::always_active(0).mask(), 1);
    }
}
