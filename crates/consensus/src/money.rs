//! Monetary units and money range rules.

pub type Amount = i64;

pub const COIN: Amount = 100_000_000;
pub const CENT: Amount = 1_000_000;

/// Supply multiplier applied to every Litecoin-derived amount after the fork.
pub const COIN_SCALE: Amount = 10;

/// No amount larger than this (in satoshi) is valid.
pub const MAX_MONEY: Amount = 84_000_000 * COIN * COIN_SCALE;

pub fn money_range(value: Amount) -> bool {
    (0..=MAX_MONEY).contains(&value)
}
