//! Monetary amounts in raw units.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// Raw units per whole ONX.
pub const COIN: u64 = 100_000_000;

/// An amount of ONX in raw units.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Self = Self(0);

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn from_onx(onx: u64) -> Self {
        Self(onx * COIN)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// The fixed service-node collateral: 1000 ONX.
    pub const fn collateral() -> Self {
        Self::from_onx(1000)
    }

    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Integer percentage of this amount (rounds down).
    pub fn percent(self, pct: u64) -> Self {
        Self(self.0 / 100 * pct + self.0 % 100 * pct / 100)
    }
}

impl Add for Amount {
    type Output = Amount;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Amount {
    type Output = Amount;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:08} ONX", self.0 / COIN, self.0 % COIN)
    }
}
