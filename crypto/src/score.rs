//! Minimal unsigned 256-bit arithmetic for election scores.
//!
//! A node's score against a block hash is the absolute distance between two
//! SHA-256d digests interpreted as 256-bit integers. Only the operations
//! the election needs are implemented: construction from digests, adding a
//! small offset, absolute difference, and ordering.

use std::cmp::Ordering;
use std::fmt;

/// An unsigned 256-bit integer, stored as 32 big-endian bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct U256([u8; 32]);

impl U256 {
    pub const ZERO: Self = Self([0u8; 32]);

    /// Interpret a 32-byte digest as a big-endian 256-bit integer.
    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Interpret a 32-byte digest as a little-endian 256-bit integer
    /// (the storage order of txids).
    pub fn from_le_bytes(bytes: [u8; 32]) -> Self {
        let mut be = [0u8; 32];
        for (i, b) in bytes.iter().enumerate() {
            be[31 - i] = *b;
        }
        Self(be)
    }

    pub fn to_be_bytes(self) -> [u8; 32] {
        self.0
    }

    pub fn to_le_bytes(self) -> [u8; 32] {
        let mut le = [0u8; 32];
        for (i, b) in self.0.iter().enumerate() {
            le[31 - i] = *b;
        }
        le
    }

    /// Wrapping addition of a u32 offset (used to fold the collateral vout
    /// into the txid before scoring).
    pub fn wrapping_add_u32(self, rhs: u32) -> Self {
        let mut out = self.0;
        let mut carry = rhs as u64;
        for i in (0..32).rev() {
            if carry == 0 {
                break;
            }
            let sum = out[i] as u64 + (carry & 0xff);
            out[i] = (sum & 0xff) as u8;
            carry = (carry >> 8) + (sum >> 8);
        }
        Self(out)
    }

    /// Absolute difference `|self - other|`.
    pub fn abs_diff(self, other: Self) -> Self {
        let (hi, lo) = if self >= other {
            (self.0, other.0)
        } else {
            (other.0, self.0)
        };
        let mut out = [0u8; 32];
        let mut borrow = 0i16;
        for i in (0..32).rev() {
            let mut diff = hi[i] as i16 - lo[i] as i16 - borrow;
            if diff < 0 {
                diff += 256;
                borrow = 1;
            } else {
                borrow = 0;
            }
            out[i] = diff as u8;
        }
        Self(out)
    }
}

impl Ord for U256 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for U256 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U256(")?;
        for b in &self.0[..8] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_u64(v: u64) -> U256 {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&v.to_be_bytes());
        U256::from_be_bytes(bytes)
    }

    #[test]
    fn ordering_is_big_endian() {
        assert!(from_u64(2) > from_u64(1));
        let mut high = [0u8; 32];
        high[0] = 1;
        assert!(U256::from_be_bytes(high) > from_u64(u64::MAX));
    }

    #[test]
    fn add_u32_small_values() {
        assert_eq!(from_u64(5).wrapping_add_u32(7), from_u64(12));
    }

    #[test]
    fn add_u32_carries_across_bytes() {
        assert_eq!(from_u64(0xff).wrapping_add_u32(1), from_u64(0x100));
        assert_eq!(
            from_u64(0xffff_ffff).wrapping_add_u32(1),
            from_u64(0x1_0000_0000)
        );
    }

    #[test]
    fn abs_diff_is_symmetric() {
        let a = from_u64(1000);
        let b = from_u64(42);
        assert_eq!(a.abs_diff(b), from_u64(958));
        assert_eq!(b.abs_diff(a), from_u64(958));
    }

    #[test]
    fn abs_diff_borrows_across_bytes() {
        assert_eq!(from_u64(0x100).abs_diff(from_u64(1)), from_u64(0xff));
    }

    #[test]
    fn abs_diff_zero() {
        let a = from_u64(77);
        assert_eq!(a.abs_diff(a), U256::ZERO);
    }

    #[test]
    fn le_be_round_trip() {
        let mut bytes = [0u8; 32];
        bytes[0] = 1;
        bytes[31] = 2;
        let v = U256::from_le_bytes(bytes);
        assert_eq!(v.to_le_bytes(), bytes);
        assert_eq!(v.to_be_bytes()[0], 2);
        assert_eq!(v.to_be_bytes()[31], 1);
    }
}
