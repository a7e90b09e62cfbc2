//! Arbitrary-precision unsigned integer accumulator used by the factorial
//! sweep.
//!
//! The accumulator is represented as little-endian base-1e9 limbs so that
//! the hot path (`mul_small`) never has to touch the decimal form, and the
//! decimal form is only materialized once per persisted number, at commit
//! time (see the pipeline's bottom-up sweep).

use sha2::{Digest, Sha256};
use std::fmt;

const LIMB_BASE: u64 = 1_000_000_000;
const LIMB_DIGITS: usize = 9;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum BigIntError {
    #[error("empty decimal string")]
    Empty,
    #[error("non-digit character in decimal string: {0:?}")]
    NonDigit(char),
    #[error("leading sign not allowed in decimal string")]
    LeadingSign,
}

/// An arbitrary-precision non-negative integer, stored as little-endian
/// base-1e9 limbs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BigUint {
    limbs: Vec<u32>,
}

impl Default for BigUint {
    fn default() -> Self {
        Self::one()
    }
}

impl BigUint {
    /// The multiplicative identity, i.e. `0!`.
    pub fn one() -> Self {
        BigUint { limbs: vec![1] }
    }

    pub fn zero() -> Self {
        BigUint { limbs: vec![0] }
    }

    /// Multiplies `self` by the small factor `k` in place.
    ///
    /// `k` is expected to be a factorial step (at most `MAX_FACTORIAL`, far
    /// below `u32::MAX`), so the per-limb product always fits in `u64`.
    pub fn mul_small(&mut self, k: u64) {
        if k == 0 {
            self.limbs.clear();
            self.limbs.push(0);
            return;
        }
        let mut carry: u64 = 0;
        for limb in self.limbs.iter_mut() {
            let product = *limb as u64 * k + carry;
            *limb = (product % LIMB_BASE) as u32;
            carry = product / LIMB_BASE;
        }
        while carry > 0 {
            self.limbs.push((carry % LIMB_BASE) as u32);
            carry /= LIMB_BASE;
        }
    }

    /// Renders the accumulator as a lossless base-10 string with no leading
    /// zeros (other than the literal value `0`).
    pub fn to_decimal_string(&self) -> String {
        let mut s = String::with_capacity(self.limbs.len() * LIMB_DIGITS);
        let mut iter = self.limbs.iter().rev();
        if let Some(first) = iter.next() {
            s.push_str(&first.to_string());
        }
        for limb in iter {
            s.push_str(&format!("{limb:0width$}", width = LIMB_DIGITS));
        }
        s
    }

    /// Parses a lossless base-10 string. Rejects empty input, any non-digit
    /// byte, and leading `+`/`-` signs.
    pub fn from_decimal_str(s: &str) -> Result<Self, BigIntError> {
        if s.is_empty() {
            return Err(BigIntError::Empty);
        }
        if let Some(c) = s.chars().next() {
            if c == '+' || c == '-' {
                return Err(BigIntError::LeadingSign);
            }
        }
        for c in s.chars() {
            if !c.is_ascii_digit() {
                return Err(BigIntError::NonDigit(c));
            }
        }

        let bytes = s.as_bytes();
        let mut limbs = Vec::with_capacity(bytes.len() / LIMB_DIGITS + 1);
        let mut end = bytes.len();
        while end > 0 {
            let start = end.saturating_sub(LIMB_DIGITS);
            let chunk = std::str::from_utf8(&bytes[start..end]).unwrap();
            limbs.push(chunk.parse::<u32>().unwrap());
            end = start;
        }
        if limbs.is_empty() {
            limbs.push(0);
        }
        // Strip spurious leading-zero limbs (e.g. input "007").
        while limbs.len() > 1 && *limbs.last().unwrap() == 0 {
            limbs.pop();
        }
        Ok(BigUint { limbs })
    }
}

impl fmt::Display for BigUint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_decimal_string())
    }
}

/// SHA-256 of the UTF-8 bytes of `s`, as 64 lowercase hex characters.
pub fn sha256_hex(s: &str) -> String {
    let digest = Sha256::digest(s.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_is_multiplicative_identity() {
        assert_eq!(BigUint::one().to_decimal_string(), "1");
    }

    #[test]
    fn small_factorials() {
        let mut acc = BigUint::one();
        for i in 1..=10u64 {
            acc.mul_small(i);
        }
        assert_eq!(acc.to_decimal_string(), "3628800");
    }

    #[test]
    fn mul_by_zero_collapses_to_zero() {
        let mut acc = BigUint::one();
        acc.mul_small(5);
        acc.mul_small(0);
        assert_eq!(acc.to_decimal_string(), "0");
    }

    #[test]
    fn limb_boundary_carries_correctly() {
        let mut acc = BigUint::from_decimal_str("999999999").unwrap();
        acc.mul_small(10);
        assert_eq!(acc.to_decimal_string(), "9999999990");
    }

    #[test]
    fn from_decimal_round_trips() {
        for s in ["0", "1", "120", "999999999999999999999999999999"] {
            let parsed = BigUint::from_decimal_str(s).unwrap();
            assert_eq!(parsed.to_decimal_string(), s);
        }
    }

    #[test]
    fn from_decimal_rejects_malformed_input() {
        assert_eq!(BigUint::from_decimal_str(""), Err(BigIntError::Empty));
        assert_eq!(
            BigUint::from_decimal_str("-5"),
            Err(BigIntError::LeadingSign)
        );
        assert!(matches!(
            BigUint::from_decimal_str("12a"),
            Err(BigIntError::NonDigit('a'))
        ));
    }

    #[test]
    fn checksum_is_lowercase_hex_sha256() {
        let hex = sha256_hex("120");
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn hundred_factorial_matches_reference_digit_count() {
        let mut acc = BigUint::one();
        for i in 1..=100u64 {
            acc.mul_small(i);
        }
        // 100! has 158 decimal digits.
        assert_eq!(acc.to_decimal_string().len(), 158);
    }

    proptest::proptest! {
        #[test]
        fn round_trip_arbitrary_digits(digits in "[1-9][0-9]{0,60}") {
            let parsed = BigUint::from_decimal_str(&digits).unwrap();
            proptest::prop_assert_eq!(parsed.to_decimal_string(), digits);
        }
    }
}
