use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use thiserror::Error;

/// 1 coin = 10^6 base units.
pub const COIN: i64 = 1_000_000;
/// `MAX_MONEY = 2.04e9 * COIN`.
pub const MAX_MONEY: i64 = 2_040_000_000 * COIN;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount exceeds MAX_MONEY")]
    TooLarge,
    #[error("amount string would lose precision: {0}")]
    Precision(String),
    #[error("invalid amount string: {0}")]
    Invalid(String),
    #[error("amount overflow")]
    Overflow,
}

/// Signed 64-bit count of base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn from_base_units(value: i64) -> Result<Self, AmountError> {
        if value.unsigned_abs() as i64 > MAX_MONEY {
            return Err(AmountError::TooLarge);
        }
        Ok(Amount(value))
    }

    pub fn base_units(self) -> i64 {
        self.0
    }

    /// Parses an exact decimal over `10^6`, rejecting strings that would
    /// lose precision (more than 6 fractional digits) or that exceed
    /// `MAX_MONEY`.
    pub fn from_coins_str(s: &str) -> Result<Self, AmountError> {
        let s = s.trim();
        let negative = s.starts_with('-');
        let unsigned = s.trim_start_matches('-');
        let mut parts = unsigned.splitn(2, '.');
        let whole = parts.next().unwrap_or("0");
        let frac = parts.next().unwrap_or("");
        if frac.len() > 6 {
            return Err(AmountError::Precision(s.to_string()));
        }
        if whole.is_empty() && frac.is_empty() {
            return Err(AmountError::Invalid(s.to_string()));
        }
        let whole_val: i64 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| AmountError::Invalid(s.to_string()))?
        };
        let mut frac_padded = frac.to_string();
        while frac_padded.len() < 6 {
            frac_padded.push('0');
        }
        let frac_val: i64 = if frac_padded.is_empty() {
            0
        } else {
            frac_padded
                .parse()
                .map_err(|_| AmountError::Invalid(s.to_string()))?
        };
        let mut base = whole_val
            .checked_mul(COIN)
            .ok_or(AmountError::Overflow)?
            .checked_add(frac_val)
            .ok_or(AmountError::Overflow)?;
        if negative {
            base = -base;
        }
        Amount::from_base_units(base)
    }

    pub fn to_coins_string(self) -> String {
        let negative = self.0 < 0;
        let abs = self.0.unsigned_abs();
        let whole = abs / COIN as u64;
        let frac = abs % COIN as u64;
        let sign = if negative { "-" } else { "" };
        format!("{sign}{whole}.{frac:06}")
    }

    pub fn checked_add(self, other: Amount) -> Result<Amount, AmountError> {
        let sum = self.0.checked_add(other.0).ok_or(AmountError::Overflow)?;
        Amount::from_base_units(sum)
    }

    pub fn checked_sub(self, other: Amount) -> Result<Amount, AmountError> {
        let diff = self.0.checked_sub(other.0).ok_or(AmountError::Overflow)?;
        Amount::from_base_units(diff)
    }
}

impl Add for Amount {
    type Output = Amount;
    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl Sub for Amount {
    type Output = Amount;
    fn sub(self, rhs: Amount) -> Amount {
        Amount(self.0 - rhs.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_coins_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_coins() {
        let amt = Amount::from_coins_str("12.5").unwrap();
        assert_eq!(amt.base_units(), 12_500_000);
        assert_eq!(amt.to_coins_string(), "12.500000");
    }

    #[test]
    fn rejects_precision_loss() {
        assert_eq!(
            Amount::from_coins_str("1.1234567").unwrap_err(),
            AmountError::Precision("1.1234567".to_string())
        );
    }

    #[test]
    fn rejects_over_max_money() {
        assert_eq!(
            Amount::from_base_units(MAX_MONEY + 1).unwrap_err(),
            AmountError::TooLarge
        );
    }

    #[test]
    fn negative_roundtrip() {
        let amt = Amount::from_coins_str("-3.0").unwrap();
        assert_eq!(amt.base_units(), -3_000_000);
    }
}
