//! Unit conversions and small numeric helpers.

use std::{fmt, iter::Sum, ops::Add, str::FromStr};

use ethers::types::{U256, U512};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationError;

/// Largest exponent for which `10^decimals` fits in a `U256`.
const MAX_DECIMALS: u8 = 77;

/// Human decimal string to base units.
///
/// Rejects signs, exponents, empty input and more fractional digits than
/// `decimals` can represent.
pub fn parse_units(amount: &str, decimals: u8) -> Result<U256, ValidationError> {
    let invalid = || ValidationError::InvalidAmount(amount.to_string());
    if decimals > MAX_DECIMALS {
        return Err(ValidationError::OutOfRange(format!("{decimals} decimals")));
    }

    let trimmed = amount.trim();
    let (int_part, frac_part) = match trimmed.split_once('.') {
        Some((i, f)) => (i, f),
        None => (trimmed, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid());
    }
    if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let frac_part = frac_part.trim_end_matches('0');
    if frac_part.len() > decimals as usize {
        return Err(invalid());
    }

    let scale = U256::exp10(decimals as usize);
    let int_value = if int_part.is_empty() {
        U256::zero()
    } else {
        U256::from_dec_str(int_part).map_err(|_| invalid())?
    };
    let frac_value = if frac_part.is_empty() {
        U256::zero()
    } else {
        let padded = format!("{frac_part:0<width$}", width = decimals as usize);
        U256::from_dec_str(&padded).map_err(|_| invalid())?
    };

    int_value
        .checked_mul(scale)
        .and_then(|v| v.checked_add(frac_value))
        .ok_or_else(invalid)
}

/// `parse_units(amount, 18)`.
pub fn parse_ether(amount: &str) -> Result<U256, ValidationError> {
    parse_units(amount, 18)
}

/// Base units to a human decimal string with trailing zeros trimmed.
pub fn format_units(amount: U256, decimals: u8) -> String {
    let decimals = decimals.min(MAX_DECIMALS);
    if decimals == 0 {
        return amount.to_string();
    }
    let (int_value, frac_value) = amount.div_mod(U256::exp10(decimals as usize));
    let frac = format!("{:0>width$}", frac_value.to_string(), width = decimals as usize);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        int_value.to_string()
    } else {
        format!("{int_value}.{frac}")
    }
}

/// Lossy conversion for display math.
pub fn to_f64(amount: U256, decimals: u8) -> f64 {
    format_units(amount, decimals).parse().unwrap_or(0.0)
}

/// `numerator / denominator`, or 0 when the denominator is zero or not finite.
pub fn safe_divide(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 || !denominator.is_finite() {
        return 0.0;
    }
    let out = numerator / denominator;
    if out.is_finite() {
        out
    } else {
        0.0
    }
}

/// Percent of hardcap raised.
pub fn compute_progress(raised: f64, hardcap: f64) -> f64 {
    safe_divide(raised, hardcap) * 100.0
}

/// [`compute_progress`] for a hardcap that may be missing.
pub fn compute_progress_opt(raised: f64, hardcap: Option<f64>) -> f64 {
    hardcap.map_or(0.0, |h| compute_progress(raised, h))
}

/// A percentage with four decimal places, stored as parts per million of a
/// whole (100% == 1_000_000).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Percent(u64);

impl Percent {
    pub const ZERO: Percent = Percent(0);
    pub const HUNDRED: Percent = Percent(1_000_000);
    const SCALE: u64 = 10_000;

    pub const fn from_ppm(ppm: u64) -> Self {
        Percent(ppm)
    }

    pub const fn ppm(self) -> u64 {
        self.0
    }

    /// Rounds to the nearest 0.0001%. Negative and non-finite inputs are rejected.
    pub fn from_f64(value: f64) -> Result<Self, ValidationError> {
        if !value.is_finite() || value < 0.0 {
            return Err(ValidationError::InvalidAmount(value.to_string()));
        }
        Ok(Percent((value * Self::SCALE as f64).round() as u64))
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }

    /// `total * self` rounded down.
    pub fn of(self, total: U256) -> Result<U256, ValidationError> {
        narrow(total.full_mul(U256::from(self.0)) / U512::from(Self::HUNDRED.0))
    }

    /// `total * outer * inner` rounded down once at the end.
    pub fn of_share(total: U256, outer: Percent, inner: Percent) -> Result<U256, ValidationError> {
        let whole = U512::from(Self::HUNDRED.0);
        let both = U256::from(u128::from(outer.0) * u128::from(inner.0));
        narrow(total.full_mul(both) / (whole * whole))
    }
}

fn narrow(value: U512) -> Result<U256, ValidationError> {
    U256::try_from(value).map_err(|_| ValidationError::OutOfRange(format!("{value} exceeds 256 bits")))
}

impl FromStr for Percent {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().trim_end_matches('%').trim();
        let value = parse_units(s, 4)?;
        if value > U256::from(u64::MAX) {
            return Err(ValidationError::OutOfRange(s.to_string()));
        }
        Ok(Percent(value.as_u64()))
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_units(U256::from(self.0), 4))
    }
}

impl Add for Percent {
    type Output = Percent;

    fn add(self, rhs: Percent) -> Percent {
        Percent(self.0.saturating_add(rhs.0))
    }
}

impl Sum for Percent {
    fn sum<I: Iterator<Item = Percent>>(iter: I) -> Percent {
        iter.fold(Percent::ZERO, Add::add)
    }
}

impl Serialize for Percent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

impl<'de> Deserialize<'de> for Percent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(f64),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Num(n) => Percent::from_f64(n).map_err(de::Error::custom),
            Raw::Text(s) => s.parse().map_err(de::Error::custom),
        }
    }
}
