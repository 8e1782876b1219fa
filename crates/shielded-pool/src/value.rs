//! token amounts
//!
//! fixed-point integer units (18 decimals by convention, like wei)

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// decimals used by the pool token
pub const TOKEN_DECIMALS: u32 = 18;

/// amount of pool token in base units
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(pub u128);

impl Amount {
    pub const ZERO: Self = Self(0);

    pub fn new(amount: u128) -> Self {
        Self(amount)
    }

    /// parse a decimal string such as "0.13" into base units
    pub fn parse_units(s: &str, decimals: u32) -> Result<Self> {
        let s = s.trim();
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(Error::InvalidAmount(s.to_string()));
        }
        if frac.len() > decimals as usize {
            return Err(Error::InvalidAmount(format!(
                "{s}: more than {decimals} decimals"
            )));
        }
        let digits = |part: &str| -> Result<u128> {
            if part.is_empty() {
                return Ok(0);
            }
            if !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::InvalidAmount(s.to_string()));
            }
            part.parse::<u128>()
                .map_err(|_| Error::InvalidAmount(s.to_string()))
        };

        let scale = 10u128
            .checked_pow(decimals)
            .ok_or_else(|| Error::InvalidAmount(format!("{decimals} decimals")))?;
        let frac_scale = 10u128.pow(decimals - frac.len() as u32);

        let whole = digits(whole)?;
        let frac = digits(frac)?;
        whole
            .checked_mul(scale)
            .zip(frac.checked_mul(frac_scale))
            .and_then(|(w, f)| w.checked_add(f))
            .map(Self)
            .ok_or_else(|| Error::InvalidAmount(format!("{s}: overflow")))
    }

    /// parse using the pool token decimals
    pub fn parse_ether(s: &str) -> Result<Self> {
        Self::parse_units(s, TOKEN_DECIMALS)
    }

    /// format as a decimal string, trimming trailing zeros
    pub fn format_units(&self, decimals: u32) -> String {
        // past 38 decimals no u128 reaches one whole unit
        let (whole, frac) = match 10u128.checked_pow(decimals) {
            Some(scale) => (self.0 / scale, self.0 % scale),
            None => (0, self.0),
        };
        if frac == 0 {
            return whole.to_string();
        }
        let frac = format!("{:0width$}", frac, width = decimals as usize);
        format!("{}.{}", whole, frac.trim_end_matches('0'))
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// little-endian encoding used inside commitments and ciphertexts
    pub fn to_bytes(&self) -> [u8; 16] {
        self.0.to_le_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_le_bytes(bytes))
    }

    /// checked sum over an iterator of amounts
    pub fn checked_sum<I: IntoIterator<Item = Amount>>(iter: I) -> Option<Self> {
        iter.into_iter()
            .try_fold(Self::ZERO, |acc, a| acc.checked_add(a))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_units(TOKEN_DECIMALS))
    }
}

impl From<u128> for Amount {
    fn from(v: u128) -> Self {
        Self(v)
    }
}

impl From<u64> for Amount {
    fn from(v: u64) -> Self {
        Self(v as u128)
    }
}

impl From<Amount> for u128 {
    fn from(v: Amount) -> Self {
        v.0
    }
}
