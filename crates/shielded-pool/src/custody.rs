//! settlement / custody collaborator
//!
//! the pool never keeps token balances itself. it asks a `Custody`
//! implementation to move tokens as a side effect of a committed
//! transition. `MemoryLedger` is an in-process token ledger for tests and
//! simulations.

use core::fmt;
use core::str::FromStr;
use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::value::Amount;

/// 20-byte account on the settlement ledger
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Account(pub [u8; 20]);

impl Account {
    pub const ZERO: Self = Self([0u8; 20]);

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// deterministic account from a label, handy for fixtures
    pub fn from_label(label: &str) -> Self {
        let hash = blake3::hash(label.as_bytes());
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash.as_bytes()[..20]);
        Self(bytes)
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Account {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| Error::InvalidAddress(e.to_string()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Account {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Account {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// token custody as seen by the pool
pub trait Custody: Send + Sync {
    fn balance_of(&self, account: &Account) -> Amount;

    /// move `amount` between accounts; fails without side effects when
    /// `from` cannot cover it
    fn transfer(&mut self, from: &Account, to: &Account, amount: Amount) -> Result<()>;
}

/// in-memory token ledger
#[derive(Clone, Debug, Default)]
pub struct MemoryLedger {
    balances: HashMap<Account, Amount>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// create tokens out of thin air (test fixtures only)
    pub fn mint(&mut self, to: &Account, amount: Amount) {
        let balance = self.balances.entry(*to).or_default();
        *balance = balance.saturating_add(amount);
    }

    pub fn total_supply(&self) -> Amount {
        self.balances
            .values()
            .fold(Amount::ZERO, |acc, b| acc.saturating_add(*b))
    }
}

impl Custody for MemoryLedger {
    fn balance_of(&self, account: &Account) -> Amount {
        self.balances.get(account).copied().unwrap_or_default()
    }

    fn transfer(&mut self, from: &Account, to: &Account, amount: Amount) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        let available = self.balance_of(from);
        let remaining = available
            .checked_sub(amount)
            .ok_or(Error::InsufficientFunds {
                account: *from,
                available: available.0,
                required: amount.0,
            })?;
        self.balances.insert(*from, remaining);
        self.mint(to, amount);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_parse() {
        let a: Account = "0x4F3f08c789903282803F9a00107E04d18444E94D".parse().unwrap();
        assert_eq!(a.to_string(), "0x4f3f08c789903282803f9a00107e04d18444e94d");
        assert!("0x1234".parse::<Account>().is_err());
        assert!(Account::ZERO.is_zero());
    }

    #[test]
    fn test_transfer() {
        let alice = Account::from_label("alice");
        let bob = Account::from_label("bob");
        let mut ledger = MemoryLedger::new();
        ledger.mint(&alice, Amount(100));

        ledger.transfer(&alice, &bob, Amount(40)).unwrap();
        assert_eq!(ledger.balance_of(&alice), Amount(60));
        assert_eq!(ledger.balance_of(&bob), Amount(40));

        let err = ledger.transfer(&bob, &alice, Amount(41)).unwrap_err();
        assert_eq!(
            err,
            Error::InsufficientFunds {
                account: bob,
                available: 40,
                required: 41
            }
        );
        // failed transfer moved nothing
        assert_eq!(ledger.balance_of(&bob), Amount(40));
        assert_eq!(ledger.total_supply(), Amount(100));
    }
}
