//! pool configuration
//!
//! loaded from toml, e.g.
//!
//! ```toml
//! tree_height = 20
//! root_history_size = 100
//! maximum_deposit_amount = "1000000000000000000"
//! minimum_withdrawal_amount = "50000000000000000"
//! token = "0x..."
//! pool_account = "0x..."
//! multisig = "0x..."
//! l1_bridge = "0x..."
//! ```
//!
//! amounts are strings because toml integers stop at i64.

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::commitment::MAX_TREE_HEIGHT;
use crate::custody::Account;
use crate::error::{Error, Result};
use crate::value::Amount;

pub const DEFAULT_TREE_HEIGHT: usize = 20;

/// how many recent roots remain valid anchors
pub const DEFAULT_ROOT_HISTORY_SIZE: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    pub tree_height: usize,
    pub root_history_size: usize,
    #[serde(with = "amount_string")]
    pub maximum_deposit_amount: Amount,
    /// applies to withdrawals routed to the l1 bridge
    #[serde(with = "amount_string")]
    pub minimum_withdrawal_amount: Amount,
    /// the only token this pool accepts from the bridge
    pub token: Account,
    /// custody account holding shielded funds
    pub pool_account: Account,
    /// receives bridged funds whose bundle was rejected, and bridged surplus
    pub multisig: Account,
    /// destination of l1 withdrawals
    pub l1_bridge: Account,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            tree_height: DEFAULT_TREE_HEIGHT,
            root_history_size: DEFAULT_ROOT_HISTORY_SIZE,
            maximum_deposit_amount: Amount(1_000_000_000_000_000_000),
            minimum_withdrawal_amount: Amount(50_000_000_000_000_000),
            token: Account::from_label("shielded-pool.token"),
            pool_account: Account::from_label("shielded-pool.pool"),
            multisig: Account::from_label("shielded-pool.multisig"),
            l1_bridge: Account::from_label("shielded-pool.l1-bridge"),
        }
    }
}

impl PoolConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.tree_height == 0 || self.tree_height > MAX_TREE_HEIGHT {
            return Err(Error::Config(format!(
                "tree_height must be in 1..={MAX_TREE_HEIGHT}, got {}",
                self.tree_height
            )));
        }
        if self.root_history_size == 0 {
            return Err(Error::Config("root_history_size must be at least 1".into()));
        }
        if self.maximum_deposit_amount.is_zero() {
            return Err(Error::Config("maximum_deposit_amount must be positive".into()));
        }
        if self.pool_account.is_zero() {
            return Err(Error::Config("pool_account must be set".into()));
        }
        if self.pool_account == self.multisig || self.pool_account == self.l1_bridge {
            return Err(Error::Config(
                "pool_account must differ from multisig and l1_bridge".into(),
            ));
        }
        Ok(())
    }
}

mod amount_string {
    use super::*;

    pub fn serialize<S: Serializer>(amount: &Amount, s: S) -> core::result::Result<S::Ok, S::Error> {
        s.collect_str(&amount.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> core::result::Result<Amount, D::Error> {
        let s = String::deserialize(d)?;
        s.parse::<u128>()
            .map(Amount)
            .map_err(serde::de::Error::custom)
    }
}
