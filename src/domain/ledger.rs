//! Platform balances and their append-only history.

use bigdecimal::{BigDecimal, Signed};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::UnknownVariant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Credit,
    Debit,
}

impl ChangeType {
    /// Negative amounts are debits; zero and positive are credits.
    pub fn from_amount(amount: &BigDecimal) -> Self {
        if amount.is_negative() {
            ChangeType::Debit
        } else {
            ChangeType::Credit
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Credit => "CREDIT",
            ChangeType::Debit => "DEBIT",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREDIT" => Ok(ChangeType::Credit),
            "DEBIT" => Ok(ChangeType::Debit),
            _ => Err(UnknownVariant::new("change type", s)),
        }
    }
}

/// Running balance held against one settlement counterparty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformBalance {
    pub id: Uuid,
    pub platform_name: String,
    pub balance: BigDecimal,
    pub last_sync_at: DateTime<Utc>,
}

/// One immutable ledger line. `balance_after - balance_before == amount_changed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceHistory {
    pub id: Uuid,
    pub platform_id: Uuid,
    pub batch_id: String,
    pub balance_before: BigDecimal,
    pub balance_after: BigDecimal,
    pub amount_changed: BigDecimal,
    pub change_type: ChangeType,
    pub created_at: DateTime<Utc>,
}

impl BalanceHistory {
    pub fn is_consistent(&self) -> bool {
        &self.balance_after - &self.balance_before == self.amount_changed
            && self.change_type == ChangeType::from_amount(&self.amount_changed)
    }
}
