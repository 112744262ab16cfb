//! Buyer accounts, membership tiers and operator retry records.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::UnknownVariant;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub balance: BigDecimal,
    pub role: String,
}

/// Membership tier, matched against a paid order by exact price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipTier {
    pub name: String,
    pub price: BigDecimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ManualStatus {
    Process,
    Success,
    Failed,
}

impl ManualStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManualStatus::Process => "PROCESS",
            ManualStatus::Success => "SUCCESS",
            ManualStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ManualStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ManualStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PROCESS" => Ok(ManualStatus::Process),
            "SUCCESS" => Ok(ManualStatus::Success),
            "FAILED" => Ok(ManualStatus::Failed),
            _ => Err(UnknownVariant::new("manual status", s)),
        }
    }
}

/// Operator resubmission of a failed order. `manual_transaction_id` is the
/// idempotency key sent to the provider for that attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualTransaction {
    pub id: Uuid,
    pub manual_transaction_id: String,
    pub order_id: String,
    pub operator: String,
    pub status: ManualStatus,
    pub log: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ManualTransaction {
    pub fn new(order_id: &str, attempt: i64, operator: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            manual_transaction_id: format!("MANUAL-{}-{}", order_id, attempt),
            order_id: order_id.to_string(),
            operator,
            status: ManualStatus::Process,
            log: None,
            created_at: now,
            updated_at: now,
        }
    }
}
