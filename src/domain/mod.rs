//! Domain entities for the fulfillment core.

pub mod account;
pub mod ledger;
pub mod order;

pub use account::{ManualStatus, ManualTransaction, MembershipTier, User};
pub use ledger::{BalanceHistory, ChangeType, PlatformBalance};
pub use order::{Deposit, Order, OrderStatus, Payment, PaymentStatus, TransactionKind, BALANCE_METHOD};

use thiserror::Error;

/// A stored enum column held a value this build does not know.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
