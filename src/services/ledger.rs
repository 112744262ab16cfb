//! Ledger synchronizer.
//!
//! Keeps one running balance per settlement counterparty and appends an immutable
//! history line for every change. Must run inside the unit of work of the transition
//! that caused the change, and exactly once per (order, counterparty, direction).

use bigdecimal::BigDecimal;
use chrono::Utc;
use uuid::Uuid;

use crate::domain::{BalanceHistory, ChangeType, PlatformBalance};
use crate::ports::{StoreResult, UnitOfWork};

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub platform_name: String,
    pub balance_before: BigDecimal,
    pub balance_after: BigDecimal,
}

/// Applies `amount` (negative for debits) to `counterparty` and records it under
/// `batch_id`, usually the order id.
pub async fn sync(
    uow: &mut dyn UnitOfWork,
    counterparty: &str,
    batch_id: &str,
    amount: &BigDecimal,
) -> StoreResult<LedgerEntry> {
    let now = Utc::now();
    let existing = uow.platform_balance_for_update(counterparty).await?;

    let (platform_id, balance_before) = match &existing {
        Some(platform) => (platform.id, platform.balance.clone()),
        None => (Uuid::new_v4(), BigDecimal::from(0)),
    };
    let balance_after = &balance_before + amount;

    uow.upsert_platform_balance(&PlatformBalance {
        id: platform_id,
        platform_name: counterparty.to_string(),
        balance: balance_after.clone(),
        last_sync_at: now,
    })
    .await?;

    uow.append_balance_history(&BalanceHistory {
        id: Uuid::new_v4(),
        platform_id,
        batch_id: batch_id.to_string(),
        balance_before: balance_before.clone(),
        balance_after: balance_after.clone(),
        amount_changed: amount.clone(),
        change_type: ChangeType::from_amount(amount),
        created_at: now,
    })
    .await?;

    tracing::info!(
        counterparty = %counterparty,
        batch_id = %batch_id,
        amount = %amount,
        balance_after = %balance_after,
        "Ledger synced"
    );

    Ok(LedgerEntry {
        platform_name: counterparty.to_string(),
        balance_before,
        balance_after,
    })
}
