//! Forwarding guard.
//!
//! An order counts as forwarded as soon as it carries a non-empty provider
//! `reference_id`. Nothing may call the fulfillment provider for such an order again.

use crate::domain::Order;
use crate::ports::{StoreResult, UnitOfWork};

/// True when the order already has a provider reference.
pub fn has_forward_reference(order: &Order) -> bool {
    order
        .reference_id
        .as_deref()
        .map(|r| !r.trim().is_empty())
        .unwrap_or(false)
}

/// Looks the order up inside `uow` and checks it. Unknown orders are not forwarded.
pub async fn is_already_forwarded(uow: &mut dyn UnitOfWork, order_id: &str) -> StoreResult<bool> {
    Ok(uow
        .order_for_update(order_id)
        .await?
        .map(|order| has_forward_reference(&order))
        .unwrap_or(false))
}
