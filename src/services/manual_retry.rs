//! Operator resubmission of failed top-ups.
//!
//! A FAILED order was refunded when it failed, so a retry charges the buyer again
//! before forwarding. Each attempt gets its own provider reference
//! (`MANUAL-<order>-<n>`); only one attempt may be in flight at a time.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use super::state_machine::{Funding, OrderStateMachine};
use super::PipelineError;
use crate::audit::{AuditEntry, AuditSink, ACTION_CREATE, ENTITY_MANUAL_TRANSACTION};
use crate::domain::{ManualStatus, ManualTransaction, OrderStatus, TransactionKind};
use crate::fulfillment::ForwardRequest;
use crate::ports::Store;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManualRetryOutcome {
    pub order_id: String,
    pub manual_transaction_id: String,
    pub status: ManualStatus,
    pub order_status: OrderStatus,
    pub message: String,
}

pub struct ManualRetry {
    store: Arc<dyn Store>,
    machine: Arc<OrderStateMachine>,
    audit: Arc<dyn AuditSink>,
}

impl ManualRetry {
    pub fn new(store: Arc<dyn Store>, machine: Arc<OrderStateMachine>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, machine, audit }
    }

    pub async fn retry(&self, order_id: &str, operator: &str) -> Result<ManualRetryOutcome, PipelineError> {
        let mut uow = self.store.begin().await?;

        let mut order = uow
            .order_for_update(order_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("order {}", order_id)))?;

        if order.kind != TransactionKind::Topup || order.status != OrderStatus::Failed {
            return Err(PipelineError::Validation(format!(
                "only FAILED TOPUP orders can be retried, {} is {} {}",
                order_id, order.status, order.kind
            )));
        }

        let attempts = uow.manual_transactions_for_order(order_id).await?;
        if attempts.iter().any(|m| m.status == ManualStatus::Process) {
            return Err(PipelineError::Duplicate(format!("order {} already has a retry in progress", order_id)));
        }

        let (Some(username), Some(product_code), Some(buyer_id)) =
            (order.username.clone(), order.product_code.clone(), order.buyer_id.clone())
        else {
            return Err(PipelineError::InvariantViolation(format!(
                "order {} is missing its buyer or product",
                order_id
            )));
        };

        let funding = uow
            .payment_for_update(order_id)
            .await?
            .map(|payment| Funding::of(&payment))
            .unwrap_or(Funding::Gateway);

        if uow.debit_user(&username, &order.price).await?.is_none() {
            return Err(PipelineError::InsufficientBalance { username });
        }

        let mut manual = ManualTransaction::new(order_id, attempts.len() as i64 + 1, operator.to_string());
        let request = ForwardRequest {
            reference: manual.manual_transaction_id.clone(),
            buyer_id,
            server_id: order.server_id.clone(),
            product_code,
        };

        let transition = match self.machine.provider().forward(&request).await {
            Ok(receipt) => {
                manual.log = Some(receipt.raw.clone());
                uow.insert_manual_transaction(&manual).await?;
                Some(self.machine.reopen_for_retry(uow.as_mut(), &mut order, funding, &receipt).await?)
            }
            Err(e) => {
                tracing::warn!(order_id = %order_id, manual_id = %manual.manual_transaction_id, error = %e, "Manual retry rejected");
                manual.status = ManualStatus::Failed;
                manual.log = Some(json!({ "error": e.code(), "message": e.to_string() }));
                manual.updated_at = Utc::now();
                uow.insert_manual_transaction(&manual).await?;
                uow.credit_user(&username, &order.price).await?;
                None
            }
        };

        uow.commit().await?;

        self.audit.record(AuditEntry::new(
            manual.manual_transaction_id.clone(),
            ENTITY_MANUAL_TRANSACTION,
            ACTION_CREATE,
            None,
            Some(json!({ "order_id": order_id, "status": manual.status })),
            operator,
        ));
        if let Some(transition) = &transition {
            self.audit.record_transitions(std::slice::from_ref(transition), operator);
        }

        tracing::info!(
            order_id = %order_id,
            manual_id = %manual.manual_transaction_id,
            operator = %operator,
            status = %manual.status,
            "Manual retry recorded"
        );

        let message = if transition.is_some() {
            "Retry accepted by provider".to_string()
        } else {
            "Retry rejected by provider, order stays FAILED".to_string()
        };
        Ok(ManualRetryOutcome {
            order_id: order_id.to_string(),
            manual_transaction_id: manual.manual_transaction_id,
            status: manual.status,
            order_status: order.status,
            message,
        })
    }
}
