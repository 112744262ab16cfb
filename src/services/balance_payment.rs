//! Paying for a top-up from the buyer's internal balance.
//!
//! The debit, the order, the provider call and any compensating refund share a single
//! unit of work: a buyer is either charged for an order that reached PROCESS, or
//! refunded in the same commit that records the failure.

use bigdecimal::{BigDecimal, Signed, Zero};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::checkout::new_order_id;
use super::state_machine::{Funding, OrderStateMachine, Step};
use super::PipelineError;
use crate::audit::AuditSink;
use crate::domain::{Order, OrderStatus, Payment, TransactionKind, BALANCE_METHOD};
use crate::ports::Store;

pub const ACTOR_BALANCE: &str = "balance-payment";

#[derive(Debug, Clone, Deserialize)]
pub struct BalancePaymentRequest {
    pub username: String,
    pub product_code: String,
    pub buyer_id: String,
    #[serde(default)]
    pub server_id: Option<String>,
    pub price: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalancePaymentReceipt {
    pub order_id: String,
    pub status: OrderStatus,
    pub balance: BigDecimal,
    pub message: String,
}

pub struct BalancePayment {
    store: Arc<dyn Store>,
    machine: Arc<OrderStateMachine>,
    audit: Arc<dyn AuditSink>,
    order_prefix: String,
}

impl BalancePayment {
    pub fn new(
        store: Arc<dyn Store>,
        machine: Arc<OrderStateMachine>,
        audit: Arc<dyn AuditSink>,
        order_prefix: String,
    ) -> Self {
        Self {
            store,
            machine,
            audit,
            order_prefix,
        }
    }

    /// Debits the buyer and forwards the order synchronously. Provider failure is not
    /// an error here: the receipt carries FAILED and the refunded balance.
    pub async fn pay_with_balance(&self, request: BalancePaymentRequest) -> Result<BalancePaymentReceipt, PipelineError> {
        if !request.price.is_positive() {
            return Err(PipelineError::Validation("price must be positive".to_string()));
        }
        for (name, value) in [
            ("username", &request.username),
            ("product_code", &request.product_code),
            ("buyer_id", &request.buyer_id),
        ] {
            if value.trim().is_empty() {
                return Err(PipelineError::Validation(format!("missing field {}", name)));
            }
        }

        let mut uow = self.store.begin().await?;

        if uow.debit_user(&request.username, &request.price).await?.is_none() {
            if uow.user(&request.username).await?.is_none() {
                return Err(PipelineError::NotFound(format!("user {}", request.username)));
            }
            tracing::info!(username = %request.username, price = %request.price, "Balance payment refused");
            return Err(PipelineError::InsufficientBalance {
                username: request.username,
            });
        }

        let order_id = new_order_id(&self.order_prefix);
        let mut order = Order::new(
            order_id.clone(),
            TransactionKind::Topup,
            request.price.clone(),
            Some(request.username.clone()),
        )
        .with_product(request.product_code, request.buyer_id, request.server_id);
        let mut payment = Payment::new(
            order_id.clone(),
            BALANCE_METHOD.to_string(),
            BigDecimal::zero(),
            request.price.clone(),
        );
        uow.insert_order(&order).await?;
        uow.insert_payment(&payment).await?;

        let mut transitions = vec![
            self.machine
                .mark_paid(uow.as_mut(), &mut order, &mut payment, Funding::Balance)
                .await?,
        ];
        if let Step::Transitioned(transition) = self
            .machine
            .fulfill_topup(uow.as_mut(), &mut order, Funding::Balance)
            .await?
        {
            transitions.push(transition);
        }

        let balance = uow
            .user(&request.username)
            .await?
            .map(|user| user.balance)
            .unwrap_or_else(BigDecimal::zero);
        uow.commit().await?;
        self.audit.record_transitions(&transitions, ACTOR_BALANCE);

        let message = match order.status {
            OrderStatus::Process => "Order is being processed".to_string(),
            OrderStatus::Failed => "Order failed and the balance was refunded".to_string(),
            other => format!("Order is {}", other.public_label()),
        };
        tracing::info!(order_id = %order_id, status = %order.status, "Balance payment completed");

        Ok(BalancePaymentReceipt {
            order_id,
            status: order.status,
            balance,
            message,
        })
    }
}
