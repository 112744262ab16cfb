//! Order creation for gateway payments and the public status lookup.

use bigdecimal::{BigDecimal, Signed, Zero};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::PipelineError;
use crate::audit::{AuditEntry, AuditSink, ACTION_CREATE, ENTITY_ORDER};
use crate::domain::{Deposit, Order, Payment, TransactionKind, BALANCE_METHOD};
use crate::gateway::{CreatePaymentRequest, PaymentGateway};
use crate::ports::Store;

pub const ACTOR_CHECKOUT: &str = "checkout";

/// `prefix` followed by 12 uppercase hex characters.
pub fn new_order_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}{}", prefix, hex[..12].to_uppercase())
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub kind: TransactionKind,
    pub price: BigDecimal,
    #[serde(default)]
    pub fee: Option<BigDecimal>,
    pub payment_method: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub product_code: Option<String>,
    #[serde(default)]
    pub buyer_id: Option<String>,
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default)]
    pub product_details: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl CheckoutRequest {
    fn validate(&self) -> Result<(), PipelineError> {
        if !self.price.is_positive() {
            return Err(PipelineError::Validation("price must be positive".to_string()));
        }
        if self.fee.as_ref().map(|f| f.is_negative()).unwrap_or(false) {
            return Err(PipelineError::Validation("fee cannot be negative".to_string()));
        }
        // The gateway charges whole rupiah only.
        for (name, amount) in [("price", Some(&self.price)), ("fee", self.fee.as_ref())] {
            if let Some(amount) = amount {
                if amount.with_scale(0) != *amount {
                    return Err(PipelineError::Validation(format!("{} {} is not a whole number", name, amount)));
                }
            }
        }
        let method = self.payment_method.trim();
        if method.is_empty() || method.eq_ignore_ascii_case(BALANCE_METHOD) {
            return Err(PipelineError::Validation(format!(
                "payment method {:?} is not a gateway method",
                self.payment_method
            )));
        }

        let present = |v: &Option<String>| v.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false);
        match self.kind {
            TransactionKind::Topup if !present(&self.product_code) || !present(&self.buyer_id) => Err(
                PipelineError::Validation("topup orders need product_code and buyer_id".to_string()),
            ),
            TransactionKind::Deposit | TransactionKind::Membership if !present(&self.username) => Err(
                PipelineError::Validation(format!("{} orders need a username", self.kind)),
            ),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckoutReceipt {
    pub order_id: String,
    pub total_amount: BigDecimal,
    pub reference: String,
    pub payment_url: Option<String>,
    pub payment_number: Option<String>,
}

/// Coarse view handed to payers; provider detail stays in the order log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderStatusView {
    pub order_id: String,
    pub kind: TransactionKind,
    pub status: &'static str,
    pub price: BigDecimal,
    pub serial_number: Option<String>,
}

pub struct Checkout {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    audit: Arc<dyn AuditSink>,
    order_prefix: String,
}

impl Checkout {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        audit: Arc<dyn AuditSink>,
        order_prefix: String,
    ) -> Self {
        Self {
            store,
            gateway,
            audit,
            order_prefix,
        }
    }

    /// Registers the payment with the gateway first, then persists the order. A gateway
    /// failure leaves nothing behind.
    pub async fn create_order(&self, request: CheckoutRequest) -> Result<CheckoutReceipt, PipelineError> {
        request.validate()?;

        let order_id = new_order_id(&self.order_prefix);
        let fee = request.fee.clone().unwrap_or_else(BigDecimal::zero);
        let total = &request.price + &fee;
        let username = request.username.clone().filter(|u| !u.trim().is_empty());

        let product_details = request
            .product_details
            .clone()
            .or_else(|| request.product_code.clone())
            .unwrap_or_else(|| request.kind.to_string());

        let created = self
            .gateway
            .create_payment(&CreatePaymentRequest {
                merchant_order_id: order_id.clone(),
                amount: total.clone(),
                product_details,
                payment_method: request.payment_method.trim().to_string(),
                customer_name: username.clone(),
                email: request.email.clone(),
            })
            .await
            .map_err(|e| {
                tracing::warn!(order_id = %order_id, error = %e, "Gateway refused to create payment");
                PipelineError::from(e)
            })?;

        let mut order = Order::new(order_id.clone(), request.kind, request.price.clone(), username.clone());
        if let (Some(product_code), Some(buyer_id)) = (request.product_code.clone(), request.buyer_id.clone()) {
            order = order.with_product(product_code, buyer_id, request.server_id.clone());
        }

        let mut payment = Payment::new(
            order_id.clone(),
            request.payment_method.trim().to_string(),
            fee,
            total.clone(),
        );
        payment.reference = Some(created.reference.clone());
        payment.payment_url = created.payment_url.clone();
        payment.payment_number = created.payment_number.clone();

        let mut uow = self.store.begin().await?;
        uow.insert_order(&order).await?;
        uow.insert_payment(&payment).await?;
        if let (TransactionKind::Deposit, Some(username)) = (request.kind, username) {
            uow.insert_deposit(&Deposit::new(order_id.clone(), username, request.price.clone()))
                .await?;
        }
        uow.commit().await?;

        self.audit.record(AuditEntry::new(
            order_id.clone(),
            ENTITY_ORDER,
            ACTION_CREATE,
            None,
            Some(serde_json::json!({ "status": order.status, "kind": order.kind, "total": total.to_string() })),
            ACTOR_CHECKOUT,
        ));
        tracing::info!(order_id = %order_id, kind = %order.kind, total = %total, "Order created");

        Ok(CheckoutReceipt {
            order_id,
            total_amount: total,
            reference: created.reference,
            payment_url: created.payment_url,
            payment_number: created.payment_number,
        })
    }

    pub async fn order_status(&self, order_id: &str) -> Result<OrderStatusView, PipelineError> {
        lookup_status(self.store.as_ref(), order_id).await
    }
}

/// Reads an order without changing it; the unit of work is dropped, never committed.
pub async fn lookup_status(store: &dyn Store, order_id: &str) -> Result<OrderStatusView, PipelineError> {
    let mut uow = store.begin().await?;
    let order = uow
        .order_for_update(order_id)
        .await?
        .ok_or_else(|| PipelineError::NotFound(format!("order {}", order_id)))?;

    Ok(OrderStatusView {
        order_id: order.order_id,
        kind: order.kind,
        status: order.status.public_label(),
        price: order.price,
        serial_number: order.serial_number,
    })
}
