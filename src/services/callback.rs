//! Callback ingestion pipelines.
//!
//! `process_payment_callback` handles the payment gateway's notification and drives an
//! order from PENDING through payment to its kind-specific handler.
//! `process_provider_callback` handles the fulfillment provider's delivery report and
//! settles a forwarded order. Each invocation runs in one unit of work; any error
//! drops it, which discards every write the invocation made.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use super::state_machine::{Funding, OrderStateMachine, Step, Transition};
use super::PipelineError;
use crate::audit::AuditSink;
use crate::domain::{OrderStatus, PaymentStatus, TransactionKind};
use crate::fulfillment::ProviderStatus;
use crate::gateway::PaymentGateway;
use crate::ports::Store;
use crate::signing;

pub const ACTOR_GATEWAY: &str = "gateway-callback";
pub const ACTOR_PROVIDER: &str = "provider-callback";

/// Gateway success result code.
const RESULT_PAID: &str = "00";

/// Gateway callback as it arrives, from either a JSON or a form-encoded body.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawPaymentCallback {
    #[serde(rename = "merchantCode", default)]
    pub merchant_code: Option<String>,
    /// String in form bodies, string or number in JSON bodies.
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(rename = "refId", alias = "reference", default)]
    pub ref_id: Option<String>,
    #[serde(rename = "merchantOrderId", default)]
    pub merchant_order_id: Option<String>,
    #[serde(rename = "resultCode", default)]
    pub result_code: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct PaymentCallback {
    merchant_code: String,
    /// Amount exactly as the gateway signed it.
    amount_text: String,
    amount: BigDecimal,
    reference: Option<String>,
    merchant_order_id: String,
    result_code: String,
    signature: String,
}

fn required(field: Option<String>, name: &str) -> Result<String, PipelineError> {
    field
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| PipelineError::Validation(format!("missing field {}", name)))
}

impl RawPaymentCallback {
    fn validate(self) -> Result<PaymentCallback, PipelineError> {
        let merchant_code = required(self.merchant_code, "merchantCode")?;
        let merchant_order_id = required(self.merchant_order_id, "merchantOrderId")?;
        let result_code = required(self.result_code, "resultCode")?;
        let signature = required(self.signature, "signature")?;

        let (amount_text, amount) = match self.amount {
            Some(Value::String(s)) if !s.trim().is_empty() => {
                let text = s.trim().to_string();
                let amount = text
                    .parse::<BigDecimal>()
                    .map_err(|_| PipelineError::Validation(format!("amount {} is not a number", text)))?;
                (text, amount)
            }
            Some(Value::Number(n)) => {
                let amount = n
                    .to_string()
                    .parse::<BigDecimal>()
                    .map_err(|_| PipelineError::Validation(format!("amount {} is not a number", n)))?;
                (signing::format_amount(&amount), amount)
            }
            _ => return Err(PipelineError::Validation("missing field amount".to_string())),
        };

        Ok(PaymentCallback {
            merchant_code,
            amount_text,
            amount,
            reference: self.ref_id.filter(|r| !r.trim().is_empty()),
            merchant_order_id,
            result_code,
            signature,
        })
    }
}

/// Provider delivery report: `{ "data": { ... } }`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawProviderCallback {
    #[serde(default)]
    pub data: Option<ProviderCallbackData>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProviderCallbackData {
    #[serde(default)]
    pub ref_id: Option<String>,
    #[serde(default)]
    pub buyer_sku_code: Option<String>,
    #[serde(default)]
    pub customer_no: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub sn: Option<String>,
    #[serde(default)]
    pub rc: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    Settled { order_id: String, status: OrderStatus },
    /// The order already carried a provider reference; no provider call was made.
    Blocked { order_id: String },
    /// Nothing to apply yet, e.g. a provider "pending" report.
    Ignored { order_id: String, reason: String },
}

/// Response envelope returned to callback senders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallbackResult {
    pub success: bool,
    pub message: String,
    pub data: Option<Value>,
}

impl From<&Result<CallbackOutcome, PipelineError>> for CallbackResult {
    fn from(result: &Result<CallbackOutcome, PipelineError>) -> Self {
        match result {
            Ok(CallbackOutcome::Settled { order_id, status }) => CallbackResult {
                success: true,
                message: "Callback processed".to_string(),
                data: Some(json!({ "orderId": order_id, "status": status })),
            },
            Ok(CallbackOutcome::Blocked { order_id }) => CallbackResult {
                success: true,
                message: "Order already forwarded".to_string(),
                data: Some(json!({ "orderId": order_id, "status": "BLOCKED" })),
            },
            Ok(CallbackOutcome::Ignored { order_id, reason }) => CallbackResult {
                success: true,
                message: reason.clone(),
                data: Some(json!({ "orderId": order_id })),
            },
            // Redelivery is expected; acknowledging it stops the sender retrying.
            Err(e @ PipelineError::Duplicate(_)) => CallbackResult {
                success: true,
                message: e.to_string(),
                data: Some(json!({ "code": e.code() })),
            },
            Err(e) => CallbackResult {
                success: false,
                message: e.to_string(),
                data: Some(json!({ "code": e.code() })),
            },
        }
    }
}

pub struct CallbackPipeline {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    machine: Arc<OrderStateMachine>,
    audit: Arc<dyn AuditSink>,
}

impl CallbackPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        machine: Arc<OrderStateMachine>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            gateway,
            machine,
            audit,
        }
    }

    pub async fn process_payment_callback(&self, raw: RawPaymentCallback) -> Result<CallbackOutcome, PipelineError> {
        let callback = raw.validate()?;
        let order_id = callback.merchant_order_id.clone();

        if !self.gateway.verify_callback(
            &callback.merchant_code,
            &callback.amount_text,
            &callback.merchant_order_id,
            &callback.signature,
        ) {
            tracing::warn!(order_id = %order_id, "Rejected payment callback with invalid signature");
            return Err(PipelineError::Validation("invalid callback signature".to_string()));
        }

        let mut uow = self.store.begin().await?;

        let mut order = uow
            .order_for_update(&order_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("order {}", order_id)))?;
        let mut payment = uow
            .payment_for_update(&order_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("payment for order {}", order_id)))?;

        match payment.status {
            PaymentStatus::Paid => {
                tracing::info!(order_id = %order_id, "Duplicate payment callback ignored");
                return Err(PipelineError::Duplicate(format!("order {} already paid", order_id)));
            }
            PaymentStatus::Failed => {
                return Err(PipelineError::Validation(format!("payment for order {} already failed", order_id)));
            }
            PaymentStatus::Pending => {}
        }

        if callback.amount != payment.total_amount {
            return Err(PipelineError::Validation(format!(
                "amount {} does not match payment total {}",
                callback.amount, payment.total_amount
            )));
        }

        if let Some(reference) = &callback.reference {
            payment.reference.get_or_insert_with(|| reference.clone());
        }

        if callback.result_code != RESULT_PAID {
            let transition = self
                .machine
                .mark_payment_failed(uow.as_mut(), &mut order, &mut payment, &callback.result_code)
                .await?;
            uow.commit().await?;
            self.audit.record_transitions(&[transition], ACTOR_GATEWAY);
            tracing::info!(order_id = %order_id, result_code = %callback.result_code, "Payment reported as not collected");
            return Ok(CallbackOutcome::Settled {
                order_id,
                status: OrderStatus::Failed,
            });
        }

        let mut transitions: Vec<Transition> = Vec::with_capacity(2);
        transitions.push(
            self.machine
                .mark_paid(uow.as_mut(), &mut order, &mut payment, Funding::Gateway)
                .await?,
        );

        let blocked = match order.kind {
            TransactionKind::Topup => match self.machine.fulfill_topup(uow.as_mut(), &mut order, Funding::Gateway).await? {
                Step::Transitioned(transition) => {
                    transitions.push(transition);
                    false
                }
                Step::Blocked => true,
            },
            TransactionKind::Deposit => {
                transitions.push(self.machine.complete_deposit(uow.as_mut(), &mut order).await?);
                false
            }
            TransactionKind::Membership => {
                transitions.push(
                    self.machine
                        .grant_membership(uow.as_mut(), &mut order, Funding::Gateway)
                        .await?,
                );
                false
            }
        };

        uow.commit().await?;
        self.audit.record_transitions(&transitions, ACTOR_GATEWAY);

        tracing::info!(order_id = %order_id, kind = %order.kind, status = %order.status, "Payment callback processed");

        if blocked {
            Ok(CallbackOutcome::Blocked { order_id })
        } else {
            Ok(CallbackOutcome::Settled {
                order_id,
                status: order.status,
            })
        }
    }

    pub async fn process_provider_callback(&self, raw: RawProviderCallback) -> Result<CallbackOutcome, PipelineError> {
        let data = raw
            .data
            .ok_or_else(|| PipelineError::Validation("missing field data".to_string()))?;
        let reference = required(data.ref_id.clone(), "data.ref_id")?;
        let status = ProviderStatus::parse(&required(data.status.clone(), "data.status")?);
        let report = serde_json::to_value(&data).unwrap_or(Value::Null);

        let mut uow = self.store.begin().await?;
        let mut order = uow
            .order_by_reference_for_update(&reference)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("order with reference {}", reference)))?;
        let order_id = order.order_id.clone();

        if status == ProviderStatus::Pending {
            return Ok(CallbackOutcome::Ignored {
                order_id,
                reason: "Provider still processing".to_string(),
            });
        }

        let transition = match (order.status, status) {
            (OrderStatus::Success, ProviderStatus::Success) if order.success_report_sent => {
                return Err(PipelineError::Duplicate(format!("order {} already settled", order_id)));
            }
            (OrderStatus::Failed, ProviderStatus::Failed) => {
                return Err(PipelineError::Duplicate(format!("order {} already failed", order_id)));
            }
            (OrderStatus::Process | OrderStatus::Success, ProviderStatus::Success) => {
                let sn = data.sn.filter(|s| !s.trim().is_empty());
                self.machine.record_success(uow.as_mut(), &mut order, sn, report).await?
            }
            (OrderStatus::Process, ProviderStatus::Failed) => {
                let funding = uow
                    .payment_for_update(&order_id)
                    .await?
                    .map(|payment| Funding::of(&payment))
                    .unwrap_or(Funding::Gateway);
                Some(
                    self.machine
                        .record_provider_failure(uow.as_mut(), &mut order, funding, report)
                        .await?,
                )
            }
            (current, _) => {
                return Err(PipelineError::Validation(format!(
                    "order {} is {} and cannot accept a provider report",
                    order_id, current
                )));
            }
        };

        uow.commit().await?;
        if let Some(transition) = transition {
            self.audit.record_transitions(&[transition], ACTOR_PROVIDER);
        }

        tracing::info!(
            order_id = %order_id,
            reference_id = %reference,
            status = %order.status,
            "Provider callback processed"
        );
        Ok(CallbackOutcome::Settled {
            order_id,
            status: order.status,
        })
    }
}
