//! Order state machine.
//!
//! Owns every status change of an [`Order`] together with its side effects: ledger
//! entries, compensating refunds, deposit credits and membership grants. Every method
//! works on the caller's unit of work and never commits it, so a failing side effect
//! takes the status change down with it.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{idempotency, ledger, PipelineError};
use crate::domain::{ManualStatus, Order, OrderStatus, Payment, PaymentStatus};
use crate::fulfillment::{ForwardReceipt, ForwardRequest, FulfillmentProvider};
use crate::ports::UnitOfWork;

/// Ledger names of the settlement counterparties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counterparties {
    pub gateway: String,
    pub provider: String,
    pub balance: String,
}

impl Default for Counterparties {
    fn default() -> Self {
        Self {
            gateway: "Duitku".to_string(),
            provider: "Digiflazz".to_string(),
            balance: "Saldo Member".to_string(),
        }
    }
}

/// Where the money for an order came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Funding {
    Gateway,
    Balance,
}

impl Funding {
    pub fn of(payment: &Payment) -> Self {
        if payment.is_balance() {
            Funding::Balance
        } else {
            Funding::Gateway
        }
    }
}

/// A committed-to-be status change, reported to the audit sink after commit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub order_id: String,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub detail: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Transitioned(Transition),
    /// The order already carries a provider reference; nothing was written.
    Blocked,
}

pub struct OrderStateMachine {
    provider: Arc<dyn FulfillmentProvider>,
    counterparties: Counterparties,
}

impl OrderStateMachine {
    pub fn new(provider: Arc<dyn FulfillmentProvider>, counterparties: Counterparties) -> Self {
        Self {
            provider,
            counterparties,
        }
    }

    pub fn provider(&self) -> &Arc<dyn FulfillmentProvider> {
        &self.provider
    }

    fn advance(order: &mut Order, next: OrderStatus, detail: Value) -> Result<Transition, PipelineError> {
        if !order.status.can_transition_to(next) {
            return Err(PipelineError::Validation(format!(
                "order {} cannot move from {} to {}",
                order.order_id, order.status, next
            )));
        }
        let from = order.status;
        order.status = next;
        order.touch();
        Ok(Transition {
            order_id: order.order_id.clone(),
            from,
            to: next,
            detail,
        })
    }

    /// PENDING -> PAID. Credits the funding counterparty: the gateway nets
    /// `price - fee`, the member balance pool captures the full price.
    pub async fn mark_paid(
        &self,
        uow: &mut dyn UnitOfWork,
        order: &mut Order,
        payment: &mut Payment,
        funding: Funding,
    ) -> Result<Transition, PipelineError> {
        let transition = Self::advance(order, OrderStatus::Paid, json!({ "payment_method": payment.method }))?;

        payment.status = PaymentStatus::Paid;
        payment.updated_at = Utc::now();
        uow.update_payment(payment).await?;
        uow.update_order(order).await?;

        let (counterparty, amount) = match funding {
            Funding::Gateway => (&self.counterparties.gateway, &order.price - &payment.fee_amount),
            Funding::Balance => (&self.counterparties.balance, order.price.clone()),
        };
        ledger::sync(uow, counterparty, &order.order_id, &amount).await?;

        Ok(transition)
    }

    /// PENDING -> FAILED for a payment the gateway reports as not collected.
    /// No money moved, so nothing is refunded.
    pub async fn mark_payment_failed(
        &self,
        uow: &mut dyn UnitOfWork,
        order: &mut Order,
        payment: &mut Payment,
        result_code: &str,
    ) -> Result<Transition, PipelineError> {
        let detail = json!({ "payment_result": result_code });
        let transition = Self::advance(order, OrderStatus::Failed, detail.clone())?;
        order.log = Some(detail);

        payment.status = PaymentStatus::Failed;
        payment.updated_at = Utc::now();
        uow.update_payment(payment).await?;
        uow.update_order(order).await?;

        Ok(transition)
    }

    /// PAID -> PROCESS or PAID -> FAILED for a TOPUP order. Calls the provider at
    /// most once, and not at all if the order was already forwarded.
    pub async fn fulfill_topup(
        &self,
        uow: &mut dyn UnitOfWork,
        order: &mut Order,
        funding: Funding,
    ) -> Result<Step, PipelineError> {
        if idempotency::has_forward_reference(order) {
            tracing::warn!(
                order_id = %order.order_id,
                reference_id = ?order.reference_id,
                "Order already forwarded, blocking second provider call"
            );
            return Ok(Step::Blocked);
        }

        let request = match (&order.product_code, &order.buyer_id) {
            (Some(product_code), Some(buyer_id)) => ForwardRequest {
                reference: order.order_id.clone(),
                buyer_id: buyer_id.clone(),
                server_id: order.server_id.clone(),
                product_code: product_code.clone(),
            },
            _ => {
                let reason = json!({ "error": "MISSING_PRODUCT", "message": "order has no product or buyer id" });
                return self
                    .fail_and_refund(uow, order, funding, reason)
                    .await
                    .map(Step::Transitioned);
            }
        };

        match self.provider.forward(&request).await {
            Ok(receipt) => {
                let transition = Self::advance(
                    order,
                    OrderStatus::Process,
                    json!({ "provider_ref": receipt.provider_ref, "cost": receipt.cost.to_string() }),
                )?;
                self.record_forwarded(uow, order, &receipt).await?;
                tracing::info!(
                    order_id = %order.order_id,
                    reference_id = %receipt.provider_ref,
                    cost = %receipt.cost,
                    "Order forwarded to provider"
                );
                Ok(Step::Transitioned(transition))
            }
            Err(e) => {
                tracing::warn!(order_id = %order.order_id, error = %e, "Provider call failed, compensating");
                let reason = json!({ "error": e.code(), "message": e.to_string() });
                self.fail_and_refund(uow, order, funding, reason)
                    .await
                    .map(Step::Transitioned)
            }
        }
    }

    async fn record_forwarded(
        &self,
        uow: &mut dyn UnitOfWork,
        order: &mut Order,
        receipt: &ForwardReceipt,
    ) -> Result<(), PipelineError> {
        order.reference_id = Some(receipt.provider_ref.clone());
        order.purchase_price = receipt.cost.clone();
        order.profit_amount = &order.price - &receipt.cost;
        if let Some(sn) = &receipt.serial_number {
            order.serial_number = Some(sn.clone());
        }
        order.log = Some(receipt.raw.clone());
        uow.update_order(order).await?;

        let debit = -receipt.cost.clone();
        ledger::sync(uow, &self.counterparties.provider, &order.order_id, &debit).await?;
        Ok(())
    }

    /// Moves the order to FAILED and credits the buyer the full price.
    pub async fn fail_and_refund(
        &self,
        uow: &mut dyn UnitOfWork,
        order: &mut Order,
        funding: Funding,
        reason: Value,
    ) -> Result<Transition, PipelineError> {
        let transition = Self::advance(order, OrderStatus::Failed, reason.clone())?;
        let refunded = self.refund(uow, order, funding).await?;
        order.log = Some(json!({ "reason": reason, "refunded": refunded }));
        uow.update_order(order).await?;
        Ok(transition)
    }

    /// Credits `order.price` back to the buyer. An order without a resolvable buyer is
    /// logged as an invariant violation and leaves every balance untouched.
    async fn refund(&self, uow: &mut dyn UnitOfWork, order: &Order, funding: Funding) -> Result<bool, PipelineError> {
        let Some(username) = order.username.as_deref() else {
            let violation = PipelineError::InvariantViolation(format!("order {} has no username to refund", order.order_id));
            tracing::error!(order_id = %order.order_id, code = violation.code(), "{}", violation);
            return Ok(false);
        };

        match uow.credit_user(username, &order.price).await? {
            Some(balance) => {
                tracing::info!(
                    order_id = %order.order_id,
                    username = %username,
                    amount = %order.price,
                    balance = %balance,
                    "Refunded order price to buyer"
                );
            }
            None => {
                let violation = PipelineError::InvariantViolation(format!(
                    "user {} for order {} does not exist",
                    username, order.order_id
                ));
                tracing::error!(order_id = %order.order_id, code = violation.code(), "{}", violation);
                return Ok(false);
            }
        }

        if funding == Funding::Balance {
            let reversal = -order.price.clone();
            ledger::sync(uow, &self.counterparties.balance, &order.order_id, &reversal).await?;
        }
        Ok(true)
    }

    /// PAID -> SUCCESS for a DEPOSIT order: credits the deposit amount to its owner.
    pub async fn complete_deposit(&self, uow: &mut dyn UnitOfWork, order: &mut Order) -> Result<Transition, PipelineError> {
        let mut deposit = uow.deposit_for_update(&order.order_id).await?.ok_or_else(|| {
            PipelineError::InvariantViolation(format!("deposit record missing for order {}", order.order_id))
        })?;

        let balance = uow
            .credit_user(&deposit.username, &deposit.amount)
            .await?
            .ok_or_else(|| PipelineError::InvariantViolation(format!("user {} does not exist", deposit.username)))?;

        deposit.status = PaymentStatus::Paid;
        deposit.updated_at = Utc::now();
        uow.update_deposit(&deposit).await?;

        let transition = Self::advance(
            order,
            OrderStatus::Success,
            json!({ "username": deposit.username, "credited": deposit.amount.to_string() }),
        )?;
        uow.update_order(order).await?;

        tracing::info!(
            order_id = %order.order_id,
            username = %deposit.username,
            amount = %deposit.amount,
            balance = %balance,
            "Deposit credited"
        );
        Ok(transition)
    }

    /// PAID -> SUCCESS for a MEMBERSHIP order whose price matches a tier exactly;
    /// PAID -> FAILED with refund otherwise.
    pub async fn grant_membership(
        &self,
        uow: &mut dyn UnitOfWork,
        order: &mut Order,
        funding: Funding,
    ) -> Result<Transition, PipelineError> {
        let username = match order.username.clone() {
            Some(username) if uow.user(&username).await?.is_some() => username,
            _ => {
                let reason = json!({ "error": "UNKNOWN_MEMBER", "message": "order has no existing user" });
                return self.fail_and_refund(uow, order, funding, reason).await;
            }
        };

        let Some(tier) = uow.membership_tier_by_price(&order.price).await? else {
            let reason = json!({ "error": "NO_TIER", "message": format!("no membership tier priced {}", order.price) });
            return self.fail_and_refund(uow, order, funding, reason).await;
        };

        uow.set_user_role(&username, &tier.name).await?;
        let transition = Self::advance(order, OrderStatus::Success, json!({ "role": tier.name }))?;
        uow.update_order(order).await?;

        tracing::info!(order_id = %order.order_id, username = %username, role = %tier.name, "Membership granted");
        Ok(transition)
    }

    /// Applies a provider success report. Returns `None` when the order was already
    /// SUCCESS and only the outstanding bookkeeping ran.
    pub async fn record_success(
        &self,
        uow: &mut dyn UnitOfWork,
        order: &mut Order,
        serial_number: Option<String>,
        raw: Value,
    ) -> Result<Option<Transition>, PipelineError> {
        let transition = if order.status == OrderStatus::Success {
            None
        } else {
            Some(Self::advance(order, OrderStatus::Success, json!({ "sn": serial_number }))?)
        };

        if serial_number.is_some() {
            order.serial_number = serial_number;
        }
        order.profit_amount = &order.price - &order.purchase_price;
        order.success_report_sent = true;
        order.log = Some(raw.clone());
        self.settle_manual(uow, order, ManualStatus::Success, raw).await?;
        uow.update_order(order).await?;

        Ok(transition)
    }

    /// PROCESS -> FAILED on a provider failure report: refunds the buyer, reverses a
    /// member-balance capture and books the provider's cost back to its counterparty.
    pub async fn record_provider_failure(
        &self,
        uow: &mut dyn UnitOfWork,
        order: &mut Order,
        funding: Funding,
        raw: Value,
    ) -> Result<Transition, PipelineError> {
        let transition = Self::advance(order, OrderStatus::Failed, json!({ "provider": raw }))?;
        let refunded = self.refund(uow, order, funding).await?;

        let returned = order.purchase_price.clone();
        ledger::sync(uow, &self.counterparties.provider, &order.order_id, &returned).await?;

        order.log = Some(json!({ "provider": raw, "refunded": refunded }));
        self.settle_manual(uow, order, ManualStatus::Failed, raw).await?;
        uow.update_order(order).await?;

        Ok(transition)
    }

    async fn settle_manual(
        &self,
        uow: &mut dyn UnitOfWork,
        order: &Order,
        status: ManualStatus,
        raw: Value,
    ) -> Result<(), PipelineError> {
        let Some(reference) = order.reference_id.as_deref() else {
            return Ok(());
        };
        if let Some(mut manual) = uow.manual_transaction_for_update(reference).await? {
            if manual.status == ManualStatus::Process {
                manual.status = status;
                manual.log = Some(raw);
                manual.updated_at = Utc::now();
                uow.update_manual_transaction(&manual).await?;
            }
        }
        Ok(())
    }

    /// FAILED -> PROCESS after an operator retry the provider accepted. This is the
    /// only edge out of FAILED. A balance-funded order books the re-debit as a fresh
    /// member-balance capture.
    pub async fn reopen_for_retry(
        &self,
        uow: &mut dyn UnitOfWork,
        order: &mut Order,
        funding: Funding,
        receipt: &ForwardReceipt,
    ) -> Result<Transition, PipelineError> {
        if order.status != OrderStatus::Failed {
            return Err(PipelineError::Validation(format!(
                "order {} is {} and cannot be retried",
                order.order_id, order.status
            )));
        }
        order.status = OrderStatus::Process;
        order.success_report_sent = false;
        order.touch();
        self.record_forwarded(uow, order, receipt).await?;
        if funding == Funding::Balance {
            ledger::sync(uow, &self.counterparties.balance, &order.order_id, &order.price).await?;
        }

        Ok(Transition {
            order_id: order.order_id.clone(),
            from: OrderStatus::Failed,
            to: OrderStatus::Process,
            detail: json!({ "provider_ref": receipt.provider_ref, "manual": true }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use crate::domain::{TransactionKind, BALANCE_METHOD};
    use crate::fulfillment::{ProviderError, ProviderStatus};
    use crate::ports::Store;
    use async_trait::async_trait;
    use bigdecimal::BigDecimal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProvider {
        answer: Result<ForwardReceipt, ProviderError>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FulfillmentProvider for FixedProvider {
        async fn forward(&self, _request: &ForwardRequest) -> Result<ForwardReceipt, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    fn receipt(reference: &str, cost: i64) -> ForwardReceipt {
        ForwardReceipt {
            provider_ref: reference.to_string(),
            cost: BigDecimal::from(cost),
            status: ProviderStatus::Pending,
            serial_number: None,
            message: "Transaksi Pending".to_string(),
            raw: json!({ "data": { "ref_id": reference } }),
        }
    }

    fn machine(answer: Result<ForwardReceipt, ProviderError>) -> (OrderStateMachine, Arc<FixedProvider>) {
        let provider = Arc::new(FixedProvider {
            answer,
            calls: AtomicUsize::new(0),
        });
        (OrderStateMachine::new(provider.clone(), Counterparties::default()), provider)
    }

    fn paid_topup() -> Order {
        let mut order = Order::new("VAZZ1".into(), TransactionKind::Topup, BigDecimal::from(10000), Some("alice".into()))
            .with_product("ML86".into(), "123456".into(), Some("2001".into()));
        order.status = OrderStatus::Paid;
        order
    }

    #[tokio::test]
    async fn test_mark_paid_credits_gateway_net_of_fee() {
        let store = MemoryStore::new();
        let (machine, _) = machine(Ok(receipt("VAZZ1", 9500)));
        let mut order = Order::new("VAZZ1".into(), TransactionKind::Topup, BigDecimal::from(10000), None);
        let mut payment = Payment::new("VAZZ1".into(), "BC".into(), BigDecimal::from(1500), BigDecimal::from(11500));

        let mut uow = store.begin().await.unwrap();
        uow.insert_order(&order).await.unwrap();
        uow.insert_payment(&payment).await.unwrap();
        let transition = machine
            .mark_paid(uow.as_mut(), &mut order, &mut payment, Funding::Gateway)
            .await
            .unwrap();
        uow.commit().await.unwrap();

        assert_eq!(transition.from, OrderStatus::Pending);
        assert_eq!(transition.to, OrderStatus::Paid);
        let state = store.snapshot().await;
        assert_eq!(state.payments["VAZZ1"].status, PaymentStatus::Paid);
        assert_eq!(state.platform_balances["Duitku"].balance, BigDecimal::from(8500));
    }

    #[tokio::test]
    async fn test_balance_funding_credits_member_pool() {
        let store = MemoryStore::new();
        let (machine, _) = machine(Ok(receipt("VAZZ1", 9500)));
        let mut order = Order::new("VAZZ1".into(), TransactionKind::Topup, BigDecimal::from(10000), Some("alice".into()));
        let mut payment = Payment::new("VAZZ1".into(), BALANCE_METHOD.into(), BigDecimal::from(0), BigDecimal::from(10000));

        let mut uow = store.begin().await.unwrap();
        uow.insert_order(&order).await.unwrap();
        uow.insert_payment(&payment).await.unwrap();
        machine
            .mark_paid(uow.as_mut(), &mut order, &mut payment, Funding::Balance)
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let state = store.snapshot().await;
        assert_eq!(state.platform_balances["Saldo Member"].balance, BigDecimal::from(10000));
        assert!(!state.platform_balances.contains_key("Duitku"));
    }

    #[tokio::test]
    async fn test_forwarded_order_is_blocked_without_provider_call() {
        let store = MemoryStore::new();
        let (machine, provider) = machine(Ok(receipt("VAZZ1", 9500)));
        let mut order = paid_topup();
        order.reference_id = Some("VAZZ1".into());

        let mut uow = store.begin().await.unwrap();
        uow.insert_order(&order).await.unwrap();
        let step = machine.fulfill_topup(uow.as_mut(), &mut order, Funding::Gateway).await.unwrap();

        assert_eq!(step, Step::Blocked);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert_eq!(order.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_accepted_forward_moves_to_process() {
        let store = MemoryStore::new();
        let (machine, provider) = machine(Ok(receipt("VAZZ1", 9500)));
        let mut order = paid_topup();

        let mut uow = store.begin().await.unwrap();
        uow.insert_order(&order).await.unwrap();
        let step = machine.fulfill_topup(uow.as_mut(), &mut order, Funding::Gateway).await.unwrap();
        uow.commit().await.unwrap();

        assert!(matches!(step, Step::Transitioned(ref t) if t.to == OrderStatus::Process));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let state = store.snapshot().await;
        let stored = &state.orders["VAZZ1"];
        assert_eq!(stored.reference_id.as_deref(), Some("VAZZ1"));
        assert_eq!(stored.purchase_price, BigDecimal::from(9500));
        assert_eq!(stored.profit_amount, BigDecimal::from(500));
        assert_eq!(state.platform_balances["Digiflazz"].balance, BigDecimal::from(-9500));
    }

    #[tokio::test]
    async fn test_rejected_forward_refunds_buyer() {
        let store = MemoryStore::new();
        store.add_user("alice", BigDecimal::from(0)).await;
        let (machine, _) = machine(Err(ProviderError::Rejected {
            code: "40".into(),
            message: "Produk gangguan".into(),
        }));
        let mut order = paid_topup();

        let mut uow = store.begin().await.unwrap();
        uow.insert_order(&order).await.unwrap();
        machine.fulfill_topup(uow.as_mut(), &mut order, Funding::Gateway).await.unwrap();
        uow.commit().await.unwrap();

        let state = store.snapshot().await;
        assert_eq!(state.orders["VAZZ1"].status, OrderStatus::Failed);
        assert_eq!(state.orders["VAZZ1"].reference_id, None);
        assert_eq!(state.users["alice"].balance, BigDecimal::from(10000));
        assert!(!state.platform_balances.contains_key("Digiflazz"));
    }

    #[tokio::test]
    async fn test_refund_without_username_leaves_balances_alone() {
        let store = MemoryStore::new();
        store.add_user("alice", BigDecimal::from(0)).await;
        let (machine, _) = machine(Err(ProviderError::Timeout(45)));
        let mut order = paid_topup();
        order.username = None;

        let mut uow = store.begin().await.unwrap();
        uow.insert_order(&order).await.unwrap();
        machine.fulfill_topup(uow.as_mut(), &mut order, Funding::Gateway).await.unwrap();
        uow.commit().await.unwrap();

        let state = store.snapshot().await;
        assert_eq!(state.orders["VAZZ1"].status, OrderStatus::Failed);
        assert_eq!(state.users["alice"].balance, BigDecimal::from(0));
    }

    #[tokio::test]
    async fn test_illegal_edge_is_rejected() {
        let store = MemoryStore::new();
        let (machine, _) = machine(Ok(receipt("VAZZ1", 1)));
        let mut order = paid_topup();
        order.status = OrderStatus::Success;

        let mut uow = store.begin().await.unwrap();
        uow.insert_order(&order).await.unwrap();
        let err = machine
            .fail_and_refund(uow.as_mut(), &mut order, Funding::Gateway, json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(order.status, OrderStatus::Success);
    }
}
