//! Order and payment entities.
//! Framework-agnostic representation of a digital-goods order and its gateway payment.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::UnknownVariant;

/// What the buyer is purchasing. Decides which handler runs once the order is paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionKind {
    Topup,
    Deposit,
    Membership,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Topup => "TOPUP",
            TransactionKind::Deposit => "DEPOSIT",
            TransactionKind::Membership => "MEMBERSHIP",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TOPUP" => Ok(TransactionKind::Topup),
            "DEPOSIT" => Ok(TransactionKind::Deposit),
            "MEMBERSHIP" => Ok(TransactionKind::Membership),
            _ => Err(UnknownVariant::new("transaction kind", s)),
        }
    }
}

/// Order lifecycle states.
///
/// `PENDING -> PAID -> PROCESS -> {SUCCESS | FAILED}`. `PAID -> FAILED` is the
/// compensation edge. SUCCESS and FAILED are terminal; the only way out of
/// FAILED is an operator manual retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Process,
    Success,
    Failed,
}

impl OrderStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Success | OrderStatus::Failed)
    }

    /// Legal edges of the order state machine.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Paid)
                | (Pending, Failed)
                | (Paid, Process)
                | (Paid, Success)
                | (Paid, Failed)
                | (Process, Success)
                | (Process, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Process => "PROCESS",
            OrderStatus::Success => "SUCCESS",
            OrderStatus::Failed => "FAILED",
        }
    }

    /// Coarse label shown to payers. Provider detail never leaves the `log` field.
    pub fn public_label(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Process => "processing",
            OrderStatus::Success => "success",
            OrderStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(OrderStatus::Pending),
            "PAID" => Ok(OrderStatus::Paid),
            "PROCESS" => Ok(OrderStatus::Process),
            "SUCCESS" => Ok(OrderStatus::Success),
            "FAILED" => Ok(OrderStatus::Failed),
            _ => Err(UnknownVariant::new("order status", s)),
        }
    }
}

/// Gateway payment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(PaymentStatus::Pending),
            "PAID" => Ok(PaymentStatus::Paid),
            "FAILED" => Ok(PaymentStatus::Failed),
            _ => Err(UnknownVariant::new("payment status", s)),
        }
    }
}

/// Payment method code used when an order is settled from the buyer's internal balance.
pub const BALANCE_METHOD: &str = "SALDO";

/// The unit of work: one purchase, tracked from creation to a terminal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_id: String,
    /// Set once the order is forwarded to the fulfillment provider. Doubles as the
    /// idempotency key for that forwarding.
    pub reference_id: Option<String>,
    pub kind: TransactionKind,
    pub status: OrderStatus,
    pub price: BigDecimal,
    pub purchase_price: BigDecimal,
    pub profit_amount: BigDecimal,
    pub username: Option<String>,
    pub product_code: Option<String>,
    pub buyer_id: Option<String>,
    pub server_id: Option<String>,
    pub serial_number: Option<String>,
    pub log: Option<serde_json::Value>,
    pub success_report_sent: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(order_id: String, kind: TransactionKind, price: BigDecimal, username: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id,
            reference_id: None,
            kind,
            status: OrderStatus::Pending,
            price,
            purchase_price: BigDecimal::from(0),
            profit_amount: BigDecimal::from(0),
            username,
            product_code: None,
            buyer_id: None,
            server_id: None,
            serial_number: None,
            log: None,
            success_report_sent: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_product(mut self, product_code: String, buyer_id: String, server_id: Option<String>) -> Self {
        self.product_code = Some(product_code);
        self.buyer_id = Some(buyer_id);
        self.server_id = server_id.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Gateway payment paired one-to-one with an [`Order`] through `order_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: String,
    pub status: PaymentStatus,
    pub method: String,
    pub fee_amount: BigDecimal,
    pub total_amount: BigDecimal,
    pub payment_number: Option<String>,
    pub reference: Option<String>,
    pub payment_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(order_id: String, method: String, fee_amount: BigDecimal, total_amount: BigDecimal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id,
            status: PaymentStatus::Pending,
            method,
            fee_amount,
            total_amount,
            payment_number: None,
            reference: None,
            payment_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_balance(&self) -> bool {
        self.method == BALANCE_METHOD
    }
}

/// Deposit record kept alongside a DEPOSIT order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deposit {
    pub id: Uuid,
    pub order_id: String,
    pub username: String,
    pub amount: BigDecimal,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deposit {
    pub fn new(order_id: String, username: String, amount: BigDecimal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id,
            username,
            amount,
            status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}
