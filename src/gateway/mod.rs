//! Payment gateway port: collects money from the payer and notifies us by callback.

pub mod duitku;

pub use duitku::{DuitkuClient, DuitkuConfig};

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Gateway call timed out")]
    Timeout,

    #[error("Gateway network error: {0}")]
    Network(String),

    #[error("Gateway rejected request ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Malformed gateway response: {0}")]
    MalformedResponse(String),

    #[error("Circuit breaker open: {0}")]
    CircuitOpen(String),

    #[error("Invalid payment request: {0}")]
    InvalidRequest(String),
}

impl GatewayError {
    pub fn is_outage(&self) -> bool {
        matches!(self, GatewayError::Timeout | GatewayError::Network(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatePaymentRequest {
    pub merchant_order_id: String,
    pub amount: BigDecimal,
    pub product_details: String,
    pub payment_method: String,
    pub customer_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedPayment {
    pub reference: String,
    pub payment_url: Option<String>,
    /// Virtual account number or QR string, whichever the method issues.
    pub payment_number: Option<String>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayPaymentState {
    Paid,
    Pending,
    Cancelled,
}

impl GatewayPaymentState {
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "00" => GatewayPaymentState::Paid,
            "01" => GatewayPaymentState::Pending,
            _ => GatewayPaymentState::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentQuery {
    pub merchant_order_id: String,
    pub reference: Option<String>,
    pub amount: Option<BigDecimal>,
    pub state: GatewayPaymentState,
    pub message: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment(&self, request: &CreatePaymentRequest) -> Result<CreatedPayment, GatewayError>;

    async fn query_payment(&self, merchant_order_id: &str) -> Result<PaymentQuery, GatewayError>;

    /// Checks the merchant code and signature carried by an inbound callback.
    fn verify_callback(&self, merchant_code: &str, amount: &str, merchant_order_id: &str, signature: &str) -> bool;

    fn circuit_state(&self) -> String {
        "closed".to_string()
    }
}
