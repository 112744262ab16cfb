//! Fulfillment provider port: the third party that actually delivers the goods.

pub mod digiflazz;

pub use digiflazz::{DigiflazzClient, DigiflazzConfig};

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Provider call timed out after {0}s")]
    Timeout(u64),

    #[error("Provider network error: {0}")]
    Network(String),

    #[error("Provider rejected request ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Circuit breaker open: {0}")]
    CircuitOpen(String),
}

impl ProviderError {
    /// True for failures that say nothing about the request itself.
    pub fn is_outage(&self) -> bool {
        matches!(self, ProviderError::Timeout(_) | ProviderError::Network(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::Timeout(_) => "UPSTREAM_TIMEOUT",
            ProviderError::Network(_) => "UPSTREAM_NETWORK",
            ProviderError::Rejected { .. } => "UPSTREAM_REJECTED",
            ProviderError::MalformedResponse(_) => "UPSTREAM_MALFORMED",
            ProviderError::CircuitOpen(_) => "UPSTREAM_UNAVAILABLE",
        }
    }
}

/// Provider-reported delivery state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderStatus {
    Pending,
    Success,
    Failed,
}

impl ProviderStatus {
    /// Case-insensitive match of the provider's status string. Anything that is
    /// neither pending nor a success token is a failure. Pending is kept apart
    /// because the provider sends interim Pending reports before the final one.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => ProviderStatus::Pending,
            "sukses" | "success" => ProviderStatus::Success,
            _ => ProviderStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest {
    /// Sent as the provider `ref_id`; the provider echoes it back in callbacks.
    pub reference: String,
    pub buyer_id: String,
    pub server_id: Option<String>,
    pub product_code: String,
}

impl ForwardRequest {
    /// Game accounts that live on a server are addressed as `buyer_id + server_id`.
    pub fn customer_no(&self) -> String {
        match &self.server_id {
            Some(server) => format!("{}{}", self.buyer_id, server),
            None => self.buyer_id.clone(),
        }
    }
}

/// A structurally valid, accepted provider answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardReceipt {
    pub provider_ref: String,
    pub cost: BigDecimal,
    pub status: ProviderStatus,
    pub serial_number: Option<String>,
    pub message: String,
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait FulfillmentProvider: Send + Sync {
    /// Forwards one order. Implementations must enforce their own deadline.
    /// Only `Pending` or `Success` receipts are returned as `Ok`.
    async fn forward(&self, request: &ForwardRequest) -> Result<ForwardReceipt, ProviderError>;

    fn circuit_state(&self) -> String {
        "closed".to_string()
    }
}
