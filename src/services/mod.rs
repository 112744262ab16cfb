//! Fulfillment and settlement services.
//!
//! Every service receives its collaborators at construction and runs each request in
//! exactly one unit of work. Nothing here reaches for globals.

pub mod balance_payment;
pub mod callback;
pub mod checkout;
pub mod idempotency;
pub mod ledger;
pub mod manual_retry;
pub mod state_machine;

pub use balance_payment::{BalancePayment, BalancePaymentReceipt, BalancePaymentRequest};
pub use callback::{CallbackPipeline, CallbackResult, RawPaymentCallback, RawProviderCallback};
pub use checkout::{Checkout, CheckoutReceipt, CheckoutRequest, OrderStatusView};
pub use ledger::LedgerEntry;
pub use manual_retry::{ManualRetry, ManualRetryOutcome};
pub use state_machine::{Counterparties, Funding, OrderStateMachine, Step, Transition};

use thiserror::Error;

use crate::fulfillment::ProviderError;
use crate::gateway::GatewayError;
use crate::ports::StoreError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("Upstream rejected: {0}")]
    UpstreamRejected(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Insufficient balance for {username}")]
    InsufficientBalance { username: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "VALIDATION_ERROR",
            PipelineError::NotFound(_) => "NOT_FOUND",
            PipelineError::Duplicate(_) => "DUPLICATE",
            PipelineError::UpstreamTimeout(_) => "UPSTREAM_TIMEOUT",
            PipelineError::UpstreamRejected(_) => "UPSTREAM_REJECTED",
            PipelineError::InvariantViolation(_) => "INVARIANT_VIOLATION",
            PipelineError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            PipelineError::Store(_) => "STORAGE_ERROR",
        }
    }

    /// Storage failures are the only errors a callback sender should see as a 5xx.
    pub fn is_internal(&self) -> bool {
        matches!(self, PipelineError::Store(_))
    }
}

impl From<ProviderError> for PipelineError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Timeout(_) => PipelineError::UpstreamTimeout(e.to_string()),
            other => PipelineError::UpstreamRejected(other.to_string()),
        }
    }
}

impl From<GatewayError> for PipelineError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Timeout => PipelineError::UpstreamTimeout(e.to_string()),
            GatewayError::InvalidRequest(message) => PipelineError::Validation(message),
            other => PipelineError::UpstreamRejected(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_errors_map_by_kind() {
        let err: PipelineError = ProviderError::Timeout(45).into();
        assert_eq!(err.code(), "UPSTREAM_TIMEOUT");

        let err: PipelineError = GatewayError::Rejected {
            code: "400".into(),
            message: "bad amount".into(),
        }
        .into();
        assert_eq!(err.code(), "UPSTREAM_REJECTED");
    }

    #[test]
    fn test_only_storage_is_internal() {
        assert!(PipelineError::Store(StoreError::Conflict("x".into())).is_internal());
        assert!(!PipelineError::Validation("x".into()).is_internal());
        assert!(!PipelineError::Duplicate("x".into()).is_internal());
    }
}
