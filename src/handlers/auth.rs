use axum::{
    async_trait,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::signing::{self, SignatureError};
use crate::AppState;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature";

/// Largest provider webhook body read for verification.
pub const MAX_WEBHOOK_BODY: usize = 64 * 1024;

/// Raw provider webhook body, checked against `X-Hub-Signature` when a webhook
/// secret is configured.
pub struct VerifiedProviderWebhook {
    pub body: Vec<u8>,
}

#[async_trait]
impl FromRequest<AppState> for VerifiedProviderWebhook {
    type Rejection = AuthError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let signature = req
            .headers()
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = axum::body::to_bytes(req.into_body(), MAX_WEBHOOK_BODY)
            .await
            .map_err(|_| AuthError::BodyReadError)?
            .to_vec();

        if let Some(secret) = state.provider_webhook_secret.as_deref() {
            let signature = signature.ok_or(AuthError::MissingSignature)?;
            signing::verify_hub_signature(secret, &body, &signature)?;
        }

        Ok(VerifiedProviderWebhook { body })
    }
}

#[derive(Debug)]
pub enum AuthError {
    MissingSignature,
    InvalidSignatureFormat,
    InvalidSecret,
    SignatureMismatch,
    BodyReadError,
}

impl From<SignatureError> for AuthError {
    fn from(e: SignatureError) -> Self {
        match e {
            SignatureError::InvalidFormat => AuthError::InvalidSignatureFormat,
            SignatureError::InvalidSecret => AuthError::InvalidSecret,
            SignatureError::Mismatch => AuthError::SignatureMismatch,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingSignature => (StatusCode::UNAUTHORIZED, "Missing X-Hub-Signature header"),
            AuthError::InvalidSignatureFormat => (StatusCode::BAD_REQUEST, "Invalid signature format"),
            AuthError::InvalidSecret => (StatusCode::INTERNAL_SERVER_ERROR, "Invalid webhook secret configuration"),
            AuthError::SignatureMismatch => (StatusCode::UNAUTHORIZED, "Signature verification failed"),
            AuthError::BodyReadError => (StatusCode::BAD_REQUEST, "Failed to read request body"),
        };

        tracing::warn!(status = status.as_u16(), "Provider webhook rejected: {}", message);
        (status, Json(json!({ "success": false, "message": message, "data": null }))).into_response()
    }
}
