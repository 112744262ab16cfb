use axum::{
    async_trait,
    extract::{FromRequest, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};

use super::auth::VerifiedProviderWebhook;
use crate::services::callback::CallbackOutcome;
use crate::services::{CallbackResult, PipelineError, RawPaymentCallback, RawProviderCallback};
use crate::AppState;

fn undecodable(message: String) -> Response {
    tracing::warn!("Undecodable callback body: {}", message);
    let body = CallbackResult {
        success: false,
        message: format!("Undecodable callback body: {}", message),
        data: None,
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

fn envelope(result: &Result<CallbackOutcome, PipelineError>) -> Response {
    let status = match result {
        Err(e) if e.is_internal() => {
            tracing::error!(error = %e, "Callback failed on storage");
            StatusCode::INTERNAL_SERVER_ERROR
        }
        Err(e) => {
            tracing::info!(code = e.code(), error = %e, "Callback not applied");
            StatusCode::OK
        }
        Ok(_) => StatusCode::OK,
    };
    (status, Json(CallbackResult::from(result))).into_response()
}

/// Gateway callback decoded from JSON or from a form-encoded body, chosen by content type.
pub struct PaymentCallbackBody(pub RawPaymentCallback);

#[async_trait]
impl<S> FromRequest<S> for PaymentCallbackBody
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.trim_start().starts_with("application/json"))
            .unwrap_or(false);

        let decoded = if is_json {
            Json::<RawPaymentCallback>::from_request(req, state)
                .await
                .map(|Json(payload)| payload)
                .map_err(|e| e.body_text())
        } else {
            Form::<RawPaymentCallback>::from_request(req, state)
                .await
                .map(|Form(payload)| payload)
                .map_err(|e| e.body_text())
        };

        decoded.map(PaymentCallbackBody).map_err(undecodable)
    }
}

pub async fn payment_callback(
    State(state): State<AppState>,
    PaymentCallbackBody(payload): PaymentCallbackBody,
) -> Response {
    let result = state.callbacks.process_payment_callback(payload).await;
    envelope(&result)
}

pub async fn provider_callback(State(state): State<AppState>, webhook: VerifiedProviderWebhook) -> Response {
    let payload: RawProviderCallback = match serde_json::from_slice(&webhook.body) {
        Ok(payload) => payload,
        Err(e) => return undecodable(e.to_string()),
    };
    let result = state.callbacks.process_provider_callback(payload).await;
    envelope(&result)
}
