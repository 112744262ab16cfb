use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::error::AppError;
use crate::services::{BalancePaymentRequest, CheckoutRequest};
use crate::AppState;

pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    let receipt = state.checkout.create_order(request).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

pub async fn pay_with_balance(
    State(state): State<AppState>,
    Json(request): Json<BalancePaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let receipt = state.balance_payment.pay_with_balance(request).await?;
    Ok(Json(receipt))
}

pub async fn order_status(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let view = state.checkout.order_status(&order_id).await?;
    Ok(Json(view))
}
