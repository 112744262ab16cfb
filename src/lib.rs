pub mod adapters;
pub mod audit;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod fulfillment;
pub mod gateway;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod ports;
pub mod services;
pub mod signing;
pub mod startup;
pub mod utils;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::health::DependencyChecker;
use crate::middleware::request_logger::{request_logger_middleware, RequestLogConfig};
use crate::services::{BalancePayment, CallbackPipeline, Checkout};

#[derive(Clone)]
pub struct AppState {
    pub callbacks: Arc<CallbackPipeline>,
    pub checkout: Arc<Checkout>,
    pub balance_payment: Arc<BalancePayment>,
    pub health_checkers: Arc<Vec<Arc<dyn DependencyChecker>>>,
    pub provider_webhook_secret: Option<String>,
    pub started_at: Instant,
}

pub fn create_app(state: AppState, log_config: RequestLogConfig) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/callback/payment", post(handlers::webhook::payment_callback))
        .route("/callback/provider", post(handlers::webhook::provider_callback))
        .route("/orders", post(handlers::orders::create_order))
        .route("/orders/balance", post(handlers::orders::pay_with_balance))
        .route("/orders/:order_id", get(handlers::orders::order_status))
        .layer(axum::middleware::from_fn_with_state(log_config, request_logger_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
