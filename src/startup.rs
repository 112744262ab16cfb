//! Builds every long-lived component once, at process start, and hands each one its
//! collaborators.

use sqlx::PgPool;
use std::sync::Arc;
use std::time::Instant;

use crate::adapters::PostgresStore;
use crate::audit::{AuditSink, PgAuditSink};
use crate::config::Config;
use crate::fulfillment::{DigiflazzClient, FulfillmentProvider};
use crate::gateway::{DuitkuClient, PaymentGateway};
use crate::health::{DependencyChecker, GatewayCircuitChecker, ProviderCircuitChecker, StoreChecker};
use crate::ports::Store;
use crate::services::{BalancePayment, CallbackPipeline, Checkout, ManualRetry, OrderStateMachine};
use crate::AppState;

pub struct Components {
    pub store: Arc<dyn Store>,
    pub provider: Arc<dyn FulfillmentProvider>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub audit: Arc<dyn AuditSink>,
    pub machine: Arc<OrderStateMachine>,
    pub callbacks: Arc<CallbackPipeline>,
    pub checkout: Arc<Checkout>,
    pub balance_payment: Arc<BalancePayment>,
    pub manual_retry: Arc<ManualRetry>,
}

impl Components {
    /// Wires the services around explicit adapters. Tests pass in-memory stores and
    /// scripted upstreams here.
    pub fn assemble(
        store: Arc<dyn Store>,
        provider: Arc<dyn FulfillmentProvider>,
        gateway: Arc<dyn PaymentGateway>,
        audit: Arc<dyn AuditSink>,
        config: &Config,
    ) -> Self {
        let machine = Arc::new(OrderStateMachine::new(provider.clone(), config.counterparties.clone()));
        let callbacks = Arc::new(CallbackPipeline::new(
            store.clone(),
            gateway.clone(),
            machine.clone(),
            audit.clone(),
        ));
        let checkout = Arc::new(Checkout::new(
            store.clone(),
            gateway.clone(),
            audit.clone(),
            config.order_id_prefix.clone(),
        ));
        let balance_payment = Arc::new(BalancePayment::new(
            store.clone(),
            machine.clone(),
            audit.clone(),
            config.order_id_prefix.clone(),
        ));
        let manual_retry = Arc::new(ManualRetry::new(store.clone(), machine.clone(), audit.clone()));

        Self {
            store,
            provider,
            gateway,
            audit,
            machine,
            callbacks,
            checkout,
            balance_payment,
            manual_retry,
        }
    }

    /// Production wiring: Postgres storage and audit, real upstream clients.
    pub fn build(config: &Config, pool: PgPool) -> Self {
        let store: Arc<dyn Store> = Arc::new(PostgresStore::new(pool.clone()));
        let provider: Arc<dyn FulfillmentProvider> = Arc::new(DigiflazzClient::new(config.provider_config()));
        let gateway: Arc<dyn PaymentGateway> = Arc::new(DuitkuClient::new(config.gateway_config()));
        let audit: Arc<dyn AuditSink> = Arc::new(PgAuditSink::new(pool));

        tracing::info!(
            provider_url = %config.provider_base_url,
            gateway_url = %config.gateway_base_url,
            "Upstream clients initialized"
        );
        Self::assemble(store, provider, gateway, audit, config)
    }

    pub fn app_state(&self, config: &Config) -> AppState {
        let checkers: Vec<Arc<dyn DependencyChecker>> = vec![
            Arc::new(StoreChecker::new(self.store.clone())),
            Arc::new(ProviderCircuitChecker::new(self.provider.clone())),
            Arc::new(GatewayCircuitChecker::new(self.gateway.clone())),
        ];

        AppState {
            callbacks: self.callbacks.clone(),
            checkout: self.checkout.clone(),
            balance_payment: self.balance_payment.clone(),
            health_checkers: Arc::new(checkers),
            provider_webhook_secret: config.provider_webhook_secret.clone(),
            started_at: Instant::now(),
        }
    }
}
