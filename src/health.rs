use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::fulfillment::FulfillmentProvider;
use crate::gateway::PaymentGateway;
use crate::ports::Store;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: HashMap<String, DependencyStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyStatus {
    Healthy { status: String, latency_ms: u64 },
    Unhealthy { status: String, error: String },
}

#[async_trait]
pub trait DependencyChecker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Critical dependencies make the whole service unhealthy when they fail.
    fn critical(&self) -> bool {
        false
    }

    async fn check(&self) -> DependencyStatus;
}

pub struct StoreChecker {
    store: Arc<dyn Store>,
}

impl StoreChecker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DependencyChecker for StoreChecker {
    fn name(&self) -> &'static str {
        "database"
    }

    fn critical(&self) -> bool {
        true
    }

    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match self.store.ping().await {
            Ok(_) => DependencyStatus::Healthy {
                status: "healthy".to_string(),
                latency_ms: start.elapsed().as_millis() as u64,
            },
            Err(e) => DependencyStatus::Unhealthy {
                status: "unhealthy".to_string(),
                error: e.to_string(),
            },
        }
    }
}

fn circuit_status(state: String) -> DependencyStatus {
    if state == "closed" {
        DependencyStatus::Healthy {
            status: "closed".to_string(),
            latency_ms: 0,
        }
    } else {
        DependencyStatus::Unhealthy {
            status: state,
            error: "circuit breaker open".to_string(),
        }
    }
}

/// Reports the provider client's circuit breaker without calling the provider.
pub struct ProviderCircuitChecker {
    provider: Arc<dyn FulfillmentProvider>,
}

impl ProviderCircuitChecker {
    pub fn new(provider: Arc<dyn FulfillmentProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl DependencyChecker for ProviderCircuitChecker {
    fn name(&self) -> &'static str {
        "fulfillment_provider"
    }

    async fn check(&self) -> DependencyStatus {
        circuit_status(self.provider.circuit_state())
    }
}

pub struct GatewayCircuitChecker {
    gateway: Arc<dyn PaymentGateway>,
}

impl GatewayCircuitChecker {
    pub fn new(gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl DependencyChecker for GatewayCircuitChecker {
    fn name(&self) -> &'static str {
        "payment_gateway"
    }

    async fn check(&self) -> DependencyStatus {
        circuit_status(self.gateway.circuit_state())
    }
}

pub async fn check_health(checkers: &[Arc<dyn DependencyChecker>], start_time: Instant) -> HealthResponse {
    let timeout_duration = Duration::from_secs(5);
    let mut dependencies = HashMap::new();
    let mut has_critical_failure = false;
    let mut has_non_critical_failure = false;

    for checker in checkers {
        let status = timeout(timeout_duration, checker.check())
            .await
            .unwrap_or_else(|_| DependencyStatus::Unhealthy {
                status: "unhealthy".to_string(),
                error: "timeout".to_string(),
            });

        if matches!(status, DependencyStatus::Unhealthy { .. }) {
            if checker.critical() {
                has_critical_failure = true;
            } else {
                has_non_critical_failure = true;
            }
        }
        dependencies.insert(checker.name().to_string(), status);
    }

    let status = if has_critical_failure {
        "unhealthy"
    } else if has_non_critical_failure {
        "degraded"
    } else {
        "healthy"
    };

    HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: start_time.elapsed().as_secs(),
        dependencies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;

    struct Failing;

    #[async_trait]
    impl DependencyChecker for Failing {
        fn name(&self) -> &'static str {
            "payment_gateway"
        }

        async fn check(&self) -> DependencyStatus {
            circuit_status("open".to_string())
        }
    }

    #[tokio::test]
    async fn test_healthy_store_is_healthy() {
        let checkers: Vec<Arc<dyn DependencyChecker>> = vec![Arc::new(StoreChecker::new(Arc::new(MemoryStore::new())))];
        let response = check_health(&checkers, Instant::now()).await;
        assert_eq!(response.status, "healthy");
        assert!(response.dependencies.contains_key("database"));
    }

    #[tokio::test]
    async fn test_open_circuit_degrades() {
        let checkers: Vec<Arc<dyn DependencyChecker>> = vec![
            Arc::new(StoreChecker::new(Arc::new(MemoryStore::new()))),
            Arc::new(Failing),
        ];
        let response = check_health(&checkers, Instant::now()).await;
        assert_eq!(response.status, "degraded");
    }
}
