use async_trait::async_trait;
use bigdecimal::BigDecimal;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use super::{ForwardReceipt, ForwardRequest, FulfillmentProvider, ProviderError, ProviderStatus};
use crate::signing;

/// Provider timeout observed in production; a slower answer is treated as a failure.
pub const DEFAULT_TIMEOUT_SECS: u64 = 45;

#[derive(Debug, Clone)]
pub struct DigiflazzConfig {
    pub base_url: String,
    pub username: String,
    pub api_key: String,
    pub callback_url: Option<String>,
    pub timeout: Duration,
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
}

impl DigiflazzConfig {
    pub fn new(base_url: String, username: String, api_key: String) -> Self {
        Self {
            base_url,
            username,
            api_key,
            callback_url: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            failure_threshold: 5,
            reset_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Serialize)]
struct TransactionRequest<'a> {
    username: &'a str,
    buyer_sku_code: &'a str,
    customer_no: String,
    ref_id: &'a str,
    sign: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cb_url: Option<&'a str>,
}

/// HTTP client for the top-up provider's transaction API.
#[derive(Clone)]
pub struct DigiflazzClient {
    client: Client,
    config: DigiflazzConfig,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl DigiflazzClient {
    pub fn new(config: DigiflazzConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(config.reset_timeout_secs),
            Duration::from_secs(config.reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(config.failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        Self {
            client,
            config,
            circuit_breaker,
        }
    }

    fn transaction_url(&self) -> String {
        format!("{}/v1/transaction", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl FulfillmentProvider for DigiflazzClient {
    async fn forward(&self, request: &ForwardRequest) -> Result<ForwardReceipt, ProviderError> {
        let body = TransactionRequest {
            username: &self.config.username,
            buyer_sku_code: &request.product_code,
            customer_no: request.customer_no(),
            ref_id: &request.reference,
            sign: signing::provider_sign(&self.config.username, &self.config.api_key, &request.reference),
            cb_url: self.config.callback_url.as_deref(),
        };
        let payload = serde_json::to_value(&body)
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        let client = self.client.clone();
        let url = self.transaction_url();
        let deadline = self.config.timeout;

        tracing::info!(
            reference = %request.reference,
            product_code = %request.product_code,
            "Forwarding order to fulfillment provider"
        );

        let call = async move {
            let send = async {
                let response = client.post(&url).json(&payload).send().await?;
                let status = response.status();
                let text = response.text().await?;
                Ok::<_, reqwest::Error>((status, text))
            };

            match tokio::time::timeout(deadline, send).await {
                Err(_) => Err(ProviderError::Timeout(deadline.as_secs())),
                Ok(Err(e)) if e.is_timeout() => Err(ProviderError::Timeout(deadline.as_secs())),
                Ok(Err(e)) => Err(ProviderError::Network(e.to_string())),
                Ok(Ok((status, text))) => parse_transaction_response(status, &text),
            }
        };

        let result = self
            .circuit_breaker
            .call_with(|e: &ProviderError| e.is_outage(), call)
            .await;

        match result {
            Ok(receipt) => Ok(receipt),
            Err(FailsafeError::Rejected) => Err(ProviderError::CircuitOpen(
                "fulfillment provider circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => {
                tracing::warn!(reference = %request.reference, error = %e, "Provider call failed");
                Err(e)
            }
        }
    }

    fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }
}

fn decimal_field(value: &Value) -> Option<BigDecimal> {
    match value {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn string_field(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Maps a raw provider answer onto the typed result.
pub fn parse_transaction_response(status: StatusCode, text: &str) -> Result<ForwardReceipt, ProviderError> {
    let raw: Value = serde_json::from_str(text)
        .map_err(|e| ProviderError::MalformedResponse(format!("HTTP {}: {}", status.as_u16(), e)))?;

    let data = raw
        .get("data")
        .filter(|d| d.is_object())
        .ok_or_else(|| ProviderError::MalformedResponse("missing data object".to_string()))?;

    let message = data.get("message").and_then(string_field).unwrap_or_default();
    let provider_status = data
        .get("status")
        .and_then(Value::as_str)
        .map(ProviderStatus::parse)
        .ok_or_else(|| ProviderError::MalformedResponse("missing status".to_string()))?;

    if provider_status == ProviderStatus::Failed || !status.is_success() {
        let code = data
            .get("rc")
            .and_then(string_field)
            .unwrap_or_else(|| status.as_u16().to_string());
        return Err(ProviderError::Rejected { code, message });
    }

    let provider_ref = data
        .get("ref_id")
        .and_then(string_field)
        .ok_or_else(|| ProviderError::MalformedResponse("missing ref_id".to_string()))?;
    let cost = data
        .get("price")
        .and_then(decimal_field)
        .ok_or_else(|| ProviderError::MalformedResponse("missing price".to_string()))?;
    let serial_number = data.get("sn").and_then(string_field);

    Ok(ForwardReceipt {
        provider_ref,
        cost,
        status: provider_status,
        serial_number,
        message,
        raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = DigiflazzClient::new(DigiflazzConfig::new(
            "https://api.digiflazz.com/".to_string(),
            "vazz".to_string(),
            "key".to_string(),
        ));
        assert_eq!(client.transaction_url(), "https://api.digiflazz.com/v1/transaction");
        assert_eq!(client.circuit_state(), "closed");
    }

    #[test]
    fn test_parse_pending_response() {
        let body = r#"{"data":{"ref_id":"VAZZ1","customer_no":"123","buyer_sku_code":"ML86",
            "message":"Transaksi Pending","status":"Pending","rc":"03","sn":"","price":19500}}"#;
        let receipt = parse_transaction_response(StatusCode::OK, body).unwrap();
        assert_eq!(receipt.provider_ref, "VAZZ1");
        assert_eq!(receipt.cost, BigDecimal::from(19500));
        assert_eq!(receipt.status, ProviderStatus::Pending);
        assert_eq!(receipt.serial_number, None);
    }

    #[test]
    fn test_parse_rejected_response() {
        let body = r#"{"data":{"ref_id":"VAZZ1","status":"Gagal","rc":"44","message":"Saldo tidak cukup"}}"#;
        let err = parse_transaction_response(StatusCode::BAD_REQUEST, body).unwrap_err();
        assert_eq!(
            err,
            ProviderError::Rejected {
                code: "44".to_string(),
                message: "Saldo tidak cukup".to_string()
            }
        );
    }

    #[test]
    fn test_parse_malformed_response() {
        assert!(matches!(
            parse_transaction_response(StatusCode::OK, "<html>bad gateway</html>"),
            Err(ProviderError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_transaction_response(StatusCode::OK, r#"{"data":{"status":"Pending"}}"#),
            Err(ProviderError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_non_success_http_with_pending_body_is_rejected() {
        let body = r#"{"data":{"ref_id":"VAZZ1","status":"Pending","price":100}}"#;
        assert!(matches!(
            parse_transaction_response(StatusCode::INTERNAL_SERVER_ERROR, body),
            Err(ProviderError::Rejected { .. })
        ));
    }
}
