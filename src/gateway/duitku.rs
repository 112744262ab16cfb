use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{CreatePaymentRequest, CreatedPayment, GatewayError, GatewayPaymentState, PaymentGateway, PaymentQuery};
use crate::signing;

#[derive(Debug, Clone)]
pub struct DuitkuConfig {
    pub base_url: String,
    pub merchant_code: String,
    pub api_key: String,
    pub callback_url: String,
    pub return_url: String,
    pub expiry_minutes: u32,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InquiryRequest<'a> {
    merchant_code: &'a str,
    payment_amount: i64,
    merchant_order_id: &'a str,
    product_details: &'a str,
    payment_method: &'a str,
    signature: String,
    expiry_period: u32,
    return_url: &'a str,
    callback_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_va_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InquiryResponse {
    reference: Option<String>,
    payment_url: Option<String>,
    va_number: Option<String>,
    qr_string: Option<String>,
    status_code: Option<String>,
    status_message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusRequest<'a> {
    merchant_code: &'a str,
    merchant_order_id: &'a str,
    signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    merchant_order_id: Option<String>,
    reference: Option<String>,
    amount: Option<String>,
    status_code: Option<String>,
    status_message: Option<String>,
}

/// HTTP client for the payment gateway's merchant API.
#[derive(Clone)]
pub struct DuitkuClient {
    client: Client,
    config: DuitkuConfig,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl DuitkuClient {
    pub fn new(config: DuitkuConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(Duration::from_secs(60), Duration::from_secs(120));
        let policy = failure_policy::consecutive_failures(3, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        Self {
            client,
            config,
            circuit_breaker,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post_json(&self, url: String, payload: serde_json::Value) -> Result<(StatusCode, String), GatewayError> {
        let client = self.client.clone();
        let call = async move {
            let response = client.post(&url).json(&payload).send().await.map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::Network(e.to_string())
                }
            })?;
            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| GatewayError::Network(e.to_string()))?;
            Ok((status, text))
        };

        match self
            .circuit_breaker
            .call_with(|e: &GatewayError| e.is_outage(), call)
            .await
        {
            Ok(answer) => Ok(answer),
            Err(FailsafeError::Rejected) => Err(GatewayError::CircuitOpen(
                "payment gateway circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

fn rejected(status: StatusCode, text: &str) -> GatewayError {
    GatewayError::Rejected {
        code: status.as_u16().to_string(),
        message: text.chars().take(200).collect(),
    }
}

#[async_trait]
impl PaymentGateway for DuitkuClient {
    async fn create_payment(&self, request: &CreatePaymentRequest) -> Result<CreatedPayment, GatewayError> {
        if request.amount.with_scale(0) != request.amount {
            return Err(GatewayError::InvalidRequest(format!(
                "amount {} is not a whole number",
                request.amount
            )));
        }
        let amount = signing::format_amount(&request.amount);
        let payment_amount: i64 = amount
            .parse()
            .map_err(|_| GatewayError::InvalidRequest(format!("amount {} is out of range", amount)))?;

        let body = InquiryRequest {
            merchant_code: &self.config.merchant_code,
            payment_amount,
            merchant_order_id: &request.merchant_order_id,
            product_details: &request.product_details,
            payment_method: &request.payment_method,
            signature: signing::gateway_request_signature(
                &self.config.merchant_code,
                &request.merchant_order_id,
                &amount,
                &self.config.api_key,
            ),
            expiry_period: self.config.expiry_minutes,
            return_url: &self.config.return_url,
            callback_url: &self.config.callback_url,
            customer_va_name: request.customer_name.as_deref(),
            email: request.email.as_deref(),
        };
        let payload = serde_json::to_value(&body).map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

        tracing::info!(order_id = %request.merchant_order_id, method = %request.payment_method, "Creating gateway payment");
        let (status, text) = self.post_json(self.url("/webapi/api/merchant/v2/inquiry"), payload).await?;
        if !status.is_success() {
            return Err(rejected(status, &text));
        }

        let raw: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;
        let parsed: InquiryResponse =
            serde_json::from_value(raw.clone()).map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

        if parsed.status_code.as_deref() != Some("00") {
            return Err(GatewayError::Rejected {
                code: parsed.status_code.unwrap_or_default(),
                message: parsed.status_message.unwrap_or_default(),
            });
        }

        let reference = parsed
            .reference
            .filter(|r| !r.is_empty())
            .ok_or_else(|| GatewayError::MalformedResponse("missing reference".to_string()))?;
        let payment_number = parsed
            .va_number
            .filter(|v| !v.is_empty())
            .or(parsed.qr_string.filter(|q| !q.is_empty()));

        Ok(CreatedPayment {
            reference,
            payment_url: parsed.payment_url,
            payment_number,
            raw,
        })
    }

    async fn query_payment(&self, merchant_order_id: &str) -> Result<PaymentQuery, GatewayError> {
        let body = StatusRequest {
            merchant_code: &self.config.merchant_code,
            merchant_order_id,
            signature: signing::gateway_status_signature(
                &self.config.merchant_code,
                merchant_order_id,
                &self.config.api_key,
            ),
        };
        let payload = serde_json::to_value(&body).map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

        let (status, text) = self
            .post_json(self.url("/webapi/api/merchant/transactionStatus"), payload)
            .await?;
        if !status.is_success() {
            return Err(rejected(status, &text));
        }

        let parsed: StatusResponse =
            serde_json::from_str(&text).map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;
        let code = parsed
            .status_code
            .ok_or_else(|| GatewayError::MalformedResponse("missing statusCode".to_string()))?;

        Ok(PaymentQuery {
            merchant_order_id: parsed
                .merchant_order_id
                .unwrap_or_else(|| merchant_order_id.to_string()),
            reference: parsed.reference,
            amount: parsed.amount.and_then(|a| a.parse().ok()),
            state: GatewayPaymentState::from_code(&code),
            message: parsed.status_message.unwrap_or_default(),
        })
    }

    fn verify_callback(&self, merchant_code: &str, amount: &str, merchant_order_id: &str, signature: &str) -> bool {
        if merchant_code != self.config.merchant_code {
            return false;
        }
        let expected = signing::gateway_callback_signature(merchant_code, amount, merchant_order_id, &self.config.api_key);
        signing::digest_eq(&expected, signature)
    }

    fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DuitkuConfig {
        DuitkuConfig {
            base_url: "https://sandbox.duitku.com/".to_string(),
            merchant_code: "D0001".to_string(),
            api_key: "apikey".to_string(),
            callback_url: "https://vazz.test/callback/payment".to_string(),
            return_url: "https://vazz.test/orders".to_string(),
            expiry_minutes: 60,
            timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_url_building() {
        let client = DuitkuClient::new(config());
        assert_eq!(
            client.url("/webapi/api/merchant/v2/inquiry"),
            "https://sandbox.duitku.com/webapi/api/merchant/v2/inquiry"
        );
    }

    #[test]
    fn test_verify_callback() {
        let client = DuitkuClient::new(config());
        let signature = signing::gateway_callback_signature("D0001", "10000", "VAZZ123", "apikey");

        assert!(client.verify_callback("D0001", "10000", "VAZZ123", &signature));
        assert!(!client.verify_callback("D0001", "10001", "VAZZ123", &signature));
        assert!(!client.verify_callback("D9999", "10000", "VAZZ123", &signature));
    }

    #[test]
    fn test_state_from_code() {
        assert_eq!(GatewayPaymentState::from_code("00"), GatewayPaymentState::Paid);
        assert_eq!(GatewayPaymentState::from_code("01"), GatewayPaymentState::Pending);
        assert_eq!(GatewayPaymentState::from_code("02"), GatewayPaymentState::Cancelled);
    }
}
