#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vazz_fulfillment::adapters::MemoryStore;
use vazz_fulfillment::audit::{AuditEntry, AuditSink};
use vazz_fulfillment::config::{Config, LogFormat};
use vazz_fulfillment::domain::{Deposit, Order, Payment, TransactionKind};
use vazz_fulfillment::fulfillment::{
    ForwardReceipt, ForwardRequest, FulfillmentProvider, ProviderError, ProviderStatus,
};
use vazz_fulfillment::gateway::{
    CreatePaymentRequest, CreatedPayment, GatewayError, GatewayPaymentState, PaymentGateway, PaymentQuery,
};
use vazz_fulfillment::ports::Store;
use vazz_fulfillment::services::{Counterparties, RawPaymentCallback, RawProviderCallback};
use vazz_fulfillment::signing;
use vazz_fulfillment::startup::Components;

pub const MERCHANT_CODE: &str = "D0001";
pub const GATEWAY_KEY: &str = "gateway-key";

pub fn dec(value: i64) -> BigDecimal {
    BigDecimal::from(value)
}

/// Provider double that answers from a script and counts every call.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ForwardReceipt, ProviderError>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<ForwardRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<ForwardReceipt, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            delay: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Accepts every request with the given cost, echoing the reference back.
    pub fn accepting(cost: i64) -> Self {
        Self::new((0..16).map(|_| Ok(receipt("", cost))).collect())
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ForwardRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl FulfillmentProvider for ScriptedProvider {
    async fn forward(&self, request: &ForwardRequest) -> Result<ForwardReceipt, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Network("script exhausted".into())));

        // An empty provider_ref echoes the reference the caller sent.
        next.map(|mut receipt| {
            if receipt.provider_ref.is_empty() {
                receipt.provider_ref = request.reference.clone();
            }
            receipt
        })
    }
}

pub fn receipt(provider_ref: &str, cost: i64) -> ForwardReceipt {
    ForwardReceipt {
        provider_ref: provider_ref.to_string(),
        cost: dec(cost),
        status: ProviderStatus::Pending,
        serial_number: None,
        message: "Transaksi Pending".to_string(),
        raw: json!({ "data": { "ref_id": provider_ref, "status": "Pending", "price": cost } }),
    }
}

pub fn rejected(code: &str, message: &str) -> ProviderError {
    ProviderError::Rejected {
        code: code.to_string(),
        message: message.to_string(),
    }
}

/// Gateway double that signs with [`GATEWAY_KEY`] the way the real gateway does.
#[derive(Default)]
pub struct FakeGateway {
    pub created: Mutex<Vec<CreatePaymentRequest>>,
    pub fail_with: Mutex<Option<GatewayError>>,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_payment(&self, request: &CreatePaymentRequest) -> Result<CreatedPayment, GatewayError> {
        if let Some(e) = self.fail_with.lock().unwrap().clone() {
            return Err(e);
        }
        self.created.lock().unwrap().push(request.clone());
        Ok(CreatedPayment {
            reference: format!("DS-{}", request.merchant_order_id),
            payment_url: Some(format!("https://pay.example/{}", request.merchant_order_id)),
            payment_number: Some("8808123456".to_string()),
            raw: json!({ "statusCode": "00" }),
        })
    }

    async fn query_payment(&self, merchant_order_id: &str) -> Result<PaymentQuery, GatewayError> {
        Ok(PaymentQuery {
            merchant_order_id: merchant_order_id.to_string(),
            reference: None,
            amount: None,
            state: GatewayPaymentState::Pending,
            message: "PENDING".to_string(),
        })
    }

    fn verify_callback(&self, merchant_code: &str, amount: &str, merchant_order_id: &str, signature: &str) -> bool {
        merchant_code == MERCHANT_CODE
            && signing::digest_eq(
                &signing::gateway_callback_signature(merchant_code, amount, merchant_order_id, GATEWAY_KEY),
                signature,
            )
    }
}

#[derive(Default)]
pub struct RecordingAuditSink {
    pub entries: Mutex<Vec<AuditEntry>>,
}

impl RecordingAuditSink {
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, entry: AuditEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}

pub fn test_config() -> Config {
    Config {
        server_port: 0,
        database_url: "postgres://localhost/vazz_test".to_string(),
        database_max_connections: 1,
        log_format: LogFormat::Text,
        log_request_body: false,
        provider_base_url: "http://provider.invalid".to_string(),
        provider_username: "vazz".to_string(),
        provider_api_key: "provider-key".to_string(),
        provider_callback_url: None,
        provider_timeout_secs: 1,
        provider_webhook_secret: None,
        gateway_base_url: "http://gateway.invalid".to_string(),
        gateway_merchant_code: MERCHANT_CODE.to_string(),
        gateway_api_key: GATEWAY_KEY.to_string(),
        gateway_callback_url: "https://vazz.example/callback/payment".to_string(),
        gateway_return_url: "https://vazz.example/done".to_string(),
        gateway_expiry_minutes: 60,
        counterparties: Counterparties::default(),
        order_id_prefix: "VAZZ".to_string(),
    }
}

pub struct Harness {
    pub store: MemoryStore,
    pub provider: Arc<ScriptedProvider>,
    pub gateway: Arc<FakeGateway>,
    pub audit: Arc<RecordingAuditSink>,
    pub components: Components,
}

impl Harness {
    pub fn new(provider: ScriptedProvider) -> Self {
        Self::with_config(provider, &test_config())
    }

    pub fn with_config(provider: ScriptedProvider, config: &Config) -> Self {
        let store = MemoryStore::new();
        let provider = Arc::new(provider);
        let gateway = Arc::new(FakeGateway::default());
        let audit = Arc::new(RecordingAuditSink::default());
        let components = Components::assemble(
            Arc::new(store.clone()) as Arc<dyn Store>,
            provider.clone(),
            gateway.clone(),
            audit.clone(),
            config,
        );
        Self {
            store,
            provider,
            gateway,
            audit,
            components,
        }
    }

    /// Inserts a PENDING order with its gateway payment.
    pub async fn seed_order(&self, order: Order, fee: i64) {
        let total = &order.price + dec(fee);
        let payment = Payment::new(order.order_id.clone(), "BC".to_string(), dec(fee), total);
        let mut uow = self.store.begin().await.unwrap();
        uow.insert_order(&order).await.unwrap();
        uow.insert_payment(&payment).await.unwrap();
        if order.kind == TransactionKind::Deposit {
            let username = order.username.clone().unwrap();
            uow.insert_deposit(&Deposit::new(order.order_id.clone(), username, order.price.clone()))
                .await
                .unwrap();
        }
        uow.commit().await.unwrap();
    }

    pub async fn seed_topup(&self, order_id: &str, price: i64, username: Option<&str>) {
        let order = Order::new(
            order_id.to_string(),
            TransactionKind::Topup,
            dec(price),
            username.map(str::to_string),
        )
        .with_product("ML86".to_string(), "123456".to_string(), Some("2001".to_string()));
        self.seed_order(order, 0).await;
    }

    pub async fn order(&self, order_id: &str) -> Order {
        self.store.snapshot().await.orders[order_id].clone()
    }

    pub async fn balance_of(&self, username: &str) -> BigDecimal {
        self.store.snapshot().await.users[username].balance.clone()
    }
}

/// A correctly signed PAID callback for `order_id` and `amount`.
pub fn paid_callback(order_id: &str, amount: i64) -> RawPaymentCallback {
    signed_callback(order_id, amount, "00")
}

pub fn signed_callback(order_id: &str, amount: i64, result_code: &str) -> RawPaymentCallback {
    let amount_text = amount.to_string();
    let signature = signing::gateway_callback_signature(MERCHANT_CODE, &amount_text, order_id, GATEWAY_KEY);
    RawPaymentCallback {
        merchant_code: Some(MERCHANT_CODE.to_string()),
        amount: Some(json!(amount_text)),
        ref_id: Some(format!("DS-{}", order_id)),
        merchant_order_id: Some(order_id.to_string()),
        result_code: Some(result_code.to_string()),
        signature: Some(signature),
    }
}

/// Provider delivery report for `ref_id`.
pub fn provider_report(ref_id: &str, status: &str, sn: &str) -> RawProviderCallback {
    serde_json::from_value(json!({
        "data": {
            "ref_id": ref_id,
            "buyer_sku_code": "ML86",
            "customer_no": "1234562001",
            "status": status,
            "message": "Transaksi selesai",
            "sn": sn,
            "rc": "00"
        }
    }))
    .unwrap()
}
