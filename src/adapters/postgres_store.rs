//! Postgres implementation of the storage ports.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction as SqlxTransaction};
use uuid::Uuid;

use crate::domain::{
    BalanceHistory, Deposit, ManualTransaction, MembershipTier, Order, Payment, PlatformBalance, User,
};
use crate::ports::{Store, StoreResult, UnitOfWork};

/// Postgres-backed store. Every unit of work is a SERIALIZABLE transaction.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

struct PgUnitOfWork {
    tx: SqlxTransaction<'static, Postgres>,
}

const ORDER_COLUMNS: &str = "id, order_id, reference_id, transaction_kind, status, price, purchase_price, \
     profit_amount, username, product_code, buyer_id, server_id, serial_number, log, \
     success_report_sent, created_at, updated_at";

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn order_for_update(&mut self, order_id: &str) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE order_id = $1 FOR UPDATE",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(OrderRow::into_domain).transpose()
    }

    async fn order_by_reference_for_update(&mut self, reference_id: &str) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE reference_id = $1 FOR UPDATE",
            ORDER_COLUMNS
        ))
        .bind(reference_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(OrderRow::into_domain).transpose()
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_id, reference_id, transaction_kind, status, price, purchase_price,
                profit_amount, username, product_code, buyer_id, server_id, serial_number, log,
                success_report_sent, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(order.id)
        .bind(&order.order_id)
        .bind(&order.reference_id)
        .bind(order.kind.as_str())
        .bind(order.status.as_str())
        .bind(&order.price)
        .bind(&order.purchase_price)
        .bind(&order.profit_amount)
        .bind(&order.username)
        .bind(&order.product_code)
        .bind(&order.buyer_id)
        .bind(&order.server_id)
        .bind(&order.serial_number)
        .bind(&order.log)
        .bind(order.success_report_sent)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_order(&mut self, order: &Order) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE orders SET
                reference_id = $2, status = $3, purchase_price = $4, profit_amount = $5,
                serial_number = $6, log = $7, success_report_sent = $8, updated_at = $9
            WHERE order_id = $1
            "#,
        )
        .bind(&order.order_id)
        .bind(&order.reference_id)
        .bind(order.status.as_str())
        .bind(&order.purchase_price)
        .bind(&order.profit_amount)
        .bind(&order.serial_number)
        .bind(&order.log)
        .bind(order.success_report_sent)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn payment_for_update(&mut self, order_id: &str) -> StoreResult<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT id, order_id, status, method, fee_amount, total_amount, payment_number,
                   reference, payment_url, created_at, updated_at
            FROM payments WHERE order_id = $1 FOR UPDATE
            "#,
        )
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(PaymentRow::into_domain).transpose()
    }

    async fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                id, order_id, status, method, fee_amount, total_amount, payment_number,
                reference, payment_url, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(payment.id)
        .bind(&payment.order_id)
        .bind(payment.status.as_str())
        .bind(&payment.method)
        .bind(&payment.fee_amount)
        .bind(&payment.total_amount)
        .bind(&payment.payment_number)
        .bind(&payment.reference)
        .bind(&payment.payment_url)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        sqlx::query(
            "UPDATE payments SET status = $2, reference = $3, updated_at = $4 WHERE order_id = $1",
        )
        .bind(&payment.order_id)
        .bind(payment.status.as_str())
        .bind(&payment.reference)
        .bind(payment.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn deposit_for_update(&mut self, order_id: &str) -> StoreResult<Option<Deposit>> {
        let row = sqlx::query_as::<_, DepositRow>(
            "SELECT id, order_id, username, amount, status, created_at, updated_at \
             FROM deposits WHERE order_id = $1 FOR UPDATE",
        )
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(DepositRow::into_domain).transpose()
    }

    async fn insert_deposit(&mut self, deposit: &Deposit) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO deposits (id, order_id, username, amount, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(deposit.id)
        .bind(&deposit.order_id)
        .bind(&deposit.username)
        .bind(&deposit.amount)
        .bind(deposit.status.as_str())
        .bind(deposit.created_at)
        .bind(deposit.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_deposit(&mut self, deposit: &Deposit) -> StoreResult<()> {
        sqlx::query("UPDATE deposits SET status = $2, updated_at = $3 WHERE order_id = $1")
            .bind(&deposit.order_id)
            .bind(deposit.status.as_str())
            .bind(deposit.updated_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn user(&mut self, username: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, (String, BigDecimal, String)>(
            "SELECT username, balance, role FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&mut *self.tx)
        .await?
        .map(|(username, balance, role)| User {
            username,
            balance,
            role,
        });
        Ok(user)
    }

    async fn credit_user(&mut self, username: &str, amount: &BigDecimal) -> StoreResult<Option<BigDecimal>> {
        let balance = sqlx::query_scalar::<_, BigDecimal>(
            "UPDATE users SET balance = balance + $2, updated_at = NOW() WHERE username = $1 RETURNING balance",
        )
        .bind(username)
        .bind(amount)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(balance)
    }

    async fn debit_user(&mut self, username: &str, amount: &BigDecimal) -> StoreResult<Option<BigDecimal>> {
        let balance = sqlx::query_scalar::<_, BigDecimal>(
            "UPDATE users SET balance = balance - $2, updated_at = NOW() \
             WHERE username = $1 AND balance >= $2 RETURNING balance",
        )
        .bind(username)
        .bind(amount)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(balance)
    }

    async fn set_user_role(&mut self, username: &str, role: &str) -> StoreResult<()> {
        sqlx::query("UPDATE users SET role = $2, updated_at = NOW() WHERE username = $1")
            .bind(username)
            .bind(role)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn membership_tier_by_price(&mut self, price: &BigDecimal) -> StoreResult<Option<MembershipTier>> {
        let tier = sqlx::query_as::<_, (String, BigDecimal)>(
            "SELECT name, price FROM membership_tiers WHERE price = $1",
        )
        .bind(price)
        .fetch_optional(&mut *self.tx)
        .await?
        .map(|(name, price)| MembershipTier { name, price });
        Ok(tier)
    }

    async fn platform_balance_for_update(&mut self, platform_name: &str) -> StoreResult<Option<PlatformBalance>> {
        let balance = sqlx::query_as::<_, (Uuid, String, BigDecimal, DateTime<Utc>)>(
            "SELECT id, platform_name, balance, last_sync_at FROM platform_balances \
             WHERE platform_name = $1 FOR UPDATE",
        )
        .bind(platform_name)
        .fetch_optional(&mut *self.tx)
        .await?
        .map(|(id, platform_name, balance, last_sync_at)| PlatformBalance {
            id,
            platform_name,
            balance,
            last_sync_at,
        });
        Ok(balance)
    }

    async fn upsert_platform_balance(&mut self, balance: &PlatformBalance) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO platform_balances (id, platform_name, balance, last_sync_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (platform_name)
            DO UPDATE SET balance = EXCLUDED.balance, last_sync_at = EXCLUDED.last_sync_at
            "#,
        )
        .bind(balance.id)
        .bind(&balance.platform_name)
        .bind(&balance.balance)
        .bind(balance.last_sync_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn append_balance_history(&mut self, history: &BalanceHistory) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO balance_histories (
                id, platform_id, batch_id, balance_before, balance_after, amount_changed,
                change_type, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(history.id)
        .bind(history.platform_id)
        .bind(&history.batch_id)
        .bind(&history.balance_before)
        .bind(&history.balance_after)
        .bind(&history.amount_changed)
        .bind(history.change_type.as_str())
        .bind(history.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn manual_transactions_for_order(&mut self, order_id: &str) -> StoreResult<Vec<ManualTransaction>> {
        let rows = sqlx::query_as::<_, ManualRow>(
            "SELECT id, manual_transaction_id, order_id, operator, status, log, created_at, updated_at \
             FROM manual_transactions WHERE order_id = $1 ORDER BY created_at FOR UPDATE",
        )
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(ManualRow::into_domain).collect()
    }

    async fn manual_transaction_for_update(&mut self, manual_transaction_id: &str) -> StoreResult<Option<ManualTransaction>> {
        let row = sqlx::query_as::<_, ManualRow>(
            "SELECT id, manual_transaction_id, order_id, operator, status, log, created_at, updated_at \
             FROM manual_transactions WHERE manual_transaction_id = $1 FOR UPDATE",
        )
        .bind(manual_transaction_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(ManualRow::into_domain).transpose()
    }

    async fn insert_manual_transaction(&mut self, manual: &ManualTransaction) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO manual_transactions (
                id, manual_transaction_id, order_id, operator, status, log, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(manual.id)
        .bind(&manual.manual_transaction_id)
        .bind(&manual.order_id)
        .bind(&manual.operator)
        .bind(manual.status.as_str())
        .bind(&manual.log)
        .bind(manual.created_at)
        .bind(manual.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_manual_transaction(&mut self, manual: &ManualTransaction) -> StoreResult<()> {
        sqlx::query(
            "UPDATE manual_transactions SET status = $2, log = $3, updated_at = $4 \
             WHERE manual_transaction_id = $1",
        )
        .bind(&manual.manual_transaction_id)
        .bind(manual.status.as_str())
        .bind(&manual.log)
        .bind(manual.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// Internal row types for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_id: String,
    reference_id: Option<String>,
    transaction_kind: String,
    status: String,
    price: BigDecimal,
    purchase_price: BigDecimal,
    profit_amount: BigDecimal,
    username: Option<String>,
    product_code: Option<String>,
    buyer_id: Option<String>,
    server_id: Option<String>,
    serial_number: Option<String>,
    log: Option<serde_json::Value>,
    success_report_sent: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_domain(self) -> StoreResult<Order> {
        Ok(Order {
            id: self.id,
            order_id: self.order_id,
            reference_id: self.reference_id,
            kind: self.transaction_kind.parse()?,
            status: self.status.parse()?,
            price: self.price,
            purchase_price: self.purchase_price,
            profit_amount: self.profit_amount,
            username: self.username,
            product_code: self.product_code,
            buyer_id: self.buyer_id,
            server_id: self.server_id,
            serial_number: self.serial_number,
            log: self.log,
            success_report_sent: self.success_report_sent,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    order_id: String,
    status: String,
    method: String,
    fee_amount: BigDecimal,
    total_amount: BigDecimal,
    payment_number: Option<String>,
    reference: Option<String>,
    payment_url: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PaymentRow {
    fn into_domain(self) -> StoreResult<Payment> {
        Ok(Payment {
            id: self.id,
            order_id: self.order_id,
            status: self.status.parse()?,
            method: self.method,
            fee_amount: self.fee_amount,
            total_amount: self.total_amount,
            payment_number: self.payment_number,
            reference: self.reference,
            payment_url: self.payment_url,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DepositRow {
    id: Uuid,
    order_id: String,
    username: String,
    amount: BigDecimal,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DepositRow {
    fn into_domain(self) -> StoreResult<Deposit> {
        Ok(Deposit {
            id: self.id,
            order_id: self.order_id,
            username: self.username,
            amount: self.amount,
            status: self.status.parse()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ManualRow {
    id: Uuid,
    manual_transaction_id: String,
    order_id: String,
    operator: String,
    status: String,
    log: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ManualRow {
    fn into_domain(self) -> StoreResult<ManualTransaction> {
        Ok(ManualTransaction {
            id: self.id,
            manual_transaction_id: self.manual_transaction_id,
            order_id: self.order_id,
            operator: self.operator,
            status: self.status.parse()?,
            log: self.log,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
