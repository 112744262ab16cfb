//! Storage ports.
//!
//! The fulfillment core never talks to a database directly. Every callback, checkout or
//! retry opens exactly one [`UnitOfWork`] through a [`Store`], performs all of its reads
//! and writes on it, and either commits it or drops it. Dropping an uncommitted unit of
//! work discards every write made on it.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use thiserror::Error;

use crate::domain::{
    BalanceHistory, Deposit, ManualTransaction, MembershipTier, Order, Payment, PlatformBalance,
    UnknownVariant, User,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(#[from] UnknownVariant),

    #[error("Conflict: {0}")]
    Conflict(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Entry point to storage. Implementations own their connection pool; callers hold
/// an `Arc<dyn Store>` handed to them at construction.
#[async_trait]
pub trait Store: Send + Sync {
    /// Opens a serializable unit of work.
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>>;

    /// Connectivity check used by `/health`.
    async fn ping(&self) -> StoreResult<()>;
}

/// One atomic, serializable read-modify-write sequence.
///
/// `*_for_update` reads lock the returned row until the unit of work ends, which is
/// what forces concurrent callbacks for the same order into sequential commit order.
#[async_trait]
pub trait UnitOfWork: Send {
    // --- orders ---
    async fn order_for_update(&mut self, order_id: &str) -> StoreResult<Option<Order>>;
    async fn order_by_reference_for_update(&mut self, reference_id: &str) -> StoreResult<Option<Order>>;
    async fn insert_order(&mut self, order: &Order) -> StoreResult<()>;
    async fn update_order(&mut self, order: &Order) -> StoreResult<()>;

    // --- payments and deposits ---
    async fn payment_for_update(&mut self, order_id: &str) -> StoreResult<Option<Payment>>;
    async fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()>;
    async fn update_payment(&mut self, payment: &Payment) -> StoreResult<()>;
    async fn deposit_for_update(&mut self, order_id: &str) -> StoreResult<Option<Deposit>>;
    async fn insert_deposit(&mut self, deposit: &Deposit) -> StoreResult<()>;
    async fn update_deposit(&mut self, deposit: &Deposit) -> StoreResult<()>;

    // --- users ---
    async fn user(&mut self, username: &str) -> StoreResult<Option<User>>;
    /// Atomically adds `amount`. Returns the new balance, or `None` if the user does not exist.
    async fn credit_user(&mut self, username: &str, amount: &BigDecimal) -> StoreResult<Option<BigDecimal>>;
    /// Atomically subtracts `amount` only if the balance covers it. Returns the new
    /// balance, or `None` if the user is missing or the balance is insufficient.
    async fn debit_user(&mut self, username: &str, amount: &BigDecimal) -> StoreResult<Option<BigDecimal>>;
    async fn set_user_role(&mut self, username: &str, role: &str) -> StoreResult<()>;
    async fn membership_tier_by_price(&mut self, price: &BigDecimal) -> StoreResult<Option<MembershipTier>>;

    // --- ledger ---
    async fn platform_balance_for_update(&mut self, platform_name: &str) -> StoreResult<Option<PlatformBalance>>;
    async fn upsert_platform_balance(&mut self, balance: &PlatformBalance) -> StoreResult<()>;
    async fn append_balance_history(&mut self, history: &BalanceHistory) -> StoreResult<()>;

    // --- manual retries ---
    async fn manual_transactions_for_order(&mut self, order_id: &str) -> StoreResult<Vec<ManualTransaction>>;
    async fn manual_transaction_for_update(&mut self, manual_transaction_id: &str) -> StoreResult<Option<ManualTransaction>>;
    async fn insert_manual_transaction(&mut self, manual: &ManualTransaction) -> StoreResult<()>;
    async fn update_manual_transaction(&mut self, manual: &ManualTransaction) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
