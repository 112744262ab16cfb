//! In-process implementation of the storage ports.
//!
//! A unit of work holds the single store-wide lock for its whole lifetime and edits a
//! private copy of the state, so every unit of work is trivially serializable. Commit
//! swaps the copy in; drop throws it away.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::{
    BalanceHistory, Deposit, ManualTransaction, MembershipTier, Order, Payment, PlatformBalance, User,
};
use crate::ports::{Store, StoreError, StoreResult, UnitOfWork};

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub users: HashMap<String, User>,
    pub membership_tiers: Vec<MembershipTier>,
    pub orders: HashMap<String, Order>,
    pub payments: HashMap<String, Payment>,
    pub deposits: HashMap<String, Deposit>,
    pub platform_balances: HashMap<String, PlatformBalance>,
    pub balance_histories: Vec<BalanceHistory>,
    pub manual_transactions: Vec<ManualTransaction>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a user with an opening balance.
    pub async fn add_user(&self, username: &str, balance: BigDecimal) {
        let mut state = self.state.lock().await;
        state.users.insert(
            username.to_string(),
            User {
                username: username.to_string(),
                balance,
                role: "member".to_string(),
            },
        );
    }

    pub async fn add_membership_tier(&self, name: &str, price: BigDecimal) {
        let mut state = self.state.lock().await;
        state.membership_tiers.push(MembershipTier {
            name: name.to_string(),
            price,
        });
    }

    /// Copy of the committed state.
    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnitOfWork { guard, working }))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

impl MemoryUnitOfWork {
    fn missing(what: &str, key: &str) -> StoreError {
        StoreError::Conflict(format!("{} {} does not exist", what, key))
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn order_for_update(&mut self, order_id: &str) -> StoreResult<Option<Order>> {
        Ok(self.working.orders.get(order_id).cloned())
    }

    async fn order_by_reference_for_update(&mut self, reference_id: &str) -> StoreResult<Option<Order>> {
        Ok(self
            .working
            .orders
            .values()
            .find(|o| o.reference_id.as_deref() == Some(reference_id))
            .cloned())
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
        if self.working.orders.contains_key(&order.order_id) {
            return Err(StoreError::Conflict(format!("order {} already exists", order.order_id)));
        }
        self.working.orders.insert(order.order_id.clone(), order.clone());
        Ok(())
    }

    async fn update_order(&mut self, order: &Order) -> StoreResult<()> {
        let slot = self
            .working
            .orders
            .get_mut(&order.order_id)
            .ok_or_else(|| Self::missing("order", &order.order_id))?;
        *slot = order.clone();
        Ok(())
    }

    async fn payment_for_update(&mut self, order_id: &str) -> StoreResult<Option<Payment>> {
        Ok(self.working.payments.get(order_id).cloned())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        if self.working.payments.contains_key(&payment.order_id) {
            return Err(StoreError::Conflict(format!("payment for {} already exists", payment.order_id)));
        }
        self.working.payments.insert(payment.order_id.clone(), payment.clone());
        Ok(())
    }

    async fn update_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        let slot = self
            .working
            .payments
            .get_mut(&payment.order_id)
            .ok_or_else(|| Self::missing("payment", &payment.order_id))?;
        *slot = payment.clone();
        Ok(())
    }

    async fn deposit_for_update(&mut self, order_id: &str) -> StoreResult<Option<Deposit>> {
        Ok(self.working.deposits.get(order_id).cloned())
    }

    async fn insert_deposit(&mut self, deposit: &Deposit) -> StoreResult<()> {
        self.working.deposits.insert(deposit.order_id.clone(), deposit.clone());
        Ok(())
    }

    async fn update_deposit(&mut self, deposit: &Deposit) -> StoreResult<()> {
        let slot = self
            .working
            .deposits
            .get_mut(&deposit.order_id)
            .ok_or_else(|| Self::missing("deposit", &deposit.order_id))?;
        *slot = deposit.clone();
        Ok(())
    }

    async fn user(&mut self, username: &str) -> StoreResult<Option<User>> {
        Ok(self.working.users.get(username).cloned())
    }

    async fn credit_user(&mut self, username: &str, amount: &BigDecimal) -> StoreResult<Option<BigDecimal>> {
        Ok(self.working.users.get_mut(username).map(|user| {
            user.balance = &user.balance + amount;
            user.balance.clone()
        }))
    }

    async fn debit_user(&mut self, username: &str, amount: &BigDecimal) -> StoreResult<Option<BigDecimal>> {
        match self.working.users.get_mut(username) {
            Some(user) if user.balance >= *amount => {
                user.balance = &user.balance - amount;
                Ok(Some(user.balance.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn set_user_role(&mut self, username: &str, role: &str) -> StoreResult<()> {
        let user = self
            .working
            .users
            .get_mut(username)
            .ok_or_else(|| Self::missing("user", username))?;
        user.role = role.to_string();
        Ok(())
    }

    async fn membership_tier_by_price(&mut self, price: &BigDecimal) -> StoreResult<Option<MembershipTier>> {
        Ok(self
            .working
            .membership_tiers
            .iter()
            .find(|tier| tier.price == *price)
            .cloned())
    }

    async fn platform_balance_for_update(&mut self, platform_name: &str) -> StoreResult<Option<PlatformBalance>> {
        Ok(self.working.platform_balances.get(platform_name).cloned())
    }

    async fn upsert_platform_balance(&mut self, balance: &PlatformBalance) -> StoreResult<()> {
        self.working
            .platform_balances
            .insert(balance.platform_name.clone(), balance.clone());
        Ok(())
    }

    async fn append_balance_history(&mut self, history: &BalanceHistory) -> StoreResult<()> {
        self.working.balance_histories.push(history.clone());
        Ok(())
    }

    async fn manual_transactions_for_order(&mut self, order_id: &str) -> StoreResult<Vec<ManualTransaction>> {
        Ok(self
            .working
            .manual_transactions
            .iter()
            .filter(|m| m.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn manual_transaction_for_update(&mut self, manual_transaction_id: &str) -> StoreResult<Option<ManualTransaction>> {
        Ok(self
            .working
            .manual_transactions
            .iter()
            .find(|m| m.manual_transaction_id == manual_transaction_id)
            .cloned())
    }

    async fn insert_manual_transaction(&mut self, manual: &ManualTransaction) -> StoreResult<()> {
        self.working.manual_transactions.push(manual.clone());
        Ok(())
    }

    async fn update_manual_transaction(&mut self, manual: &ManualTransaction) -> StoreResult<()> {
        let slot = self
            .working
            .manual_transactions
            .iter_mut()
            .find(|m| m.manual_transaction_id == manual.manual_transaction_id)
            .ok_or_else(|| Self::missing("manual transaction", &manual.manual_transaction_id))?;
        *slot = manual.clone();
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryUnitOfWork { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransactionKind;

    #[tokio::test]
    async fn test_uncommitted_writes_are_discarded() {
        let store = MemoryStore::new();
        {
            let mut uow = store.begin().await.unwrap();
            let order = Order::new("VAZZ1".into(), TransactionKind::Topup, BigDecimal::from(10), None);
            uow.insert_order(&order).await.unwrap();
        }
        assert!(store.snapshot().await.orders.is_empty());
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let order = Order::new("VAZZ1".into(), TransactionKind::Topup, BigDecimal::from(10), None);
        uow.insert_order(&order).await.unwrap();
        uow.commit().await.unwrap();

        assert!(store.snapshot().await.orders.contains_key("VAZZ1"));
    }

    #[tokio::test]
    async fn test_debit_rejects_insufficient_balance() {
        let store = MemoryStore::new();
        store.add_user("alice", BigDecimal::from(50)).await;

        let mut uow = store.begin().await.unwrap();
        assert_eq!(uow.debit_user("alice", &BigDecimal::from(80)).await.unwrap(), None);
        assert_eq!(
            uow.debit_user("alice", &BigDecimal::from(50)).await.unwrap(),
            Some(BigDecimal::from(0))
        );
        assert_eq!(uow.debit_user("bob", &BigDecimal::from(1)).await.unwrap(), None);
    }
}
