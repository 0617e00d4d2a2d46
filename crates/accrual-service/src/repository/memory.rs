//! 内存存储
//!
//! 同时实现三个仓储接口和 `Transactor`，供测试与本地联调使用。
//! 事务持有全局锁并在状态副本上修改：提交时整体写回，回滚时直接丢弃，
//! 因此事务之间完全串行，非事务读取会等待进行中的事务结束。
//! 事务内只能调用以 `&mut MemoryTx` 为参数的方法，否则会与自身持有的锁死锁。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use loyalty_shared::error::{LoyaltyError, Result};
use loyalty_shared::transactor::Transactor;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::traits::{BalanceRepository, OrderRepository, WithdrawalRepository};
use crate::models::{Balance, Order, OrderStatus, Withdrawal};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    orders: HashMap<String, Order>,
    balances: HashMap<String, Balance>,
    withdrawals: Vec<Withdrawal>,
}

/// 内存事务句柄
pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    fail_credit: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让之后的入账操作返回错误，用于验证事务回滚
    pub fn fail_credits(&self, fail: bool) {
        self.fail_credit.store(fail, Ordering::SeqCst);
    }

    /// 直接写入余额
    pub async fn seed_balance(&self, user_id: &str, balance: Balance) {
        self.state
            .lock()
            .await
            .balances
            .insert(user_id.to_string(), balance);
    }
}

fn sorted_desc(mut orders: Vec<Order>) -> Vec<Order> {
    orders.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
    orders
}

#[async_trait]
impl Transactor for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(MemoryTx { guard, staged })
    }

    async fn commit(&self, tx: MemoryTx) -> Result<()> {
        let MemoryTx { mut guard, staged } = tx;
        *guard = staged;
        Ok(())
    }

    async fn rollback(&self, tx: MemoryTx) -> Result<()> {
        drop(tx);
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    type Tx = MemoryTx;

    async fn create(&self, order: &Order) -> Result<Order> {
        let mut state = self.state.lock().await;
        if state.orders.contains_key(&order.number) {
            return Err(LoyaltyError::AlreadyExists {
                entity: "Order".to_string(),
                field: "number".to_string(),
                value: order.number.clone(),
            });
        }
        state.orders.insert(order.number.clone(), order.clone());
        Ok(order.clone())
    }

    async fn get_by_number(&self, number: &str) -> Result<Option<Order>> {
        Ok(self.state.lock().await.orders.get(number).cloned())
    }

    async fn list_by_statuses(&self, statuses: &[OrderStatus]) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        Ok(sorted_desc(
            state
                .orders
                .values()
                .filter(|o| statuses.contains(&o.status))
                .cloned()
                .collect(),
        ))
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        Ok(sorted_desc(
            state
                .orders
                .values()
                .filter(|o| o.user_id == user_id)
                .cloned()
                .collect(),
        ))
    }

    async fn lock_by_number(&self, tx: &mut MemoryTx, number: &str) -> Result<Option<Order>> {
        Ok(tx.staged.orders.get(number).cloned())
    }

    async fn update_status(&self, tx: &mut MemoryTx, number: &str, status: OrderStatus) -> Result<()> {
        let order = tx
            .staged
            .orders
            .get_mut(number)
            .ok_or_else(|| LoyaltyError::not_found("Order", number))?;
        order.status = status;
        Ok(())
    }

    async fn update_accrual(&self, tx: &mut MemoryTx, number: &str, accrual: Decimal) -> Result<()> {
        let order = tx
            .staged
            .orders
            .get_mut(number)
            .ok_or_else(|| LoyaltyError::not_found("Order", number))?;
        order.accrual = Some(accrual);
        Ok(())
    }
}

#[async_trait]
impl BalanceRepository for MemoryStore {
    type Tx = MemoryTx;

    async fn get_by_user(&self, user_id: &str) -> Result<Balance> {
        Ok(self
            .state
            .lock()
            .await
            .balances
            .get(user_id)
            .copied()
            .unwrap_or_default())
    }

    async fn lock_by_user(&self, tx: &mut MemoryTx, user_id: &str) -> Result<Balance> {
        Ok(tx.staged.balances.get(user_id).copied().unwrap_or_default())
    }

    async fn credit(&self, tx: &mut MemoryTx, user_id: &str, amount: Decimal) -> Result<()> {
        if self.fail_credit.load(Ordering::SeqCst) {
            return Err(LoyaltyError::Internal("balance credit failed".to_string()));
        }
        tx.staged
            .balances
            .entry(user_id.to_string())
            .or_default()
            .current += amount;
        Ok(())
    }

    async fn withdraw(&self, tx: &mut MemoryTx, user_id: &str, amount: Decimal) -> Result<()> {
        let balance = tx.staged.balances.entry(user_id.to_string()).or_default();
        if balance.current < amount {
            return Err(LoyaltyError::InsufficientFunds {
                required: amount,
                available: balance.current,
            });
        }
        balance.current -= amount;
        balance.withdrawn += amount;
        Ok(())
    }
}

#[async_trait]
impl WithdrawalRepository for MemoryStore {
    type Tx = MemoryTx;

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Withdrawal>> {
        let state = self.state.lock().await;
        let mut withdrawals: Vec<Withdrawal> = state
            .withdrawals
            .iter()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        withdrawals.sort_by(|a, b| b.processed_at.cmp(&a.processed_at));
        Ok(withdrawals)
    }

    async fn create(&self, tx: &mut MemoryTx, withdrawal: &Withdrawal) -> Result<()> {
        tx.staged.withdrawals.push(withdrawal.clone());
        Ok(())
    }
}
