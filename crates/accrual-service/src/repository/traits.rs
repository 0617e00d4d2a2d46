//! 仓储 Trait 定义
//!
//! 定义仓储接口，便于服务层依赖抽象而非具体实现

use async_trait::async_trait;
use loyalty_shared::error::Result;
use rust_decimal::Decimal;

use crate::models::{Balance, Order, OrderStatus, Withdrawal};

/// 订单仓储接口
#[async_trait]
pub trait OrderRepository: Send + Sync {
    type Tx: Send + 'static;

    /// 创建订单，订单号已存在时返回 `AlreadyExists`
    async fn create(&self, order: &Order) -> Result<Order>;
    async fn get_by_number(&self, number: &str) -> Result<Option<Order>>;
    /// 按上传时间倒序返回指定状态的订单
    async fn list_by_statuses(&self, statuses: &[OrderStatus]) -> Result<Vec<Order>>;
    /// 按上传时间倒序返回用户的订单
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Order>>;

    // 事务内操作
    /// 读取并锁定订单行，直到事务结束
    async fn lock_by_number(&self, tx: &mut Self::Tx, number: &str) -> Result<Option<Order>>;
    async fn update_status(&self, tx: &mut Self::Tx, number: &str, status: OrderStatus)
    -> Result<()>;
    async fn update_accrual(&self, tx: &mut Self::Tx, number: &str, accrual: Decimal)
    -> Result<()>;
}

/// 余额仓储接口
#[async_trait]
pub trait BalanceRepository: Send + Sync {
    type Tx: Send + 'static;

    /// 用户没有余额记录时返回全 0
    async fn get_by_user(&self, user_id: &str) -> Result<Balance>;

    // 事务内操作
    async fn lock_by_user(&self, tx: &mut Self::Tx, user_id: &str) -> Result<Balance>;
    async fn credit(&self, tx: &mut Self::Tx, user_id: &str, amount: Decimal) -> Result<()>;
    /// 从 current 转移到 withdrawn，余额不足时返回 `InsufficientFunds`
    async fn withdraw(&self, tx: &mut Self::Tx, user_id: &str, amount: Decimal) -> Result<()>;
}

/// 提现记录仓储接口
#[async_trait]
pub trait WithdrawalRepository: Send + Sync {
    type Tx: Send + 'static;

    /// 按处理时间倒序返回用户的提现记录
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Withdrawal>>;

    // 事务内操作
    async fn create(&self, tx: &mut Self::Tx, withdrawal: &Withdrawal) -> Result<()>;
}
