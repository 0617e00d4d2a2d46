//! 积分服务领域模型
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化；金额统一使用 `Decimal`。

mod accrual;
mod balance;
mod order;
mod withdrawal;

pub use accrual::{AccrualOrder, AccrualStatus, Good, RegisterOrder};
pub use balance::Balance;
pub use order::{AWAITING_STATUSES, Order, OrderStatus};
pub use withdrawal::Withdrawal;
