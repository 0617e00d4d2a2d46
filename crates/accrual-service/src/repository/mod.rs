//! 数据库仓储层
//!
//! ## 设计原则
//!
//! - 仓储只负责数据持久化，不包含业务逻辑
//! - 事务控制由调用方（服务层）通过 `Transactor` 决定，事务内方法以 `&mut Tx` 接收句柄
//! - 同一组仓储与 `Transactor` 共享同一 `Tx` 类型，才能在一个事务单元中组合使用
//! - PostgreSQL 实现用于生产，内存实现用于测试和本地联调

mod balance_repo;
mod memory;
mod order_repo;
mod traits;
mod withdrawal_repo;

pub use balance_repo::PgBalanceRepository;
pub use memory::{MemoryStore, MemoryTx};
pub use order_repo::PgOrderRepository;
pub use traits::*;
pub use withdrawal_repo::PgWithdrawalRepository;
