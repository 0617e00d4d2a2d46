//! 积分对账服务
//!
//! 轮询外部积分引擎，获取已上传订单的计算结果，并在同一事务中推进订单状态、给用户入账。
//!
//! ## 核心功能
//!
//! - **订单上传**：校验订单号后登记为 NEW，并立即发布一次对账任务
//! - **订单对账**：查询积分引擎，状态只向前推进，PROCESSED 时入账
//! - **余额与提现**：提现与余额扣减在同一事务内完成
//! - **后台轮询**：定期取出 NEW/PROCESSING 订单，经消息总线或并发池派发对账
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `repository`: 数据库仓储层
//! - `service`: 业务服务层
//! - `accrual_client`: 积分引擎 HTTP 客户端
//! - `consumer`: order.check 主题消费者
//! - `poller`: 待结算订单轮询器

pub mod accrual_client;
pub mod consumer;
pub mod error;
pub mod models;
pub mod poller;
pub mod repository;
pub mod service;

pub use accrual_client::{AccrualClient, AccrualService};
pub use consumer::{ORDER_CHECK_TOPIC, OrderCheckConsumer, OrderCheckJob};
pub use error::AccrualError;
pub use models::*;
pub use poller::{BrokerDispatcher, CheckDispatcher, OrderPoller, PoolDispatcher};
pub use repository::{
    MemoryStore, PgBalanceRepository, PgOrderRepository, PgWithdrawalRepository,
};
pub use service::{
    BalanceService, OrderCheck, OrderService, ReconciliationService, StatusChange, UploadOutcome,
};
