//! 共享库
//!
//! 包含积分服务共用的配置、错误处理、数据库连接、事务单元、重试、进程内消息总线等基础设施代码。

pub mod broker;
pub mod config;
pub mod database;
pub mod error;
pub mod observability;
pub mod retry;
pub mod task;
pub mod transactor;
pub mod validation;
