//! 业务服务层

mod balance_service;
mod order_service;
mod reconciliation;

pub use balance_service::BalanceService;
pub use order_service::{OrderService, StatusChange, UploadOutcome};
pub use reconciliation::{OrderCheck, ReconciliationService};

#[cfg(test)]
pub use reconciliation::MockOrderCheck;
