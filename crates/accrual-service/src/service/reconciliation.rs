//! 订单对账
//!
//! 从积分引擎拉取订单状态并推进本地订单：
//!
//! 1. 查询积分引擎；204 表示未登记，可选自动登记后返回 `Unregistered`
//! 2. 外部状态映射为本地状态（REGISTERED -> NEW）
//! 3. 交给 `OrderService::change_status`，重复或后退的状态会被跳过

use std::sync::Arc;

use async_trait::async_trait;
use loyalty_shared::observability::metrics;
use loyalty_shared::transactor::Transactor;
use tracing::{info, instrument, warn};

use crate::accrual_client::{AccrualService, sample_goods};
use crate::error::AccrualError;
use crate::models::{AWAITING_STATUSES, Order, OrderStatus, RegisterOrder};
use crate::repository::{BalanceRepository, OrderRepository};
use crate::service::order_service::{OrderService, StatusChange};

/// 对账操作接口，供轮询器和消息消费者使用
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderCheck: Send + Sync {
    /// 返回仍在等待积分引擎结果的订单（NEW 或 PROCESSING），按上传时间倒序
    async fn get_process_orders(&self) -> Result<Vec<Order>, AccrualError>;

    /// 对单个订单执行一次对账
    async fn check_order(&self, number: &str) -> Result<(), AccrualError>;
}

pub struct ReconciliationService<T, O, B>
where
    T: Transactor,
    O: OrderRepository<Tx = T::Tx> + 'static,
    B: BalanceRepository<Tx = T::Tx> + 'static,
{
    accrual: Arc<dyn AccrualService>,
    orders: Arc<O>,
    order_service: Arc<OrderService<T, O, B>>,
    auto_register: bool,
}

impl<T, O, B> ReconciliationService<T, O, B>
where
    T: Transactor,
    O: OrderRepository<Tx = T::Tx> + 'static,
    B: BalanceRepository<Tx = T::Tx> + 'static,
{
    pub fn new(
        accrual: Arc<dyn AccrualService>,
        orders: Arc<O>,
        order_service: Arc<OrderService<T, O, B>>,
    ) -> Self {
        Self {
            accrual,
            orders,
            order_service,
            auto_register: false,
        }
    }

    /// 积分引擎返回 204 时自动登记订单
    pub fn with_auto_register(mut self, enabled: bool) -> Self {
        self.auto_register = enabled;
        self
    }

    async fn register_unknown(&self, number: &str) {
        let request = RegisterOrder {
            order: number.to_string(),
            goods: sample_goods(),
        };
        match self.accrual.register_order(&request).await {
            Ok(()) => info!(order = number, "未登记订单已自动登记"),
            Err(e) => warn!(order = number, error = %e, "自动登记订单失败"),
        }
    }
}

#[async_trait]
impl<T, O, B> OrderCheck for ReconciliationService<T, O, B>
where
    T: Transactor,
    O: OrderRepository<Tx = T::Tx> + 'static,
    B: BalanceRepository<Tx = T::Tx> + 'static,
{
    async fn get_process_orders(&self) -> Result<Vec<Order>, AccrualError> {
        Ok(self.orders.list_by_statuses(&AWAITING_STATUSES).await?)
    }

    #[instrument(skip(self))]
    async fn check_order(&self, number: &str) -> Result<(), AccrualError> {
        let remote = match self.accrual.get_order(number).await {
            Ok(remote) => remote,
            Err(err) => {
                metrics::record_order_check(err.outcome());
                if matches!(err, AccrualError::Unregistered { .. }) {
                    info!(order = number, "订单尚未在积分引擎登记");
                    if self.auto_register {
                        self.register_unknown(number).await;
                    }
                }
                return Err(err);
            }
        };

        if remote.order != number {
            metrics::record_order_check("failed");
            return Err(AccrualError::Malformed(format!(
                "请求订单 {number}，积分引擎返回订单 {}",
                remote.order
            )));
        }

        let target = OrderStatus::from(remote.status);
        let change = self
            .order_service
            .change_status(number, target, remote.accrual)
            .await
            .inspect_err(|_| metrics::record_order_check("failed"))?;

        let outcome = match change {
            StatusChange::Applied { to: OrderStatus::Processed, .. } => "processed",
            StatusChange::Applied { to: OrderStatus::Invalid, .. } => "invalid",
            StatusChange::Applied { .. } => "pending",
            StatusChange::Skipped { .. } => "skipped",
        };
        metrics::record_order_check(outcome);

        Ok(())
    }
}
