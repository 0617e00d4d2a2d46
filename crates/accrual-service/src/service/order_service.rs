//! 订单服务
//!
//! 负责订单上传和状态推进。状态推进是整个系统唯一修改订单状态和入账的入口：
//!
//! 1. 在事务中锁定订单行
//! 2. 目标状态不比当前状态更靠后时直接跳过（幂等）
//! 3. 写入新状态；若为 PROCESSED 且带有积分，写入积分并给用户入账
//! 4. 任何一步失败整个事务回滚

use std::sync::Arc;

use loyalty_shared::broker::MessageBroker;
use loyalty_shared::error::{LoyaltyError, Result};
use loyalty_shared::observability::metrics;
use loyalty_shared::transactor::{Transactor, within};
use loyalty_shared::validation::validate_order_number;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tracing::{debug, info, instrument, warn};

use crate::consumer::{ORDER_CHECK_TOPIC, OrderCheckJob};
use crate::models::{Order, OrderStatus};
use crate::repository::{BalanceRepository, OrderRepository};

/// 上传结果
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    /// 新订单已接受，等待对账
    Accepted(Order),
    /// 同一用户重复上传
    AlreadyUploaded(Order),
}

/// 状态推进结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Applied { from: OrderStatus, to: OrderStatus },
    /// 目标状态不晚于当前状态，未做任何修改
    Skipped { current: OrderStatus },
}

pub struct OrderService<T, O, B>
where
    T: Transactor,
    O: OrderRepository<Tx = T::Tx> + 'static,
    B: BalanceRepository<Tx = T::Tx> + 'static,
{
    transactor: Arc<T>,
    orders: Arc<O>,
    balances: Arc<B>,
    /// 未设置时上传后不触发即时对账，只等待轮询
    broker: Option<Arc<MessageBroker>>,
}

impl<T, O, B> OrderService<T, O, B>
where
    T: Transactor,
    O: OrderRepository<Tx = T::Tx> + 'static,
    B: BalanceRepository<Tx = T::Tx> + 'static,
{
    pub fn new(transactor: Arc<T>, orders: Arc<O>, balances: Arc<B>) -> Self {
        Self {
            transactor,
            orders,
            balances,
            broker: None,
        }
    }

    pub fn with_broker(mut self, broker: Arc<MessageBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// 上传订单
    ///
    /// 订单号已被其他用户上传时返回 `AlreadyExists`。
    #[instrument(skip(self))]
    pub async fn upload_order(&self, user_id: &str, number: &str) -> Result<UploadOutcome> {
        validate_order_number(number)?;

        if let Some(existing) = self.orders.get_by_number(number).await? {
            return owned_by(existing, user_id);
        }

        let order = match self.orders.create(&Order::new(number, user_id)).await {
            Ok(order) => order,
            // 并发上传同一订单号
            Err(LoyaltyError::AlreadyExists { .. }) => {
                let existing = self
                    .orders
                    .get_by_number(number)
                    .await?
                    .ok_or_else(|| LoyaltyError::not_found("Order", number))?;
                return owned_by(existing, user_id);
            }
            Err(e) => return Err(e),
        };

        info!(order = %order.number, user_id, "订单已上传");

        if let Some(broker) = &self.broker {
            let job = OrderCheckJob {
                number: order.number.clone(),
            };
            if let Err(e) = broker.publish_json(ORDER_CHECK_TOPIC, &job).await {
                warn!(order = %order.number, error = %e, "发布对账任务失败，等待轮询处理");
            }
        }

        Ok(UploadOutcome::Accepted(order))
    }

    pub async fn list_user_orders(&self, user_id: &str) -> Result<Vec<Order>> {
        self.orders.list_by_user(user_id).await
    }

    /// 推进订单状态，必要时入账
    #[instrument(skip(self))]
    pub async fn change_status(
        &self,
        number: &str,
        target: OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<StatusChange> {
        let orders = self.orders.clone();
        let balances = self.balances.clone();
        let number = number.to_string();

        within(self.transactor.as_ref(), move |tx| {
            Box::pin(async move {
                let order = orders
                    .lock_by_number(tx, &number)
                    .await?
                    .ok_or_else(|| LoyaltyError::not_found("Order", number.as_str()))?;

                if !order.status.can_transition_to(target) {
                    debug!(order = %number, current = %order.status, target = %target, "状态未前进，跳过");
                    return Ok(StatusChange::Skipped {
                        current: order.status,
                    });
                }

                orders.update_status(tx, &number, target).await?;

                if target == OrderStatus::Processed {
                    match accrual {
                        Some(amount) => {
                            orders.update_accrual(tx, &number, amount).await?;
                            balances.credit(tx, &order.user_id, amount).await?;
                            metrics::record_balance_credit(amount.to_f64().unwrap_or_default());
                            info!(order = %number, user_id = %order.user_id, %amount, "积分已入账");
                        }
                        None => warn!(order = %number, "订单已处理但积分引擎未返回积分"),
                    }
                }

                info!(order = %number, from = %order.status, to = %target, "订单状态已更新");
                Ok(StatusChange::Applied {
                    from: order.status,
                    to: target,
                })
            })
        })
        .await
    }
}

fn owned_by(existing: Order, user_id: &str) -> Result<UploadOutcome> {
    if existing.user_id == user_id {
        Ok(UploadOutcome::AlreadyUploaded(existing))
    } else {
        Err(LoyaltyError::AlreadyExists {
            entity: "Order".to_string(),
            field: "number".to_string(),
            value: existing.number,
        })
    }
}
