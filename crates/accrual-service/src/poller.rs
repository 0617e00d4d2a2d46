//! 待结算订单轮询器
//!
//! 启动时立即执行一轮，之后按固定间隔执行：取出所有 NEW/PROCESSING 订单，
//! 每个订单派发一次对账。派发方式由 `CheckDispatcher` 决定：
//!
//! - `BrokerDispatcher`：发布到 order.check 主题，由消息总线 worker 异步处理
//! - `PoolDispatcher`：在有界并发池中直接执行，本轮全部完成后才返回
//!
//! 轮次之间不互斥，同一订单可能被并发检查两次；状态推进是幂等的，重复检查不会重复入账。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use loyalty_shared::broker::MessageBroker;
use loyalty_shared::observability::metrics;
use loyalty_shared::task::{TaskHandle, wait_for_shutdown};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::consumer::{ORDER_CHECK_TOPIC, OrderCheckJob};
use crate::error::AccrualError;
use crate::models::Order;
use crate::service::OrderCheck;

const WORKER_NAME: &str = "order_poller";

/// 对账任务派发接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CheckDispatcher: Send + Sync {
    /// 为每个订单派发一次对账，返回成功派发的数量
    async fn dispatch(&self, orders: Vec<Order>) -> usize;
}

/// 通过消息总线派发
pub struct BrokerDispatcher {
    broker: Arc<MessageBroker>,
}

impl BrokerDispatcher {
    pub fn new(broker: Arc<MessageBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl CheckDispatcher for BrokerDispatcher {
    async fn dispatch(&self, orders: Vec<Order>) -> usize {
        let mut dispatched = 0;

        for order in orders {
            let job = OrderCheckJob {
                number: order.number,
            };
            // 队列满时在此等待，消费速度反压轮询
            match self.broker.publish_json(ORDER_CHECK_TOPIC, &job).await {
                Ok(()) => dispatched += 1,
                Err(e) => {
                    warn!(order = %job.number, error = %e, "发布对账任务失败，停止本轮派发");
                    break;
                }
            }
        }

        dispatched
    }
}

/// 在有界并发池中直接执行对账
pub struct PoolDispatcher {
    checker: Arc<dyn OrderCheck>,
    width: usize,
}

impl PoolDispatcher {
    pub fn new(checker: Arc<dyn OrderCheck>, width: usize) -> Self {
        Self {
            checker,
            width: width.max(1),
        }
    }
}

#[async_trait]
impl CheckDispatcher for PoolDispatcher {
    async fn dispatch(&self, orders: Vec<Order>) -> usize {
        let total = orders.len();

        futures::stream::iter(orders)
            .for_each_concurrent(self.width, |order| async move {
                match self.checker.check_order(&order.number).await {
                    Ok(()) => {}
                    Err(AccrualError::Unregistered { .. }) => {
                        debug!(order = %order.number, "订单未登记，等待下一轮");
                    }
                    Err(e) => error!(order = %order.number, error = %e, "订单对账失败"),
                }
            })
            .await;

        total
    }
}

/// 待结算订单轮询器
pub struct OrderPoller {
    checker: Arc<dyn OrderCheck>,
    dispatcher: Arc<dyn CheckDispatcher>,
    interval: Duration,
}

impl OrderPoller {
    pub fn new(
        checker: Arc<dyn OrderCheck>,
        dispatcher: Arc<dyn CheckDispatcher>,
        interval: Duration,
    ) -> Self {
        Self {
            checker,
            dispatcher,
            interval,
        }
    }

    /// 启动后台轮询，关闭信号变为 `true` 后在下一个 tick 边界退出
    pub fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> TaskHandle {
        let mut handle = TaskHandle::new(WORKER_NAME);

        handle.spawn(async move {
            info!(interval = ?self.interval, "订单轮询器已启动");

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    _ = wait_for_shutdown(&mut shutdown) => {
                        info!("收到关闭信号，订单轮询器退出");
                        return;
                    }

                    _ = ticker.tick() => {}
                }

                // 失败只影响本轮，下一个 tick 继续
                let _ = self.run_iteration().await;
                metrics::set_worker_last_run(WORKER_NAME);
            }
        });

        handle
    }

    /// 执行一轮轮询，返回派发数量
    pub async fn run_iteration(&self) -> Result<usize, AccrualError> {
        let orders = match self.checker.get_process_orders().await {
            Ok(orders) => orders,
            Err(e) => {
                error!(error = %e, "获取待结算订单失败");
                metrics::record_poller_iteration("fetch_failed", 0);
                return Err(e);
            }
        };

        if orders.is_empty() {
            metrics::record_poller_iteration("idle", 0);
            return Ok(0);
        }

        let total = orders.len();
        let dispatched = self.dispatcher.dispatch(orders).await;
        debug!(total, dispatched, "本轮对账任务已派发");
        metrics::record_poller_iteration("ok", dispatched);

        Ok(dispatched)
    }
}
