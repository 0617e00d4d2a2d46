//! order.check 主题消费者
//!
//! 每条消息携带一个订单号，消费时执行一次对账。错误分类决定消息总线是否重试：
//!
//! - 订单未登记：正常情况，下一轮轮询再查，直接确认
//! - 瞬时故障：返回普通错误，由消息总线按线性退避重试
//! - 其他错误（负载无法解析、响应异常等）：返回 `PermanentError`，不重试

use std::sync::Arc;

use async_trait::async_trait;
use loyalty_shared::broker::{HandlerResult, MessageBroker, MessageHandler, PermanentError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::AccrualError;
use crate::service::OrderCheck;

pub const ORDER_CHECK_TOPIC: &str = "order.check";

/// order.check 消息负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCheckJob {
    pub number: String,
}

pub struct OrderCheckConsumer {
    checker: Arc<dyn OrderCheck>,
}

impl OrderCheckConsumer {
    pub fn new(checker: Arc<dyn OrderCheck>) -> Self {
        Self { checker }
    }

    /// 注册到消息总线
    pub fn register(broker: &MessageBroker, checker: Arc<dyn OrderCheck>) {
        broker.consume(ORDER_CHECK_TOPIC, Arc::new(Self::new(checker)));
    }
}

#[async_trait]
impl MessageHandler for OrderCheckConsumer {
    async fn handle(&self, payload: &Value) -> HandlerResult {
        let job = OrderCheckJob::deserialize(payload)
            .map_err(|e| PermanentError(format!("无法解析对账任务 {payload}: {e}")))?;

        match self.checker.check_order(&job.number).await {
            Ok(()) => Ok(()),
            Err(AccrualError::Unregistered { .. }) => {
                debug!(order = %job.number, "订单未登记，等待下一轮轮询");
                Ok(())
            }
            Err(e) if e.is_transient() => Err(e.into()),
            Err(e) => {
                warn!(order = %job.number, error = %e, "对账失败且不可重试");
                Err(PermanentError(e.to_string()).into())
            }
        }
    }
}
