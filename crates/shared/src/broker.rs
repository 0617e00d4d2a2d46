//! 进程内消息总线
//!
//! 基于主题的发布/订阅：生产者把消息放入有界队列，固定数量的 worker 从同一队列拉取，
//! 按注册顺序同步调用该主题的全部 handler。
//!
//! - 队列满时 `publish` 会等待，消费速度因此反压生产者
//! - 每次 handler 调用都包在线性退避重试中，重试耗尽后记录全部错误并丢弃该消息
//! - 没有死信队列，也不跨重启重投；消息只存在于内存中
//! - 关闭信号只在两次出队之间检查，正在重试的 handler 会自然完成

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::config::BrokerConfig;
use crate::observability::metrics;
use crate::retry::{RetryPolicy, retry_with_policy};
use crate::task::{TaskHandle, wait_for_shutdown};

/// handler 的返回值，错误类型由各业务自行决定，这里统一擦除
pub type HandlerResult = anyhow::Result<()>;

/// 消息总线错误
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// 总线已关闭，不再接受新消息
    #[error("消息总线已关闭")]
    Closed,

    #[error("消息序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// handler 返回此错误时不再重试，消息直接丢弃
///
/// 适用于重试也无法成功的情况，例如负载无法反序列化。
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct PermanentError(pub String);

/// 队列中的消息
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub payload: Value,
}

/// 主题消费者
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: &Value) -> HandlerResult;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, payload: &Value) -> HandlerResult {
        (self.0)(payload.clone()).await
    }
}

/// 把闭包包装为 handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

type ConsumerRegistry = HashMap<String, Vec<Arc<dyn MessageHandler>>>;

/// 进程内消息总线
///
/// 显式构造、显式持有，通过 `Arc` 注入到需要发布或订阅的组件中。
pub struct MessageBroker {
    workers: usize,
    retry_policy: RetryPolicy,
    sender: Mutex<Option<mpsc::Sender<Message>>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Message>>>,
    consumers: RwLock<ConsumerRegistry>,
    closing: watch::Sender<bool>,
}

impl MessageBroker {
    pub fn new(config: &BrokerConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.capacity());
        let (closing, _) = watch::channel(false);

        Self {
            workers: config.workers.max(1),
            retry_policy: RetryPolicy::linear(
                config.max_attempts,
                Duration::from_millis(config.retry_unit_ms),
            ),
            sender: Mutex::new(Some(sender)),
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            consumers: RwLock::new(HashMap::new()),
            closing,
        }
    }

    /// 注册主题消费者
    ///
    /// 同一主题可注册多个 handler，按注册顺序依次调用；重复注册同一个 handler 会被调用两次。
    pub fn consume(&self, topic: &str, handler: Arc<dyn MessageHandler>) {
        info!(topic, "注册主题消费者");
        self.consumers
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(handler);
    }

    pub fn consumer_count(&self, topic: &str) -> usize {
        self.consumers.read().get(topic).map_or(0, Vec::len)
    }

    /// 发布消息
    ///
    /// 队列已满时等待空位；总线关闭后（或等待期间关闭）返回 `BrokerError::Closed`。
    pub async fn publish(&self, topic: &str, payload: Value) -> Result<(), BrokerError> {
        let mut closing = self.closing.subscribe();
        let sender = match self.sender.lock().clone() {
            Some(sender) if !*closing.borrow() => sender,
            _ => return Err(BrokerError::Closed),
        };

        debug!(topic, %payload, "发布消息");

        let message = Message {
            topic: topic.to_string(),
            payload,
        };

        tokio::select! {
            sent = sender.send(message) => sent.map_err(|_| BrokerError::Closed),
            _ = closing.wait_for(|closed| *closed) => Err(BrokerError::Closed),
        }
    }

    /// 序列化后发布
    pub async fn publish_json<T: Serialize>(
        &self,
        topic: &str,
        payload: &T,
    ) -> Result<(), BrokerError> {
        let value = serde_json::to_value(payload)?;
        self.publish(topic, value).await
    }

    /// 启动 worker
    ///
    /// worker 在关闭信号变为 `true` 或队列关闭且排空后退出。
    pub fn run(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> TaskHandle {
        let mut handle = TaskHandle::new("message_broker");

        for worker_id in 0..self.workers {
            let broker = Arc::clone(self);
            let shutdown = shutdown.clone();
            info!(worker_id, "启动消息总线 worker");
            handle.spawn(async move { broker.worker_loop(worker_id, shutdown).await });
        }

        handle
    }

    /// 关闭总线：拒绝新消息，已入队的消息由 worker 继续处理完
    pub fn shutdown(&self) {
        self.sender.lock().take();
        self.closing.send_replace(true);
        info!("消息总线已关闭");
    }

    pub fn is_closed(&self) -> bool {
        *self.closing.borrow()
    }

    async fn worker_loop(&self, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        loop {
            let next = tokio::select! {
                biased;

                _ = wait_for_shutdown(&mut shutdown) => {
                    info!(worker_id, "收到关闭信号，worker 退出");
                    return;
                }

                message = async { self.receiver.lock().await.recv().await } => message,
            };

            let Some(message) = next else {
                info!(worker_id, "消息队列已关闭，worker 退出");
                return;
            };

            self.dispatch(worker_id, message).await;
        }
    }

    /// 把一条消息交给该主题的全部 handler
    async fn dispatch(&self, worker_id: usize, message: Message) {
        // 先拷贝出 handler 列表，避免在 await 期间持有锁
        let handlers = self
            .consumers
            .read()
            .get(&message.topic)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            debug!(worker_id, topic = %message.topic, "主题没有消费者，丢弃消息");
            metrics::record_broker_message(&message.topic, "no_consumer");
            return;
        }

        for handler in handlers {
            let result = retry_with_policy(
                &self.retry_policy,
                &message.topic,
                |e: &anyhow::Error| !e.is::<PermanentError>(),
                || handler.handle(&message.payload),
            )
            .await;

            match result {
                Ok(()) => {
                    debug!(worker_id, topic = %message.topic, "消息处理完成");
                    metrics::record_broker_message(&message.topic, "delivered");
                }
                Err(e) => {
                    error!(
                        worker_id,
                        topic = %message.topic,
                        attempts = e.attempts(),
                        error = %e,
                        "handler 重试耗尽，丢弃消息"
                    );
                    metrics::record_broker_message(&message.topic, "dropped");
                }
            }
        }
    }
}
