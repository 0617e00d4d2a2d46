//! 后台任务句柄
//!
//! 消息总线和轮询器都以显式句柄返回其后台任务，
//! 调用方在发出关闭信号后通过 `join` 等待所有任务自然退出。

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// 一组后台任务的句柄
pub struct TaskHandle {
    name: &'static str,
    tasks: JoinSet<()>,
}

impl TaskHandle {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            tasks: JoinSet::new(),
        }
    }

    pub fn spawn<F>(&mut self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(future);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// 等待所有任务结束；任务 panic 只记录日志
    pub async fn join(mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!(task = self.name, error = %e, "后台任务异常退出");
            }
        }
        info!(task = self.name, "后台任务已全部退出");
    }
}

/// 等待关闭信号变为 `true`
///
/// 发送端被丢弃时不视为关闭，此后永远挂起，由调用方的其他分支决定何时退出。
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        warn!("关闭信号发送端已丢弃");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_join_waits_for_all_tasks() {
        let finished = Arc::new(AtomicU32::new(0));
        let mut handle = TaskHandle::new("test");

        for _ in 0..3 {
            let finished = finished.clone();
            handle.spawn(async move {
                tokio::task::yield_now().await;
                finished.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(handle.len(), 3);

        handle.join().await;
        assert_eq!(finished.load(Ordering::SeqCst), 3);
    }
}
