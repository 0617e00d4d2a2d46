//! 事务单元（Unit of Work）
//!
//! `within` 在一个事务中执行闭包：闭包返回 Ok 时提交，返回 Err 时回滚，
//! 闭包 panic 时先回滚再把 panic 继续向上抛出。
//! 闭包内的所有仓储调用都必须使用传入的事务句柄，订单状态与余额入账才能作为一个整体生效。

use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{error, warn};

use crate::error::{LoyaltyError, Result};

/// 事务提供者
///
/// 生产环境使用 PostgreSQL 事务，测试环境使用内存存储的快照事务，
/// 二者对服务层暴露同一接口。
#[async_trait]
pub trait Transactor: Send + Sync {
    /// 事务句柄，仓储的事务内方法以 `&mut Self::Tx` 接收
    type Tx: Send + 'static;

    async fn begin(&self) -> Result<Self::Tx>;
    async fn commit(&self, tx: Self::Tx) -> Result<()>;
    async fn rollback(&self, tx: Self::Tx) -> Result<()>;
}

/// 在单个事务中执行 `f`
///
/// 闭包需要返回 `BoxFuture`，捕获的依赖应为自有值（如 `Arc` 克隆），
/// 这样 future 的生命周期只受事务句柄约束。
pub async fn within<T, R, E, F>(transactor: &T, f: F) -> std::result::Result<R, E>
where
    T: Transactor + ?Sized,
    E: From<LoyaltyError> + std::fmt::Display,
    F: for<'t> FnOnce(&'t mut T::Tx) -> BoxFuture<'t, std::result::Result<R, E>>,
{
    let mut tx = transactor.begin().await?;

    let outcome = AssertUnwindSafe(f(&mut tx)).catch_unwind().await;

    match outcome {
        Ok(Ok(value)) => {
            transactor.commit(tx).await.map_err(|e| {
                error!(error = %e, "事务提交失败");
                E::from(LoyaltyError::TransactionFailure(e.to_string()))
            })?;
            Ok(value)
        }
        Ok(Err(err)) => {
            if let Err(rollback_err) = transactor.rollback(tx).await {
                warn!(error = %rollback_err, cause = %err, "事务回滚失败");
            }
            Err(err)
        }
        Err(panic) => {
            if let Err(rollback_err) = transactor.rollback(tx).await {
                warn!(error = %rollback_err, "panic 后事务回滚失败");
            }
            std::panic::resume_unwind(panic)
        }
    }
}

/// PostgreSQL 事务提供者
#[derive(Clone)]
pub struct PgTransactor {
    pool: PgPool,
}

impl PgTransactor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Transactor for PgTransactor {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<()> {
        Ok(tx.commit().await?)
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<()> {
        Ok(tx.rollback().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// 记录提交/回滚次数的事务提供者，事务句柄是一个待写入的缓冲区
    #[derive(Default)]
    struct RecordingTransactor {
        committed: Mutex<Vec<Vec<&'static str>>>,
        rollbacks: Mutex<u32>,
        fail_commit: bool,
    }

    #[async_trait]
    impl Transactor for RecordingTransactor {
        type Tx = Vec<&'static str>;

        async fn begin(&self) -> Result<Self::Tx> {
            Ok(Vec::new())
        }

        async fn commit(&self, tx: Self::Tx) -> Result<()> {
            if self.fail_commit {
                return Err(LoyaltyError::Internal("commit refused".to_string()));
            }
            self.committed.lock().push(tx);
            Ok(())
        }

        async fn rollback(&self, _tx: Self::Tx) -> Result<()> {
            *self.rollbacks.lock() += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_within_commits_on_success() {
        let transactor = RecordingTransactor::default();

        let value: Result<u32> = within(&transactor, |tx| {
            Box::pin(async move {
                tx.push("status");
                tx.push("credit");
                Ok(7)
            })
        })
        .await;

        assert_eq!(value.unwrap(), 7);
        assert_eq!(*transactor.committed.lock(), vec![vec!["status", "credit"]]);
        assert_eq!(*transactor.rollbacks.lock(), 0);
    }

    #[tokio::test]
    async fn test_within_rolls_back_on_error() {
        let transactor = RecordingTransactor::default();

        let result: Result<()> = within(&transactor, |tx| {
            Box::pin(async move {
                tx.push("status");
                Err(LoyaltyError::Internal("credit failed".to_string()))
            })
        })
        .await;

        assert!(matches!(result, Err(LoyaltyError::Internal(_))));
        assert!(transactor.committed.lock().is_empty());
        assert_eq!(*transactor.rollbacks.lock(), 1);
    }

    #[tokio::test]
    async fn test_within_maps_commit_failure() {
        let transactor = RecordingTransactor {
            fail_commit: true,
            ..Default::default()
        };

        let result: Result<()> = within(&transactor, |_tx| Box::pin(async { Ok(()) })).await;

        assert!(matches!(result, Err(LoyaltyError::TransactionFailure(_))));
    }

    #[tokio::test]
    async fn test_within_rolls_back_and_repanics() {
        let transactor = Arc::new(RecordingTransactor::default());
        let inner = transactor.clone();

        let joined = tokio::spawn(async move {
            let _: Result<()> = within(inner.as_ref(), |tx| {
                Box::pin(async move {
                    tx.push("status");
                    if tx.len() == 1 {
                        panic!("boom");
                    }
                    Ok(())
                })
            })
            .await;
        })
        .await;

        assert!(joined.unwrap_err().is_panic());
        assert!(transactor.committed.lock().is_empty());
        assert_eq!(*transactor.rollbacks.lock(), 1);
    }
}
