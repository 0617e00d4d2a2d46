//! 重试策略与执行器
//!
//! 提供线性/指数退避重试机制，用于瞬时故障（网络抖动、数据库连接池满等）的自动恢复。
//! 业务逻辑错误（如余额不足）不应被重试——由调用方通过 `is_retryable` 闭包控制。

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

// ---------------------------------------------------------------------------
// RetryPolicy — 重试策略配置
// ---------------------------------------------------------------------------

/// 退避方式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// 第 N 次失败后等待 initial_delay * N
    Linear,
    /// 第 N 次失败后等待 initial_delay * multiplier^(N-1)
    Exponential { multiplier: f64 },
}

/// 重试策略配置
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大重试次数（不含首次执行）
    pub max_retries: u32,
    /// 首次重试前的等待时间，线性退避时即为退避单位
    pub initial_delay: Duration,
    /// 退避时间上限，防止等待过长
    pub max_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    /// 默认策略：最多重试 3 次，初始等待 1 秒，最大等待 5 秒，指数倍数 2.0
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            backoff: Backoff::Exponential { multiplier: 2.0 },
        }
    }
}

impl RetryPolicy {
    /// 线性退避策略：总共尝试 `max_attempts` 次，第 N 次失败后等待 N * unit
    pub fn linear(max_attempts: u32, unit: Duration) -> Self {
        Self {
            max_retries: max_attempts.saturating_sub(1),
            initial_delay: unit,
            max_delay: unit.saturating_mul(max_attempts.max(1)),
            backoff: Backoff::Linear,
        }
    }

    /// 指数退避策略
    pub fn exponential(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff: Backoff::Exponential { multiplier: 2.0 },
        }
    }

    /// 最大尝试次数（含首次）
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// 计算第 N 次重试的等待时间（attempt 从 0 开始，即已失败 attempt+1 次）
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = match self.backoff {
            Backoff::Linear => base_ms * f64::from(attempt + 1),
            Backoff::Exponential { multiplier } => base_ms * multiplier.powi(attempt as i32),
        };
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// 是否应继续重试
    ///
    /// attempt 表示已经完成的重试轮次（从 0 开始），
    /// 当 attempt < max_retries 时返回 true。
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

// ---------------------------------------------------------------------------
// RetryError — 重试失败的结果
// ---------------------------------------------------------------------------

/// 重试执行器的失败结果
#[derive(Debug)]
pub enum RetryError<E> {
    /// 不可重试的错误，首次出现即返回
    Permanent(E),
    /// 所有尝试均失败，按发生顺序保留每一次的错误
    Exhausted { attempts: u32, errors: Vec<E> },
}

impl<E> RetryError<E> {
    /// 取出最后一次的错误
    pub fn into_last(self) -> Option<E> {
        match self {
            Self::Permanent(err) => Some(err),
            Self::Exhausted { errors, .. } => errors.into_iter().last(),
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Permanent(_) => 1,
            Self::Exhausted { attempts, .. } => *attempts,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permanent(err) => write!(f, "不可重试的错误: {err}"),
            Self::Exhausted { attempts, errors } => {
                write!(f, "尝试 {attempts} 次后仍失败: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "#{} {err}", i + 1)?;
                }
                Ok(())
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

// ---------------------------------------------------------------------------
// retry_with_policy — 带重试的异步执行器
// ---------------------------------------------------------------------------

/// 带重试的异步执行器
///
/// 对任意异步操作应用重试策略。仅在操作返回可重试错误时才重试，
/// 业务逻辑错误直接以 `RetryError::Permanent` 返回。
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut attempt: u32 = 0;
    let mut errors = Vec::new();

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(operation = operation_name, attempt, "操作在重试后成功");
                }
                return Ok(value);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    warn!(
                        operation = operation_name,
                        error = %err,
                        "操作失败且不可重试，直接返回错误"
                    );
                    if errors.is_empty() {
                        return Err(RetryError::Permanent(err));
                    }
                    errors.push(err);
                    return Err(RetryError::Exhausted {
                        attempts: attempt + 1,
                        errors,
                    });
                }

                if !policy.should_retry(attempt) {
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_retries = policy.max_retries,
                        error = %err,
                        "已达最大重试次数，放弃重试"
                    );
                    errors.push(err);
                    return Err(RetryError::Exhausted {
                        attempts: attempt + 1,
                        errors,
                    });
                }

                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "操作失败，将在退避后重试"
                );
                errors.push(err);

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_exponential_delay_capped_at_max() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        // 8s -> 受限于 max_delay -> 5s
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(5));
    }

    #[test]
    fn test_linear_delay_grows_by_unit() {
        let policy = RetryPolicy::linear(7, Duration::from_millis(100));

        assert_eq!(policy.max_retries, 6);
        assert_eq!(policy.max_attempts(), 7);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(600));
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy {
            max_retries: 3,
            ..RetryPolicy::default()
        };

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_exhausted_display_joins_errors() {
        let err: RetryError<String> = RetryError::Exhausted {
            attempts: 2,
            errors: vec!["timeout".to_string(), "reset".to_string()],
        };
        assert_eq!(err.to_string(), "尝试 2 次后仍失败: #1 timeout; #2 reset");
        assert_eq!(err.into_last().as_deref(), Some("reset"));
    }

    #[tokio::test]
    async fn test_retry_with_policy_succeeds_after_retries() {
        let policy = RetryPolicy::linear(3, Duration::from_millis(1));
        let call_count = Arc::new(AtomicU32::new(0));
        let counter = call_count.clone();

        let result = retry_with_policy(
            &policy,
            "test_op",
            |_: &String| true,
            || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err("模拟瞬时故障".to_string())
                    } else {
                        Ok(99)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 99);
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_with_policy_exhausts_and_keeps_every_error() {
        let policy = RetryPolicy::linear(7, Duration::from_millis(1));
        let call_count = Arc::new(AtomicU32::new(0));
        let counter = call_count.clone();

        let result: Result<(), _> = retry_with_policy(
            &policy,
            "test_op",
            |_: &String| true,
            || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    Err(format!("failure {n}"))
                }
            },
        )
        .await;

        match result {
            Err(RetryError::Exhausted { attempts, errors }) => {
                assert_eq!(attempts, 7);
                assert_eq!(errors.len(), 7);
                assert_eq!(errors[6], "failure 6");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(call_count.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_retry_with_policy_stops_on_permanent_error() {
        let policy = RetryPolicy::linear(7, Duration::from_millis(1));
        let call_count = Arc::new(AtomicU32::new(0));
        let counter = call_count.clone();

        let result: Result<(), _> = retry_with_policy(
            &policy,
            "test_op",
            |e: &String| e != "invalid",
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("invalid".to_string())
                }
            },
        )
        .await;

        assert!(matches!(result, Err(RetryError::Permanent(ref e)) if e == "invalid"));
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }
}
