//! 积分对账服务专用错误类型
//!
//! 在共享库 LoyaltyError 基础上定义外部积分引擎相关的错误变体：
//! 204 未登记、瞬时故障、限流、响应格式异常。

use std::time::Duration;

use loyalty_shared::error::LoyaltyError;

/// 积分对账错误
#[derive(Debug, thiserror::Error)]
pub enum AccrualError {
    /// 积分引擎返回 204：订单尚未登记，下一轮轮询会再次尝试，不属于故障
    #[error("订单未在积分引擎登记: {number}")]
    Unregistered { number: String },

    /// 网络错误或 5xx，重试耗尽后才会返回给调用方
    #[error("积分引擎暂时不可用: {message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },

    /// 429 限流，retry_after 为引擎建议的等待时间
    #[error("积分引擎限流, {retry_after:?} 后重试")]
    RateLimited { retry_after: Option<Duration> },

    /// 响应体无法解析为预期结构，不重试
    #[error("积分引擎响应格式异常: {0}")]
    Malformed(String),

    /// 其他非预期的状态码，不重试
    #[error("积分引擎返回非预期状态码 {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// 透传共享库错误，避免在每个 match 分支手动转换
    #[error(transparent)]
    Shared(#[from] LoyaltyError),
}

impl AccrualError {
    /// 是否为瞬时故障（可在退避后重试）
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient { .. } | Self::RateLimited { .. } => true,
            Self::Shared(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// 引擎通过 Retry-After 建议的等待时间
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } | Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// 对账结果标签，用于指标
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Unregistered { .. } => "unregistered",
            _ => "failed",
        }
    }
}

impl From<sqlx::Error> for AccrualError {
    fn from(err: sqlx::Error) -> Self {
        Self::Shared(LoyaltyError::Database(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AccrualError::Unregistered {
            number: "79927398713".to_string(),
        };
        assert_eq!(err.to_string(), "订单未在积分引擎登记: 79927398713");

        let err = AccrualError::UnexpectedStatus {
            status: 404,
            body: "not found".to_string(),
        };
        assert_eq!(err.to_string(), "积分引擎返回非预期状态码 404: not found");

        let shared_err = LoyaltyError::Validation("empty order".to_string());
        let err = AccrualError::Shared(shared_err);
        assert_eq!(err.to_string(), "参数验证失败: empty order");
    }

    #[test]
    fn test_is_transient() {
        assert!(
            AccrualError::Transient {
                message: "connection reset".to_string(),
                retry_after: None,
            }
            .is_transient()
        );
        assert!(AccrualError::RateLimited { retry_after: None }.is_transient());
        assert!(!AccrualError::Malformed("eof".to_string()).is_transient());
        assert!(
            !AccrualError::Unregistered {
                number: "1".to_string()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_retry_after() {
        let wait = Duration::from_secs(3);
        assert_eq!(
            AccrualError::RateLimited {
                retry_after: Some(wait)
            }
            .retry_after(),
            Some(wait)
        );
        assert_eq!(AccrualError::Malformed("x".to_string()).retry_after(), None);
    }
}
