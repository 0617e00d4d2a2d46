use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 订单状态
///
/// 只能向前推进：NEW -> PROCESSING -> {PROCESSED, INVALID}，后两者为终态。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "varchar", rename_all = "UPPERCASE")]
pub enum OrderStatus {
    /// 已上传，积分引擎尚未开始处理
    #[default]
    New,
    /// 积分引擎计算中
    Processing,
    /// 已计算出积分并入账
    Processed,
    /// 积分引擎拒绝计算
    Invalid,
}

/// 轮询器需要继续跟踪的状态
pub const AWAITING_STATUSES: [OrderStatus; 2] = [OrderStatus::New, OrderStatus::Processing];

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Processed | Self::Invalid)
    }

    fn rank(self) -> u8 {
        match self {
            Self::New => 0,
            Self::Processing => 1,
            Self::Processed | Self::Invalid => 2,
        }
    }

    /// 是否允许从当前状态推进到 `target`
    ///
    /// 终态不再变化；相同状态视为重复转换，不允许。
    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        !self.is_terminal() && target.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Processing => "PROCESSING",
            Self::Processed => "PROCESSED",
            Self::Invalid => "INVALID",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 用户上传的订单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    #[serde(rename = "number")]
    #[sqlx(rename = "order_num")]
    pub number: String,
    #[serde(skip)]
    pub user_id: String,
    pub status: OrderStatus,
    /// 仅在状态变为 PROCESSED 时写入一次
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
}

impl Order {
    pub fn new(number: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            user_id: user_id.into(),
            status: OrderStatus::New,
            accrual: None,
            uploaded_at: Utc::now(),
        }
    }
}
