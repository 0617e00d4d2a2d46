use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::OrderStatus;

/// 外部积分引擎返回的订单状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccrualStatus {
    /// 已登记，尚未开始计算
    Registered,
    Processing,
    Invalid,
    Processed,
}

impl From<AccrualStatus> for OrderStatus {
    fn from(status: AccrualStatus) -> Self {
        match status {
            AccrualStatus::Registered => OrderStatus::New,
            AccrualStatus::Processing => OrderStatus::Processing,
            AccrualStatus::Invalid => OrderStatus::Invalid,
            AccrualStatus::Processed => OrderStatus::Processed,
        }
    }
}

/// `GET /api/orders/{number}` 的响应体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccrualOrder {
    pub order: String,
    pub status: AccrualStatus,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub accrual: Option<Decimal>,
}

/// `POST /api/orders` 的请求体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterOrder {
    pub order: String,
    pub goods: Vec<Good>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Good {
    pub description: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
}
