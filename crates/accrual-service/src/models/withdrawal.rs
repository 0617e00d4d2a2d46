use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 提现记录，只在扣减余额的同一事务中创建
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Withdrawal {
    #[serde(skip)]
    pub id: Uuid,
    #[serde(skip)]
    pub user_id: String,
    #[serde(rename = "order")]
    #[sqlx(rename = "order_num")]
    pub order_number: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}

impl Withdrawal {
    pub fn new(user_id: impl Into<String>, order_number: impl Into<String>, sum: Decimal) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id: user_id.into(),
            order_number: order_number.into(),
            sum,
            processed_at: Utc::now(),
        }
    }
}
