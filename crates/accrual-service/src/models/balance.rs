use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 用户余额
///
/// `current` 为可用积分，`withdrawn` 为累计提现；`current` 永远不小于 0。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Balance {
    #[serde(with = "rust_decimal::serde::float")]
    pub current: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub withdrawn: Decimal,
}

impl Balance {
    pub fn new(current: Decimal, withdrawn: Decimal) -> Self {
        Self { current, withdrawn }
    }

    pub fn can_withdraw(&self, sum: Decimal) -> bool {
        sum <= self.current
    }
}
