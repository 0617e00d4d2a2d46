//! 余额服务
//!
//! 提现在一个事务内完成：锁定余额、校验、扣减、写入提现记录。

use std::sync::Arc;

use loyalty_shared::error::{LoyaltyError, Result};
use loyalty_shared::transactor::{Transactor, within};
use loyalty_shared::validation::validate_order_number;
use rust_decimal::Decimal;
use tracing::{info, instrument};

use crate::models::{Balance, Withdrawal};
use crate::repository::{BalanceRepository, WithdrawalRepository};

pub struct BalanceService<T, B, W>
where
    T: Transactor,
    B: BalanceRepository<Tx = T::Tx> + 'static,
    W: WithdrawalRepository<Tx = T::Tx> + 'static,
{
    transactor: Arc<T>,
    balances: Arc<B>,
    withdrawals: Arc<W>,
}

impl<T, B, W> BalanceService<T, B, W>
where
    T: Transactor,
    B: BalanceRepository<Tx = T::Tx> + 'static,
    W: WithdrawalRepository<Tx = T::Tx> + 'static,
{
    pub fn new(transactor: Arc<T>, balances: Arc<B>, withdrawals: Arc<W>) -> Self {
        Self {
            transactor,
            balances,
            withdrawals,
        }
    }

    pub async fn get_balance(&self, user_id: &str) -> Result<Balance> {
        self.balances.get_by_user(user_id).await
    }

    /// 提现
    ///
    /// `order_number` 是提现所抵扣的订单号，只校验格式，不要求已上传。
    #[instrument(skip(self))]
    pub async fn withdraw(&self, user_id: &str, order_number: &str, sum: Decimal) -> Result<Withdrawal> {
        validate_order_number(order_number)?;
        if sum <= Decimal::ZERO {
            return Err(LoyaltyError::Validation(format!("提现金额必须大于 0: {sum}")));
        }

        let balances = self.balances.clone();
        let withdrawals = self.withdrawals.clone();
        let withdrawal = Withdrawal::new(user_id, order_number, sum);

        within(self.transactor.as_ref(), move |tx| {
            Box::pin(async move {
                let balance = balances.lock_by_user(tx, &withdrawal.user_id).await?;
                if !balance.can_withdraw(sum) {
                    return Err(LoyaltyError::InsufficientFunds {
                        required: sum,
                        available: balance.current,
                    });
                }

                balances.withdraw(tx, &withdrawal.user_id, sum).await?;
                withdrawals.create(tx, &withdrawal).await?;

                info!(
                    user_id = %withdrawal.user_id,
                    order = %withdrawal.order_number,
                    %sum,
                    "提现成功"
                );
                Ok(withdrawal)
            })
        })
        .await
    }

    pub async fn list_withdrawals(&self, user_id: &str) -> Result<Vec<Withdrawal>> {
        self.withdrawals.list_by_user(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;
    use rust_decimal_macros::dec;

    async fn seeded() -> (MemoryStore, BalanceService<MemoryStore, MemoryStore, MemoryStore>) {
        let store = MemoryStore::new();
        store
            .seed_balance("user-1", Balance::new(dec!(100), dec!(20)))
            .await;
        let shared = Arc::new(store.clone());
        (store, BalanceService::new(shared.clone(), shared.clone(), shared))
    }

    #[tokio::test]
    async fn test_withdraw_moves_funds() {
        let (_store, service) = seeded().await;

        let withdrawal = service
            .withdraw("user-1", "2377225624", dec!(65))
            .await
            .unwrap();
        assert_eq!(withdrawal.sum, dec!(65));

        assert_eq!(
            service.get_balance("user-1").await.unwrap(),
            Balance::new(dec!(35), dec!(85))
        );
        let history = service.list_withdrawals("user-1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].order_number, "2377225624");
    }

    #[tokio::test]
    async fn test_withdraw_insufficient_funds_keeps_balance() {
        let (_store, service) = seeded().await;

        let err = service
            .withdraw("user-1", "2377225624", dec!(120))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LoyaltyError::InsufficientFunds { required, available }
                if required == dec!(120) && available == dec!(100)
        ));

        assert_eq!(
            service.get_balance("user-1").await.unwrap(),
            Balance::new(dec!(100), dec!(20))
        );
        assert!(service.list_withdrawals("user-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_withdraw_validates_input() {
        let (_store, service) = seeded().await;

        let err = service
            .withdraw("user-1", "12345", dec!(10))
            .await
            .unwrap_err();
        assert!(matches!(err, LoyaltyError::InvalidOrderNumber { .. }));

        let err = service
            .withdraw("user-1", "2377225624", dec!(0))
            .await
            .unwrap_err();
        assert!(matches!(err, LoyaltyError::Validation(_)));
    }
}
