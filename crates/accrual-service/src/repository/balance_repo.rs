//! 余额仓储
//!
//! 余额行在首次入账时创建；扣减使用条件更新，数据库层面保证 current 不为负。

use async_trait::async_trait;
use loyalty_shared::error::{LoyaltyError, Result};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};

use super::traits::BalanceRepository;
use crate::models::Balance;

pub struct PgBalanceRepository {
    pool: PgPool,
}

impl PgBalanceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BalanceRepository for PgBalanceRepository {
    type Tx = Transaction<'static, Postgres>;

    async fn get_by_user(&self, user_id: &str) -> Result<Balance> {
        let balance = sqlx::query_as::<_, Balance>(
            "SELECT current, withdrawn FROM balances WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(balance.unwrap_or_default())
    }

    async fn lock_by_user(&self, tx: &mut Self::Tx, user_id: &str) -> Result<Balance> {
        let balance = sqlx::query_as::<_, Balance>(
            "SELECT current, withdrawn FROM balances WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(balance.unwrap_or_default())
    }

    async fn credit(&self, tx: &mut Self::Tx, user_id: &str, amount: Decimal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO balances (user_id, current, withdrawn)
            VALUES ($1, $2, 0)
            ON CONFLICT (user_id) DO UPDATE SET current = balances.current + EXCLUDED.current
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn withdraw(&self, tx: &mut Self::Tx, user_id: &str, amount: Decimal) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE balances
            SET current = current - $2, withdrawn = withdrawn + $2
            WHERE user_id = $1 AND current >= $2
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            let available = self.lock_by_user(tx, user_id).await?.current;
            return Err(LoyaltyError::InsufficientFunds {
                required: amount,
                available,
            });
        }
        Ok(())
    }
}
