//! 提现记录仓储

use async_trait::async_trait;
use loyalty_shared::error::Result;
use sqlx::{PgPool, Postgres, Transaction};

use super::traits::WithdrawalRepository;
use crate::models::Withdrawal;

pub struct PgWithdrawalRepository {
    pool: PgPool,
}

impl PgWithdrawalRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WithdrawalRepository for PgWithdrawalRepository {
    type Tx = Transaction<'static, Postgres>;

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Withdrawal>> {
        let withdrawals = sqlx::query_as::<_, Withdrawal>(
            r#"
            SELECT id, user_id, order_num, sum, processed_at
            FROM withdrawals
            WHERE user_id = $1
            ORDER BY processed_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(withdrawals)
    }

    async fn create(&self, tx: &mut Self::Tx, withdrawal: &Withdrawal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO withdrawals (id, user_id, order_num, sum, processed_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(withdrawal.id)
        .bind(&withdrawal.user_id)
        .bind(&withdrawal.order_number)
        .bind(withdrawal.sum)
        .bind(withdrawal.processed_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}
