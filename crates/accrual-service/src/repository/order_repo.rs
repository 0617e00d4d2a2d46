//! 订单仓储
//!
//! 订单号全局唯一；状态与积分只在事务内修改，由调用方先行锁定订单行。

use async_trait::async_trait;
use loyalty_shared::error::{LoyaltyError, Result};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};

use super::traits::OrderRepository;
use crate::models::{Order, OrderStatus};

pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    type Tx = Transaction<'static, Postgres>;

    async fn create(&self, order: &Order) -> Result<Order> {
        let created = sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (order_num, user_id, status, accrual, uploaded_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING order_num, user_id, status, accrual, uploaded_at
            "#,
        )
        .bind(&order.number)
        .bind(&order.user_id)
        .bind(order.status)
        .bind(order.accrual)
        .bind(order.uploaded_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                LoyaltyError::AlreadyExists {
                    entity: "Order".to_string(),
                    field: "number".to_string(),
                    value: order.number.clone(),
                }
            }
            other => LoyaltyError::Database(other),
        })?;

        Ok(created)
    }

    async fn get_by_number(&self, number: &str) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT order_num, user_id, status, accrual, uploaded_at
            FROM orders
            WHERE order_num = $1
            "#,
        )
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    async fn list_by_statuses(&self, statuses: &[OrderStatus]) -> Result<Vec<Order>> {
        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();

        let orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT order_num, user_id, status, accrual, uploaded_at
            FROM orders
            WHERE status = ANY($1::varchar[])
            ORDER BY uploaded_at DESC
            "#,
        )
        .bind(statuses)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT order_num, user_id, status, accrual, uploaded_at
            FROM orders
            WHERE user_id = $1
            ORDER BY uploaded_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }

    async fn lock_by_number(&self, tx: &mut Self::Tx, number: &str) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT order_num, user_id, status, accrual, uploaded_at
            FROM orders
            WHERE order_num = $1
            FOR UPDATE
            "#,
        )
        .bind(number)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(order)
    }

    async fn update_status(
        &self,
        tx: &mut Self::Tx,
        number: &str,
        status: OrderStatus,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE orders SET status = $2 WHERE order_num = $1")
            .bind(number)
            .bind(status)
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LoyaltyError::not_found("Order", number));
        }
        Ok(())
    }

    async fn update_accrual(
        &self,
        tx: &mut Self::Tx,
        number: &str,
        accrual: Decimal,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE orders SET accrual = $2 WHERE order_num = $1")
            .bind(number)
            .bind(accrual)
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LoyaltyError::not_found("Order", number));
        }
        Ok(())
    }
}
