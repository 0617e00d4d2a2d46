//! 外部积分引擎 HTTP 客户端
//!
//! 通过 AccrualService trait 抽象 HTTP 调用，便于测试时注入 mock 实现。
//!
//! 状态码约定：
//! - 200：返回订单状态
//! - 204：订单未登记
//! - 429 / 5xx：瞬时故障，按 Retry-After 或退避策略重试
//! - 其他：非预期响应，不重试

use std::time::{Duration, Instant};

use async_trait::async_trait;
use loyalty_shared::config::AccrualConfig;
use loyalty_shared::error::LoyaltyError;
use loyalty_shared::observability::metrics;
use loyalty_shared::retry::RetryPolicy;
use rand::Rng;
use reqwest::{Response, StatusCode, header};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::error::AccrualError;
use crate::models::{AccrualOrder, Good, RegisterOrder};

// ---------------------------------------------------------------------------
// Trait 抽象
// ---------------------------------------------------------------------------

/// 积分引擎客户端接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccrualService: Send + Sync {
    /// 查询订单的积分计算状态
    async fn get_order(&self, number: &str) -> Result<AccrualOrder, AccrualError>;

    /// 向积分引擎登记订单，重复登记视为成功
    async fn register_order(&self, order: &RegisterOrder) -> Result<(), AccrualError>;
}

// ---------------------------------------------------------------------------
// HTTP 客户端实现
// ---------------------------------------------------------------------------

pub struct AccrualClient {
    http: reqwest::Client,
    base_url: String,
    retry_policy: RetryPolicy,
}

impl AccrualClient {
    pub fn new(config: &AccrualConfig) -> Result<Self, AccrualError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| LoyaltyError::Config(format!("无法创建积分引擎 HTTP 客户端: {e}")))?;

        info!(base_url = %config.base_url, "积分引擎客户端已初始化");

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry_policy: RetryPolicy::exponential(
                config.max_retries,
                Duration::from_millis(config.retry_wait_ms),
                Duration::from_millis(config.retry_max_wait_ms),
            ),
        })
    }

    /// 发送请求，瞬时故障时重试
    ///
    /// 返回的响应状态码一定不是 429 或 5xx；重试耗尽时返回最后一次的瞬时错误。
    async fn send_with_retry<F>(
        &self,
        operation: &'static str,
        build: F,
    ) -> Result<Response, AccrualError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt: u32 = 0;

        loop {
            let started = Instant::now();
            let result = build().send().await;
            let elapsed = started.elapsed().as_secs_f64();

            let err = match result {
                Ok(response) => {
                    let status = response.status();
                    metrics::record_accrual_request(status.as_str(), elapsed);

                    match classify_status(status, &response) {
                        Some(err) => err,
                        None => return Ok(response),
                    }
                }
                Err(e) => {
                    metrics::record_accrual_request("error", elapsed);
                    if e.is_builder() {
                        return Err(
                            LoyaltyError::Validation(format!("无效的积分引擎请求: {e}")).into()
                        );
                    }
                    AccrualError::Transient {
                        message: e.to_string(),
                        retry_after: None,
                    }
                }
            };

            if !self.retry_policy.should_retry(attempt) {
                warn!(operation, attempts = attempt + 1, error = %err, "积分引擎重试耗尽");
                return Err(err);
            }

            let delay = err
                .retry_after()
                .unwrap_or_else(|| self.retry_policy.delay_for_attempt(attempt));
            warn!(
                operation,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "积分引擎暂时不可用，等待后重试"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// 429 与 5xx 转换为瞬时错误，其余状态交给调用方处理
fn classify_status(status: StatusCode, response: &Response) -> Option<AccrualError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Some(AccrualError::RateLimited {
            retry_after: parse_retry_after(response),
        });
    }
    if status.is_server_error() {
        return Some(AccrualError::Transient {
            message: format!("HTTP {status}"),
            retry_after: parse_retry_after(response),
        });
    }
    None
}

/// 只支持秒数形式的 Retry-After
fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

async fn unexpected(response: Response) -> AccrualError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    AccrualError::UnexpectedStatus { status, body }
}

#[async_trait]
impl AccrualService for AccrualClient {
    async fn get_order(&self, number: &str) -> Result<AccrualOrder, AccrualError> {
        let url = format!("{}/api/orders/{}", self.base_url, number);
        let response = self
            .send_with_retry("get_order", || self.http.get(&url))
            .await?;

        match response.status() {
            StatusCode::OK => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| AccrualError::Malformed(e.to_string()))?;
                let order: AccrualOrder = serde_json::from_slice(&body)
                    .map_err(|e| AccrualError::Malformed(e.to_string()))?;
                debug!(order = %order.order, status = ?order.status, "积分引擎返回订单状态");
                Ok(order)
            }
            StatusCode::NO_CONTENT => Err(AccrualError::Unregistered {
                number: number.to_string(),
            }),
            _ => Err(unexpected(response).await),
        }
    }

    async fn register_order(&self, order: &RegisterOrder) -> Result<(), AccrualError> {
        let url = format!("{}/api/orders", self.base_url);
        let response = self
            .send_with_retry("register_order", || self.http.post(&url).json(order))
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::ACCEPTED => {
                info!(order = %order.order, "订单已在积分引擎登记");
                Ok(())
            }
            StatusCode::CONFLICT => {
                debug!(order = %order.order, "订单已登记过");
                Ok(())
            }
            _ => Err(unexpected(response).await),
        }
    }
}

/// 生成一组随机商品，用于自动登记未知订单
pub fn sample_goods() -> Vec<Good> {
    const ITEMS: [&str; 4] = ["Bork 电水壶", "LG 洗衣机", "Samsung 显示器", "Dyson 吸尘器"];

    let mut rng = rand::rng();
    let count = rng.random_range(1..=3);

    (0..count)
        .map(|_| Good {
            description: ITEMS[rng.random_range(0..ITEMS.len())].to_string(),
            price: Decimal::new(rng.random_range(100..1_000_000), 2),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_sample_goods_are_priced() {
        for _ in 0..20 {
            let goods = sample_goods();
            assert!((1..=3).contains(&goods.len()));
            assert!(goods.iter().all(|g| g.price >= dec!(1) && !g.description.is_empty()));
        }
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let config = AccrualConfig {
            base_url: "http://accrual.local/".to_string(),
            ..Default::default()
        };
        let client = AccrualClient::new(&config).unwrap();
        assert_eq!(client.base_url, "http://accrual.local");
        assert_eq!(client.retry_policy.max_retries, 3);
    }
}
