//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 未安装 recorder 时所有记录函数都是空操作，测试无需额外初始化。

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

use crate::config::ObservabilityConfig;

/// 安装全局 recorder，并在 metrics_port 上暴露 `/metrics`
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .add_global_label("service", config.service_name.clone())
        .install()?;

    describe_metrics();
    info!(%addr, "Metrics server started");
    Ok(())
}

fn describe_metrics() {
    ::metrics::describe_counter!(
        "loyalty_order_checks_total",
        "Reconciliation outcomes per order check"
    );
    ::metrics::describe_counter!(
        "loyalty_accrual_requests_total",
        "Requests sent to the external accrual engine"
    );
    ::metrics::describe_histogram!(
        "loyalty_accrual_request_duration_seconds",
        "Accrual engine round trip in seconds"
    );
    ::metrics::describe_counter!(
        "loyalty_broker_messages_total",
        "In-process broker messages by outcome"
    );
    ::metrics::describe_counter!(
        "loyalty_poller_iterations_total",
        "Poller iterations by outcome"
    );
    ::metrics::describe_counter!(
        "loyalty_poller_orders_dispatched_total",
        "Orders dispatched for checking by the poller"
    );
    ::metrics::describe_histogram!(
        "loyalty_balance_credit_amount",
        "Accrual amount credited per processed order"
    );
    ::metrics::describe_gauge!(
        "loyalty_worker_last_run_timestamp",
        "Unix timestamp of the last background iteration"
    );
}

/// 记录一次订单对账结果
#[inline]
pub fn record_order_check(outcome: &str) {
    ::metrics::counter!("loyalty_order_checks_total", "outcome" => outcome.to_string())
        .increment(1);
}

/// 记录一次积分引擎请求
#[inline]
pub fn record_accrual_request(status: &str, duration_secs: f64) {
    ::metrics::counter!("loyalty_accrual_requests_total", "status" => status.to_string())
        .increment(1);
    ::metrics::histogram!(
        "loyalty_accrual_request_duration_seconds",
        "status" => status.to_string()
    )
    .record(duration_secs);
}

/// 记录消息总线的投递结果
#[inline]
pub fn record_broker_message(topic: &str, outcome: &str) {
    ::metrics::counter!(
        "loyalty_broker_messages_total",
        "topic" => topic.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录一次轮询
#[inline]
pub fn record_poller_iteration(outcome: &str, dispatched: usize) {
    ::metrics::counter!("loyalty_poller_iterations_total", "outcome" => outcome.to_string())
        .increment(1);
    ::metrics::counter!("loyalty_poller_orders_dispatched_total").increment(dispatched as u64);
}

/// 记录入账金额
#[inline]
pub fn record_balance_credit(amount: f64) {
    ::metrics::histogram!("loyalty_balance_credit_amount").record(amount);
}

/// 记录后台任务的最近一次运行时间
#[inline]
pub fn set_worker_last_run(worker: &str) {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();
    ::metrics::gauge!("loyalty_worker_last_run_timestamp", "worker" => worker.to_string())
        .set(now);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        record_order_check("processed");
        record_accrual_request("200", 0.01);
        record_broker_message("order.check", "delivered");
        record_poller_iteration("ok", 3);
        record_balance_credit(729.98);
        set_worker_last_run("order_poller");
    }
}
