//! 可观测性模块集成测试
//!
//! 全局 subscriber 每个进程只能安装一次，因此初始化相关断言集中在一个用例中。

use loyalty_shared::config::ObservabilityConfig;
use loyalty_shared::observability::{self, metrics};

#[test]
fn test_init_once_then_reject_second_subscriber() {
    let config = ObservabilityConfig {
        log_format: "json".to_string(),
        log_level: "debug".to_string(),
        ..Default::default()
    }
    .with_service_name("observability-test");
    assert!(config.json_logs());

    let guard = observability::init(&config).expect("首次初始化应成功");
    tracing::info!(order = "79927398713", "logging initialized");

    assert!(observability::init(&config).is_err());
    drop(guard);
}

#[test]
fn test_recording_without_recorder_is_noop() {
    metrics::record_order_check("processed");
    metrics::record_order_check("unregistered");
    metrics::record_accrual_request("200", 0.02);
    metrics::record_accrual_request("error", 2.0);
    metrics::record_broker_message("order.check", "dropped");
    metrics::record_poller_iteration("idle", 0);
    metrics::record_balance_credit(0.01);
    metrics::set_worker_last_run("order_poller");
}
