//! 统一可观测性模块
//!
//! 提供日志与 Prometheus 指标的统一初始化。
//! 所有服务通过单一入口点配置可观测性，确保一致的指标命名。

pub mod logging;
pub mod metrics;

use anyhow::Result;
use tracing::info;

use crate::config::ObservabilityConfig;

/// 可观测性资源守卫
///
/// 当 Guard 被 drop 时记录关闭日志；指标导出器随进程退出一并结束。
pub struct ObservabilityGuard {
    metrics_enabled: bool,
}

impl ObservabilityGuard {
    /// 创建一个空的 Guard（用于测试或禁用可观测性时）
    pub fn empty() -> Self {
        Self {
            metrics_enabled: false,
        }
    }
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        info!(metrics_enabled = self.metrics_enabled, "Shutting down observability...");
    }
}

/// 统一初始化可观测性
///
/// 初始化顺序：
/// 1. 日志（tracing subscriber）
/// 2. Metrics（Prometheus 导出，按配置开启）
pub fn init(config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    logging::init(config)?;

    if config.metrics_enabled {
        metrics::init(config)?;
    }

    info!(
        service = %config.service_name,
        metrics_enabled = config.metrics_enabled,
        metrics_port = config.metrics_port,
        "Observability initialized"
    );

    Ok(ObservabilityGuard {
        metrics_enabled: config.metrics_enabled,
    })
}
