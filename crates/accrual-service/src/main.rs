//! 积分对账服务入口
//!
//! 启动消息总线与订单轮询器，收到 Ctrl-C 后依次停止后台任务并关闭数据库连接。

use std::sync::Arc;

use anyhow::Result;
use loyalty_shared::{
    broker::MessageBroker,
    config::{AppConfig, DispatchMode},
    database::Database,
    observability,
    transactor::PgTransactor,
};
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

use accrual_service::{
    AccrualClient, BrokerDispatcher, CheckDispatcher, OrderCheck, OrderCheckConsumer, OrderPoller,
    OrderService, PgBalanceRepository, PgOrderRepository, PoolDispatcher, ReconciliationService,
};

const SERVICE_NAME: &str = "accrual-service";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置
    let config = AppConfig::load(SERVICE_NAME)?;

    // 2. 初始化日志与指标
    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config)?;

    info!(environment = %config.environment, "Starting accrual-service...");

    if config.accrual.auto_register_unregistered && config.is_production() {
        warn!("生产环境开启了未登记订单自动登记，积分引擎将收到随机生成的商品数据");
    }

    // 3. 初始化数据库并执行迁移
    let db = Database::connect(&config.database).await?;
    db.health_check().await?;
    db.run_migrations().await?;
    let pool = db.pool().clone();
    info!("Database connection established");

    // 4. 创建仓储与服务
    let transactor = Arc::new(PgTransactor::new(pool.clone()));
    let order_repo = Arc::new(PgOrderRepository::new(pool.clone()));
    let balance_repo = Arc::new(PgBalanceRepository::new(pool.clone()));

    let broker = Arc::new(MessageBroker::new(&config.broker));

    let order_service = Arc::new(
        OrderService::new(transactor, order_repo.clone(), balance_repo).with_broker(broker.clone()),
    );

    let accrual = Arc::new(AccrualClient::new(&config.accrual)?);
    let reconciliation: Arc<dyn OrderCheck> = Arc::new(
        ReconciliationService::new(accrual, order_repo, order_service)
            .with_auto_register(config.accrual.auto_register_unregistered),
    );
    info!("Services initialized");

    // 5. 注册消费者并启动后台任务
    OrderCheckConsumer::register(&broker, reconciliation.clone());

    let dispatcher: Arc<dyn CheckDispatcher> = match config.poller.dispatch {
        DispatchMode::Broker => Arc::new(BrokerDispatcher::new(broker.clone())),
        DispatchMode::Pool => Arc::new(PoolDispatcher::new(
            reconciliation.clone(),
            config.poller.pool_width,
        )),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let broker_tasks = broker.run(shutdown_rx.clone());
    let poller = Arc::new(OrderPoller::new(
        reconciliation,
        dispatcher,
        config.poller.interval(),
    ));
    let poller_tasks = poller.run(shutdown_rx);

    info!(
        workers = config.broker.workers,
        dispatch = ?config.poller.dispatch,
        interval = ?config.poller.interval(),
        "accrual-service started"
    );

    // 6. 等待退出信号
    shutdown_signal().await;

    // 先停轮询，再关闭总线拒绝新消息，最后等待在途任务完成
    let _ = shutdown_tx.send(true);
    broker.shutdown();
    poller_tasks.join().await;
    broker_tasks.join().await;

    db.close().await;
    info!("accrual-service stopped");

    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down..."),
        Err(e) => warn!(error = %e, "无法监听 Ctrl+C，立即退出"),
    }
}
