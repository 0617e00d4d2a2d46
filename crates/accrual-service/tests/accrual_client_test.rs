//! 积分引擎客户端集成测试
//!
//! 在随机端口上启动 axum 模拟积分引擎，验证状态码处理与重试行为。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use accrual_service::{AccrualClient, AccrualError, AccrualService, AccrualStatus, RegisterOrder};
use axum::extract::Path;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use loyalty_shared::config::AccrualConfig;
use rust_decimal_macros::dec;
use serde_json::json;

// ==================== 测试辅助 ====================

async fn spawn_engine(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn client(base_url: &str) -> AccrualClient {
    AccrualClient::new(&AccrualConfig {
        base_url: base_url.to_string(),
        request_timeout_ms: 2_000,
        max_retries: 3,
        retry_wait_ms: 10,
        retry_max_wait_ms: 50,
        auto_register_unregistered: false,
    })
    .unwrap()
}

/// 前 `failures` 次返回 `failure`，之后返回 PROCESSED
fn flaky_engine(
    calls: Arc<AtomicUsize>,
    failures: usize,
    failure: fn() -> Response,
) -> Router {
    Router::new().route(
        "/api/orders/{number}",
        get(move |Path(number): Path<String>| {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < failures {
                    return failure();
                }
                Json(json!({ "order": number, "status": "PROCESSED", "accrual": 500 }))
                    .into_response()
            }
        }),
    )
}

// ==================== get_order ====================

#[tokio::test]
async fn test_get_order_parses_processed() {
    let calls = Arc::new(AtomicUsize::new(0));
    let base_url = spawn_engine(flaky_engine(calls.clone(), 0, || {
        StatusCode::OK.into_response()
    }))
    .await;

    let order = client(&base_url).get_order("79927398713").await.unwrap();

    assert_eq!(order.order, "79927398713");
    assert_eq!(order.status, AccrualStatus::Processed);
    assert_eq!(order.accrual, Some(dec!(500)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_get_order_no_content_is_unregistered() {
    let router = Router::new().route(
        "/api/orders/{number}",
        get(|| async { StatusCode::NO_CONTENT }),
    );
    let base_url = spawn_engine(router).await;

    let err = client(&base_url).get_order("79927398713").await.unwrap_err();
    assert!(matches!(err, AccrualError::Unregistered { ref number } if number == "79927398713"));
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let base_url = spawn_engine(flaky_engine(calls.clone(), 2, || {
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }))
    .await;

    let order = client(&base_url).get_order("79927398713").await.unwrap();

    assert_eq!(order.status, AccrualStatus::Processed);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retries_exhausted_surfaces_transient() {
    let calls = Arc::new(AtomicUsize::new(0));
    let base_url = spawn_engine(flaky_engine(calls.clone(), usize::MAX, || {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    }))
    .await;

    let err = client(&base_url).get_order("79927398713").await.unwrap_err();

    assert!(matches!(err, AccrualError::Transient { .. }));
    assert!(err.is_transient());
    // 首次请求 + 3 次重试
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_rate_limit_honors_retry_after() {
    let calls = Arc::new(AtomicUsize::new(0));
    let base_url = spawn_engine(flaky_engine(calls.clone(), 1, || {
        (StatusCode::TOO_MANY_REQUESTS, [(header::RETRY_AFTER, "1")]).into_response()
    }))
    .await;

    let started = Instant::now();
    let order = client(&base_url).get_order("79927398713").await.unwrap();

    assert_eq!(order.status, AccrualStatus::Processed);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_malformed_body_is_not_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let router = Router::new().route(
        "/api/orders/{number}",
        get({
            let calls = calls.clone();
            move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    "definitely not json"
                }
            }
        }),
    );
    let base_url = spawn_engine(router).await;

    let err = client(&base_url).get_order("79927398713").await.unwrap_err();

    assert!(matches!(err, AccrualError::Malformed(_)));
    assert!(!err.is_transient());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unexpected_status() {
    let router = Router::new().route(
        "/api/orders/{number}",
        get(|| async { (StatusCode::NOT_FOUND, "no such route") }),
    );
    let base_url = spawn_engine(router).await;

    let err = client(&base_url).get_order("79927398713").await.unwrap_err();
    assert!(matches!(
        err,
        AccrualError::UnexpectedStatus { status: 404, ref body } if body == "no such route"
    ));
}

#[tokio::test]
async fn test_connection_refused_is_transient() {
    // 绑定后立即释放端口，确保没有服务监听
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(&format!("http://{addr}"))
        .get_order("79927398713")
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

// ==================== register_order ====================

#[tokio::test]
async fn test_register_accepts_conflict_as_success() {
    let calls = Arc::new(AtomicUsize::new(0));
    let router = Router::new().route(
        "/api/orders",
        post({
            let calls = calls.clone();
            move |Json(body): Json<RegisterOrder>| {
                let calls = calls.clone();
                async move {
                    assert_eq!(body.order, "79927398713");
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        StatusCode::ACCEPTED
                    } else {
                        StatusCode::CONFLICT
                    }
                }
            }
        }),
    );
    let base_url = spawn_engine(router).await;
    let client = client(&base_url);

    let request = RegisterOrder {
        order: "79927398713".to_string(),
        goods: accrual_service::accrual_client::sample_goods(),
    };
    tokio_test::assert_ok!(client.register_order(&request).await);
    tokio_test::assert_ok!(client.register_order(&request).await);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
