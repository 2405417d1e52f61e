//! Prometheus 指标模块
//!
//! 基于 metrics crate 与 metrics-exporter-prometheus 收集和导出指标。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 安装 recorder 并在 `metrics_port` 上启动 `/metrics` 服务
pub async fn init(service_name: &str, metrics_port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册指标描述，出现在 `/metrics` 的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!("checkins_total", "Total number of successful check-ins");
    metrics::describe_counter!(
        "checkin_rejections_total",
        "Check-ins rejected by geofence, duplicate or token checks"
    );
    metrics::describe_counter!("reward_claims_total", "Total number of reward claims");
    metrics::describe_counter!("redemptions_total", "Redemption orders by resulting status");
    metrics::describe_counter!("points_changes_total", "Blessing point ledger entries");
    metrics::describe_counter!("points_amount_total", "Absolute blessing points moved");
    metrics::describe_histogram!(
        "checkin_duration_seconds",
        "Check-in transaction duration in seconds"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录成功签到
///
/// `scope` 为 `temple`（寺庙签到）或 `general`（未指定寺庙）
#[inline]
pub fn record_checkin(method: &str, scope: &str, duration_secs: f64) {
    metrics::counter!(
        "checkins_total",
        "method" => method.to_string(),
        "scope" => scope.to_string()
    )
    .increment(1);

    metrics::histogram!("checkin_duration_seconds", "method" => method.to_string())
        .record(duration_secs);
}

/// 记录被拒绝的签到
#[inline]
pub fn record_checkin_rejection(reason: &str) {
    metrics::counter!("checkin_rejections_total", "reason" => reason.to_string()).increment(1);
}

/// 记录奖励领取
#[inline]
pub fn record_reward_claim(reward_type: &str, claim_type: &str) {
    metrics::counter!(
        "reward_claims_total",
        "reward_type" => reward_type.to_string(),
        "claim_type" => claim_type.to_string()
    )
    .increment(1);
}

/// 记录兑换订单状态变化
#[inline]
pub fn record_redemption(status: &str) {
    metrics::counter!("redemptions_total", "status" => status.to_string()).increment(1);
}

/// 记录功德值流水
#[inline]
pub fn record_points_change(kind: &str, delta: i64) {
    metrics::counter!("points_changes_total", "kind" => kind.to_string()).increment(1);
    metrics::counter!("points_amount_total", "kind" => kind.to_string())
        .increment(delta.unsigned_abs());
}
