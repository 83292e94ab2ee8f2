//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 与 `/health`。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    describe_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

fn describe_metrics(service_name: &str) {
    metrics::describe_counter!("badge_awards_total", "Badge award attempts by outcome");
    metrics::describe_histogram!(
        "badge_award_duration_seconds",
        "Badge award duration in seconds"
    );
    metrics::describe_counter!(
        "award_inconsistencies_total",
        "On-chain submissions that could not be persisted locally"
    );
    metrics::describe_counter!(
        "chain_submissions_total",
        "On-chain transaction submissions"
    );
    metrics::describe_counter!(
        "chain_status_checks_total",
        "Transaction status lookups by resolved status"
    );
    metrics::describe_counter!(
        "award_reconciliations_total",
        "Pending awards resolved by reconciliation"
    );
    metrics::describe_counter!(
        "notification_deliveries_total",
        "Notification deliveries per sink and result"
    );
    metrics::describe_counter!("heartbeat_ticks_total", "Heartbeat publish attempts");
    metrics::describe_counter!(
        "pubsub_state_transitions_total",
        "Pub/sub connection state transitions"
    );
    metrics::describe_gauge!(
        "worker_last_run_timestamp_seconds",
        "Unix timestamp of the last worker iteration"
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

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 记录函数
// ============================================================================

/// 记录一次发放
#[inline]
pub fn record_award(badge_type: &str, outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "badge_awards_total",
        "badge_type" => badge_type.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "badge_award_duration_seconds",
        "badge_type" => badge_type.to_string()
    )
    .record(duration_secs);
}

/// 链上已提交但本地落库失败
#[inline]
pub fn record_award_inconsistency(badge_type: &str) {
    metrics::counter!(
        "award_inconsistencies_total",
        "badge_type" => badge_type.to_string()
    )
    .increment(1);
}

#[inline]
pub fn record_chain_submission(operation: &str, success: bool) {
    metrics::counter!(
        "chain_submissions_total",
        "operation" => operation.to_string(),
        "success" => success.to_string()
    )
    .increment(1);
}

#[inline]
pub fn record_status_check(status: &str) {
    metrics::counter!("chain_status_checks_total", "status" => status.to_string()).increment(1);
}

#[inline]
pub fn record_reconciliation(status: &str) {
    metrics::counter!("award_reconciliations_total", "status" => status.to_string()).increment(1);
}

#[inline]
pub fn record_notification_delivery(sink: &str, result: &str) {
    metrics::counter!(
        "notification_deliveries_total",
        "sink" => sink.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

#[inline]
pub fn record_heartbeat(success: bool) {
    metrics::counter!("heartbeat_ticks_total", "success" => success.to_string()).increment(1);
}

#[inline]
pub fn record_connection_state(connection: &str, state: &str) {
    metrics::counter!(
        "pubsub_state_transitions_total",
        "connection" => connection.to_string(),
        "state" => state.to_string()
    )
    .increment(1);
}

/// 记录 Worker 最近一次运行时间，用于存活告警
#[inline]
pub fn set_worker_last_run(worker: &str) {
    metrics::gauge!(
        "worker_last_run_timestamp_seconds",
        "worker" => worker.to_string()
    )
    .set(chrono::Utc::now().timestamp() as f64);
}
