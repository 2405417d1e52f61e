//! 寺庙功德平台服务
//!
//! 提供信众签到、功德值、奖励兑换与寺庙后台管理的 REST API。

use temple_service::{app::build_router, service::account, state::AppState};
use temple_shared::{config::AppConfig, database::Database, observability};
use tokio::net::TcpListener;
use tracing::info;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 配置加载顺序见 AppConfig::load，.env 在其中注入
    let config = AppConfig::load("temple-service")?;
    let _guard = observability::init(&config.service_name, &config.observability).await?;

    config.ensure_production_ready()?;
    info!(
        environment = %config.environment,
        "Starting temple-service on {}",
        config.server_addr()
    );

    let db = Database::connect(&config.database).await?;
    if config.database.run_migrations {
        db.run_migrations(&MIGRATOR).await?;
    }

    if account::bootstrap_super_admin(db.pool(), &config.auth).await? {
        info!("Bootstrap super admin ensured");
    }

    let state = AppState::new(
        db.pool().clone(),
        config.auth.clone(),
        config.checkin.clone(),
    );
    let app = build_router(state, &config);

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    // 收到 SIGTERM 或 Ctrl+C 后停止接收新连接，等待已有请求处理完毕
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.close().await;
    info!("Server shutdown complete");

    Ok(())
}

/// 监听关闭信号
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("注册 Ctrl+C 处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("注册 SIGTERM 处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
