use std::sync::Arc;

use token_proxy_binder::{
    config::AppConfig,
    database::initialize_database,
    routes::api::{app_routes, AppState},
    services::SystemClock,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置
    let config = AppConfig::from_env()?;

    // 初始化日志，RUST_LOG 优先于 LOG_LEVEL；生产环境输出JSON
    let json_logs = config.is_production();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.server.log_level.clone()),
        ))
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    info!("应用启动中...");
    info!("环境: {:?}", config.environment);

    // 初始化数据库
    let db_pool = initialize_database(&config.database).await?;
    info!("数据库初始化完成");

    let state = AppState::new(
        db_pool,
        config.allocation.clone(),
        config.database.busy_retry.clone(),
        Arc::new(SystemClock),
    );

    // 创建路由
    let app = app_routes(state);

    // 启动服务器
    let addr = config.socket_addr()?;
    info!("Starting server on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(&addr).await?, app.into_make_service()).await?;

    Ok(())
}
