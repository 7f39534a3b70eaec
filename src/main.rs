mod cli;
mod config;
mod error;
mod handlers;
mod models;
mod proxy;
mod retry;
mod streaming;
mod transform;
mod upstream;

use axum::{
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use clap::Parser;
use cli::Cli;
use config::{LoggingLevel, ProxyConfig};
use error::ProxyError;
use serde_json::json;
use std::sync::Arc;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upstream::ClientPool;

fn main() {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("✗ Failed to start runtime: {}", err);
            std::process::exit(1);
        }
    };

    // 配置错误或启动失败以退出码 1 结束
    if let Err(err) = runtime.block_on(async_main(cli)) {
        eprintln!("✗ {:#}", err);
        std::process::exit(1);
    }
}

async fn async_main(cli: Cli) -> anyhow::Result<()> {
    // 先加载 .env，供配置文件中的 ${VAR} 替换使用
    dotenvy::dotenv().ok();

    let log_level = if cli.verbose {
        tracing::Level::TRACE
    } else if cli.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("llm_proxy={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = ProxyConfig::load(&cli.config)?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    tracing::info!("Starting LLM Proxy v{}", env!("CARGO_PKG_VERSION"));
    for route in &config.routes {
        tracing::info!(
            "Route: {} -> {} ({}{})",
            route.incoming_model,
            route.provider.base_url,
            route.provider.provider_type,
            route
                .provider
                .target_model
                .as_deref()
                .map(|m| format!(", target model: {}", m))
                .unwrap_or_default()
        );
    }
    if config.logging.level == LoggingLevel::Off {
        tracing::info!("Request logging: off");
    }

    let config = Arc::new(config);
    let clients = Arc::new(ClientPool::new());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/v1/chat/completions", post(handlers::openai_handler))
        .route("/v1/messages", post(handlers::anthropic_handler))
        .route("/health", get(health_handler))
        .layer(Extension(config.clone()))
        .layer(Extension(clients))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // 管道中任何未捕获的 panic 兜底为 500 信封
        .layer(CatchPanicLayer::custom(handle_panic));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|err| anyhow::anyhow!("Failed to bind {}: {}", addr, err))?;

    tracing::info!("Listening on {}", addr);
    tracing::info!("Proxy ready to accept requests");

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> axum::response::Response {
    let message = handlers::panic_message(err.as_ref());
    tracing::error!("Unhandled panic in request pipeline: {}", message);
    ProxyError::Internal(message).into_response()
}
