//! 入口处理器
//!
//! 两个方言端点共用的解析/路由/分发逻辑

pub mod anthropic;
pub mod openai;

pub use anthropic::anthropic_handler;
pub use openai::openai_handler;

use crate::config::{LoggingLevel, ProviderType, ProxyConfig};
use crate::error::{ProxyError, ProxyResult};
use crate::proxy;
use crate::transform::headers::mirror_tracing_headers;
use crate::upstream::ClientPool;
use axum::body::Bytes;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// 解析请求体、提取模型、解析路由并交给转发管道。
/// 处理过程中的意外 panic 落地为 500 信封；
/// 追踪头在错误响应上同样镜像。
pub(crate) async fn handle(
    config: Arc<ProxyConfig>,
    clients: Arc<ClientPool>,
    headers: HeaderMap,
    body: Bytes,
    source_dialect: ProviderType,
) -> Response {
    let result =
        AssertUnwindSafe(handle_inner(&config, &clients, &headers, &body, source_dialect))
            .catch_unwind()
            .await;

    let mut response = match result {
        Ok(Ok(response)) => return response,
        Ok(Err(err)) => err.into_response(),
        Err(panic) => {
            tracing::error!("Handler panicked: {}", panic_message(panic.as_ref()));
            ProxyError::Internal("unexpected panic in request pipeline".to_string())
                .into_response()
        }
    };
    mirror_tracing_headers(&headers, response.headers_mut());
    response
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn handle_inner(
    config: &ProxyConfig,
    clients: &ClientPool,
    headers: &HeaderMap,
    body: &Bytes,
    source_dialect: ProviderType,
) -> ProxyResult<Response> {
    let json: Value = serde_json::from_slice(body).map_err(|err| {
        tracing::error!("Failed to parse request as JSON: {}", err);
        ProxyError::BadRequest(format!("Invalid JSON body: {}", err))
    })?;

    let model = json
        .get("model")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if model.is_empty() {
        return Err(ProxyError::BadRequest(
            "Missing 'model' field in request".to_string(),
        ));
    }

    tracing::info!("Request for model: {}", model);
    log_request(config, headers, &json);

    let route = config
        .find_route(model)
        .ok_or_else(|| ProxyError::RouteNotFound(model.to_string()))?;

    let streaming = json
        .get("stream")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    // 仅当入口方言与路由方言不同才传入来源方言
    let source = (source_dialect != route.provider.provider_type).then_some(source_dialect);

    tracing::debug!(
        "Routing {} -> {} ({}), streaming: {}",
        model,
        route.provider.base_url,
        route.provider.provider_type,
        streaming
    );

    Ok(proxy::forward(clients, headers, json, route, streaming, source).await)
}

/// 按配置的日志级别记录请求头与请求体
fn log_request(config: &ProxyConfig, headers: &HeaderMap, body: &Value) {
    match config.logging.level {
        LoggingLevel::Off => {}
        LoggingLevel::HeadersOnly => {
            if config.logging.log_headers {
                tracing::debug!("Request headers: {:?}", headers);
            }
        }
        LoggingLevel::Full => {
            if config.logging.log_headers {
                tracing::debug!("Request headers: {:?}", headers);
            }
            if config.logging.log_bodies {
                tracing::debug!(
                    "Request body: {}",
                    serde_json::to_string(body).unwrap_or_default()
                );
            }
        }
    }
}
