//! 请求转发管道
//!
//! 编排一次转发：方言转换 → 模型替换 → JSON 路径操作 → 正则替换 →
//! 请求头改写 → 带重试的上游分发 → 响应转换与回写。
//! 追踪头在任何路径（包括错误）上都在写出响应体之前镜像。

use crate::config::{ProviderType, RouteConfig};
use crate::error::{ProxyError, ProxyResult};
use crate::models::anthropic::AnthropicRequest;
use crate::models::openai::OpenAIResponse;
use crate::retry;
use crate::streaming::openai_to_anthropic::convert_stream;
use crate::transform::content::{apply_regex_rules, replace_model};
use crate::transform::headers::{apply as apply_header_rules, is_hop_by_hop, mirror_tracing_headers};
use crate::transform::json_path;
use crate::transform::{anthropic_to_openai_request, openai_to_anthropic_response};
use crate::upstream::{self, ollama, ClientPool};
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::Instant;

/// 执行一次完整转发；错误在此处落地为带追踪头的错误响应
pub async fn forward(
    clients: &ClientPool,
    incoming_headers: &HeaderMap,
    body: Value,
    route: &RouteConfig,
    streaming: bool,
    source_dialect: Option<ProviderType>,
) -> Response {
    match forward_inner(clients, incoming_headers, body, route, streaming, source_dialect).await {
        Ok(response) => response,
        Err(err) => {
            tracing::error!("Request failed: {}", err);
            let mut response = err.into_response();
            mirror_tracing_headers(incoming_headers, response.headers_mut());
            response
        }
    }
}

async fn forward_inner(
    clients: &ClientPool,
    incoming_headers: &HeaderMap,
    body: Value,
    route: &RouteConfig,
    streaming: bool,
    source_dialect: Option<ProviderType>,
) -> ProxyResult<Response> {
    let prepared = prepare_request(body, route, source_dialect)?;
    let outbound_headers = build_outbound_headers(incoming_headers, route);

    // 整个请求（含重试退避）共享一个截止时间
    let deadline = Instant::now() + Duration::from_millis(route.client.timeout);
    let context = format!(
        "Request to {} (model: {})",
        route.provider.base_url, route.incoming_model
    );

    let body_ref = &prepared.body;
    let headers_ref = &outbound_headers;
    let attempt = move || async move {
        let response = upstream::send(clients, route, headers_ref, body_ref).await?;
        let status = response.status().as_u16();
        if retry::is_retryable_status(status) {
            // 可重试状态包装为错误以触发退避
            let body = response.text().await.unwrap_or_default();
            return Err(ProxyError::UpstreamStatus { status, body });
        }
        Ok(response)
    };

    let upstream_response =
        retry::execute_with_retry(attempt, route.client.retries, deadline, &context).await?;

    if streaming {
        stream_response(
            incoming_headers,
            upstream_response,
            prepared.needs_response_conversion,
            &prepared.original_model,
        )
        .await
    } else {
        buffered_response(
            incoming_headers,
            route,
            upstream_response,
            prepared.needs_response_conversion,
            &prepared.original_model,
        )
        .await
    }
}

struct PreparedRequest {
    body: Value,
    original_model: String,
    needs_response_conversion: bool,
}

/// 请求侧转换：方言转换、模型替换、Ollama stream 缺省、路径操作、正则替换
fn prepare_request(
    mut body: Value,
    route: &RouteConfig,
    source_dialect: Option<ProviderType>,
) -> ProxyResult<PreparedRequest> {
    let original_model = body
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let target = route.provider.provider_type;
    let mut needs_response_conversion = false;

    if let Some(source) = source_dialect {
        if source == ProviderType::Anthropic && target == ProviderType::OpenAI {
            tracing::debug!("Converting request from Anthropic to OpenAI format");
            let req: AnthropicRequest = serde_json::from_value(body).map_err(|err| {
                ProxyError::BadRequest(format!("Failed to parse Anthropic request: {}", err))
            })?;
            body = serde_json::to_value(anthropic_to_openai_request(req))?;
            needs_response_conversion = true;
        }
        // 其余方言组合暂不转换，按原样转发
    }

    if let Some(target_model) = route.provider.target_model.as_deref() {
        replace_model(&mut body, target_model);
    }

    // Ollama 默认流式，未显式指定时固定为 false
    if target == ProviderType::Ollama {
        if let Some(obj) = body.as_object_mut() {
            obj.entry("stream").or_insert(json!(false));
        }
    }

    json_path::apply_ops(&mut body, &route.transformations.request.json_path_ops);

    if !route.transformations.request.regex_replacements.is_empty() {
        let serialized = serde_json::to_string(&body)?;
        let rewritten =
            apply_regex_rules(&serialized, &route.transformations.request.regex_replacements);
        body = serde_json::from_str(&rewritten).map_err(|err| {
            ProxyError::Transform(format!("Regex rewrite produced invalid JSON: {}", err))
        })?;
    }

    Ok(PreparedRequest {
        body,
        original_model,
        needs_response_conversion,
    })
}

/// 请求头改写，并强制 Content-Type 与可选的 Bearer 鉴权
fn build_outbound_headers(incoming: &HeaderMap, route: &RouteConfig) -> HeaderMap {
    let mut headers = apply_header_rules(incoming, &route.headers);

    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );

    if let Some(key) = route.provider.api_key.as_deref() {
        if !key.trim().is_empty() {
            match HeaderValue::from_str(&format!("Bearer {}", key)) {
                Ok(value) => {
                    headers.insert(header::AUTHORIZATION, value);
                }
                Err(_) => tracing::warn!("API key contains invalid header characters, skipping"),
            }
        }
    }

    headers
}

async fn buffered_response(
    incoming: &HeaderMap,
    route: &RouteConfig,
    upstream_response: reqwest::Response,
    needs_conversion: bool,
    original_model: &str,
) -> ProxyResult<Response> {
    let status = upstream_response.status();
    let upstream_headers = upstream_response.headers().clone();
    let bytes = upstream_response.bytes().await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    for (name, value) in upstream_headers.iter() {
        if *name != header::CONTENT_LENGTH && *name != header::TRANSFER_ENCODING {
            headers.insert(name.clone(), value.clone());
        }
    }

    let parsed = if route.provider.provider_type == ProviderType::Ollama {
        ollama::reduce_ndjson(&String::from_utf8_lossy(&bytes))
    } else {
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(doc) => Some(doc),
            Err(err) => {
                tracing::error!("Failed to parse upstream response as JSON: {}", err);
                None
            }
        }
    };

    let payload = match parsed {
        Some(mut doc) => {
            json_path::apply_ops(&mut doc, &route.transformations.response.json_path_ops);

            if !route.transformations.response.regex_replacements.is_empty() {
                let serialized = serde_json::to_string(&doc)?;
                let rewritten = apply_regex_rules(
                    &serialized,
                    &route.transformations.response.regex_replacements,
                );
                match serde_json::from_str(&rewritten) {
                    Ok(value) => doc = value,
                    Err(err) => tracing::error!(
                        "Response regex rewrite produced invalid JSON, keeping original: {}",
                        err
                    ),
                }
            }

            if needs_conversion && status.as_u16() < 400 {
                tracing::debug!("Converting response from OpenAI to Anthropic format");
                match serde_json::from_value::<OpenAIResponse>(doc.clone()) {
                    Ok(openai_resp) => {
                        doc = serde_json::to_value(openai_to_anthropic_response(
                            openai_resp,
                            original_model,
                        ))?;
                    }
                    Err(err) => {
                        tracing::error!("Failed to convert response to Anthropic format: {}", err);
                    }
                }
            }

            serde_json::to_vec(&doc)?
        }
        // 非 JSON 响应体原样转发
        None => bytes.to_vec(),
    };

    let mut response = Response::new(Body::from(payload));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    mirror_tracing_headers(incoming, response.headers_mut());
    Ok(response)
}

async fn stream_response(
    incoming: &HeaderMap,
    upstream_response: reqwest::Response,
    needs_conversion: bool,
    original_model: &str,
) -> ProxyResult<Response> {
    let status = upstream_response.status();

    // 错误响应不按 SSE 处理，缓冲后原样转发
    if status.as_u16() >= 400 {
        let upstream_headers = upstream_response.headers().clone();
        let bytes = upstream_response.bytes().await?;
        tracing::error!(
            "Streaming request failed with status: {} - {}",
            status,
            String::from_utf8_lossy(&bytes)
        );

        let mut response = Response::new(Body::from(bytes.to_vec()));
        *response.status_mut() = status;
        for (name, value) in upstream_headers.iter() {
            if !is_hop_by_hop(name.as_str()) {
                response.headers_mut().insert(name.clone(), value.clone());
            }
        }
        mirror_tracing_headers(incoming, response.headers_mut());
        return Ok(response);
    }

    let mut headers = HeaderMap::new();
    for (name, value) in upstream_response.headers().iter() {
        if !is_hop_by_hop(name.as_str()) {
            headers.insert(name.clone(), value.clone());
        }
    }
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    mirror_tracing_headers(incoming, &mut headers);

    let body = if needs_conversion {
        Body::from_stream(convert_stream(
            upstream_response.bytes_stream(),
            original_model.to_string(),
        ))
    } else {
        // 同方言直接透传，客户端写就绪驱动上游读取
        let passthrough = upstream_response.bytes_stream().map(|result| {
            result.map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))
        });
        Body::from_stream(passthrough)
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}
