//! OpenAI API 端点处理器 (/v1/chat/completions)

use crate::config::{ProviderType, ProxyConfig};
use crate::upstream::ClientPool;
use axum::{body::Bytes, http::HeaderMap, response::Response, Extension};
use std::sync::Arc;

pub async fn openai_handler(
    Extension(config): Extension<Arc<ProxyConfig>>,
    Extension(clients): Extension<Arc<ClientPool>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    tracing::debug!("Received OpenAI request");
    super::handle(config, clients, headers, body, ProviderType::OpenAI).await
}
