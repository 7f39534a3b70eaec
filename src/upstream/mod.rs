//! 上游 HTTP 客户端
//!
//! 按 verifySsl 标志缓存共享连接池客户端；按方言拼接端点并 POST 请求体

pub mod ollama;

use crate::config::RouteConfig;
use crate::error::ProxyResult;
use crate::transform::headers::strip_hop_by_hop;
use axum::http::HeaderMap;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

const MAX_POOL_SIZE: usize = 100;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// 以 verifySsl 为键的共享客户端缓存，懒创建
#[derive(Debug, Default)]
pub struct ClientPool {
    clients: Mutex<HashMap<bool, Client>>,
}

impl ClientPool {
    pub fn new() -> Self {
        ClientPool::default()
    }

    pub fn get(&self, verify_ssl: bool) -> ProxyResult<Client> {
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(client) = clients.get(&verify_ssl) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .pool_max_idle_per_host(MAX_POOL_SIZE)
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT);

        if !verify_ssl {
            // 仅供开发环境：跳过证书与主机名校验
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build()?;
        clients.insert(verify_ssl, client.clone());
        tracing::debug!("Created HTTP client with SSL verification: {}", verify_ssl);
        Ok(client)
    }
}

/// 向路由的上游端点 POST 请求体，应用每请求超时并剔除逐跳头
pub async fn send(
    pool: &ClientPool,
    route: &RouteConfig,
    headers: &HeaderMap,
    body: &Value,
) -> ProxyResult<reqwest::Response> {
    let client = pool.get(route.client.verify_ssl)?;
    let url = route.provider.endpoint_url();

    tracing::debug!("Forwarding request to: {}", url);

    let response = client
        .post(&url)
        .headers(strip_hop_by_hop(headers))
        .json(body)
        .timeout(Duration::from_millis(route.client.timeout))
        .send()
        .await?;

    Ok(response)
}
