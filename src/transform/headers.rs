//! 请求头改写
//!
//! 按 dropAll → drop → add → force 顺序应用规则；
//! 逐跳头永不转发，追踪头从请求镜像到响应

use crate::config::HeaderRule;
use axum::http::{HeaderMap, HeaderName, HeaderValue};

/// Hop-by-hop headers that must never be forwarded by a proxy
/// (RFC 2616 Section 13.5.1, plus content-length which the client recomputes).
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Distributed-tracing headers mirrored from the incoming request onto the
/// outgoing response.
pub const TRACING_HEADERS: &[&str] = &[
    "x-request-id",
    "x-correlation-id",
    "x-trace-id",
    "traceparent",
    "tracestate",
    "x-b3-traceid",
    "x-b3-spanid",
    "x-b3-parentspanid",
    "x-b3-sampled",
    "x-b3-flags",
    "x-cloud-trace-context",
    "x-amzn-trace-id",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// 应用请求头规则，返回新的头集合
pub fn apply(incoming: &HeaderMap, rule: &HeaderRule) -> HeaderMap {
    let mut result = HeaderMap::new();

    if !rule.drop_all {
        for (name, value) in incoming {
            let dropped = rule
                .drop
                .iter()
                .any(|d| d.eq_ignore_ascii_case(name.as_str()));
            if !dropped {
                result.append(name.clone(), value.clone());
            }
        }
    }

    for (name, value) in &rule.add {
        match parse_header(name, value) {
            Some((name, value)) => {
                if !result.contains_key(&name) {
                    result.insert(name, value);
                }
            }
            None => tracing::warn!("Skipping invalid header in add rule: {}", name),
        }
    }

    for (name, value) in &rule.force {
        match parse_header(name, value) {
            // insert 会替换该名称下的所有既有值
            Some((name, value)) => {
                result.insert(name, value);
            }
            None => tracing::warn!("Skipping invalid header in force rule: {}", name),
        }
    }

    result
}

/// 剔除逐跳头
pub fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// 将请求中的追踪头镜像到响应头，缺失或空值的头不写出
pub fn mirror_tracing_headers(incoming: &HeaderMap, response: &mut HeaderMap) {
    for name in TRACING_HEADERS {
        if let Some(value) = incoming.get(*name) {
            if !value.is_empty() {
                let name = HeaderName::from_static(name);
                response.insert(name, value.clone());
            }
        }
    }
}

fn parse_header(name: &str, value: &str) -> Option<(HeaderName, HeaderValue)> {
    let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
    let value = HeaderValue::from_str(value).ok()?;
    Some((name, value))
}
