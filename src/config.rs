//! 配置模型与加载器
//!
//! 从 JSON 配置文件加载路由表，支持 `${ENV_VAR}` 环境变量替换

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::{collections::HashMap, fmt, fs, path::Path};

/// 上游方言
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProviderType {
    #[serde(alias = "openai")]
    OpenAI,
    #[serde(alias = "anthropic")]
    Anthropic,
    #[serde(alias = "ollama")]
    Ollama,
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderType::OpenAI => write!(f, "OpenAI"),
            ProviderType::Anthropic => write!(f, "Anthropic"),
            ProviderType::Ollama => write!(f, "Ollama"),
        }
    }
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoggingLevel {
    Off,
    #[default]
    HeadersOnly,
    Full,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    pub level: LoggingLevel,
    pub log_headers: bool,
    pub log_bodies: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LoggingLevel::HeadersOnly,
            log_headers: true,
            log_bodies: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// 上游提供方配置
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    pub base_url: String,
    #[serde(default)]
    pub target_model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl ProviderConfig {
    /// 根据方言拼接上游端点 URL
    pub fn endpoint_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        match self.provider_type {
            ProviderType::OpenAI => format!("{}/v1/chat/completions", base),
            ProviderType::Anthropic => format!("{}/v1/messages", base),
            ProviderType::Ollama => format!("{}/api/chat", base),
        }
    }
}

/// 请求头改写规则：dropAll → drop → add(缺失时) → force(覆盖)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeaderRule {
    pub drop_all: bool,
    pub drop: Vec<String>,
    pub add: HashMap<String, String>,
    pub force: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegexReplacement {
    pub pattern: String,
    pub replacement: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PathOp {
    Add,
    Remove,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonPathOp {
    pub op: PathOp,
    pub path: String,
    #[serde(default)]
    pub value: Option<Value>,
}

/// 单方向的转换规则（请求侧或响应侧）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransformRules {
    pub regex_replacements: Vec<RegexReplacement>,
    pub json_path_ops: Vec<JsonPathOp>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransformConfig {
    pub request: TransformRules,
    pub response: TransformRules,
}

/// 每条路由的客户端策略
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientPolicy {
    /// 请求超时（毫秒），同时作为整个请求（含重试）的总预算
    pub timeout: u64,
    pub retries: u32,
    pub verify_ssl: bool,
}

impl Default for ClientPolicy {
    fn default() -> Self {
        ClientPolicy {
            timeout: 60_000,
            retries: 3,
            verify_ssl: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfig {
    pub incoming_model: String,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub headers: HeaderRule,
    #[serde(default)]
    pub transformations: TransformConfig,
    #[serde(default)]
    pub client: ClientPolicy,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxyConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub routes: Vec<RouteConfig>,
}

impl ProxyConfig {
    /// 从文件加载配置，替换环境变量并校验
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)
            .with_context(|| format!("Configuration file not found: {}", path.display()))?;
        let content = substitute_env_vars(&content);

        let config: ProxyConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
        config.validate()?;

        tracing::info!(
            "Configuration loaded successfully with {} routes",
            config.routes.len()
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.routes.is_empty() {
            bail!("Configuration must have at least one route");
        }
        for route in &self.routes {
            if route.incoming_model.trim().is_empty() {
                bail!("Route must have an incomingModel");
            }
            if route.provider.base_url.trim().is_empty() {
                bail!(
                    "Provider must have a baseUrl (route: {})",
                    route.incoming_model
                );
            }
        }
        Ok(())
    }

    /// 按声明顺序返回第一条 incomingModel 精确匹配的路由
    pub fn find_route(&self, model: &str) -> Option<&RouteConfig> {
        self.routes.iter().find(|r| r.incoming_model == model)
    }
}

/// 将 `${ENV_VAR}` 替换为环境变量值，未定义的变量保留原样
fn substitute_env_vars(content: &str) -> String {
    let pattern = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static pattern");
    pattern
        .replace_all(content, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match std::env::var(name) {
                Ok(value) => value,
                Err(_) => {
                    tracing::warn!("Environment variable not found: {}", name);
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}
