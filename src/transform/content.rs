//! 正文文本替换
//!
//! 按声明顺序对序列化后的正文执行全局正则替换；模型名替换也在这里

use crate::config::RegexReplacement;
use regex::Regex;
use serde_json::Value;

/// 依次应用正则替换规则，编译失败的规则记录日志后跳过
pub fn apply_regex_rules(content: &str, rules: &[RegexReplacement]) -> String {
    let mut result = content.to_string();

    for rule in rules {
        match Regex::new(&rule.pattern) {
            Ok(pattern) => {
                let rewritten = pattern
                    .replace_all(&result, rule.replacement.as_str())
                    .into_owned();
                if rewritten != result {
                    tracing::debug!(
                        "Applied regex replacement: {} -> {}",
                        rule.pattern,
                        rule.replacement
                    );
                }
                result = rewritten;
            }
            Err(err) => {
                tracing::error!("Failed to compile regex pattern {}: {}", rule.pattern, err);
            }
        }
    }

    result
}

/// 将正文的 model 字段替换为目标模型名
pub fn replace_model(body: &mut Value, target_model: &str) {
    if let Some(obj) = body.as_object_mut() {
        obj.insert("model".to_string(), Value::String(target_model.to_string()));
        tracing::debug!("Replaced model name with: {}", target_model);
    }
}
