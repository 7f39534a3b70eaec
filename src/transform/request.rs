//! Anthropic 请求转换为 OpenAI 格式

use crate::models::{anthropic, openai};
use serde_json::json;

/// 将 Anthropic Messages 请求转换为 OpenAI Chat Completions 请求
///
/// 已知字段逐一映射（`max_tokens` → `max_completion_tokens`，
/// `stop_sequences` → `stop`），system 提示作为首条 system 消息，
/// 其余未列出的字段一律丢弃。
pub fn anthropic_to_openai_request(req: anthropic::AnthropicRequest) -> openai::OpenAIRequest {
    let mut messages = Vec::new();

    // system 提示：字符串直接使用，块数组拼接 text 块
    if let Some(system) = req.system {
        let content = match system {
            anthropic::SystemPrompt::Single(text) => text,
            anthropic::SystemPrompt::Multiple(blocks) => blocks
                .iter()
                .filter(|b| b.block_type == "text")
                .map(|b| b.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        };
        messages.push(openai::Message {
            role: "system".to_string(),
            content: openai::MessageContent::Text(content),
        });
    }

    for msg in req.messages {
        messages.push(convert_message(msg));
    }

    openai::OpenAIRequest {
        model: req.model,
        messages,
        max_completion_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        stop: req.stop_sequences,
        stream: req.stream,
    }
}

/// 转换单条消息：text/image 块映射为 OpenAI 内容分段，未知块原样保留；
/// 仅含单个 text 块的数组压平为纯字符串
fn convert_message(msg: anthropic::Message) -> openai::Message {
    let content = match msg.content {
        anthropic::MessageContent::Text(text) => openai::MessageContent::Text(text),
        anthropic::MessageContent::Blocks(blocks) => {
            if let [anthropic::ContentBlock::Known(anthropic::KnownBlock::Text { text, .. })] =
                blocks.as_slice()
            {
                openai::MessageContent::Text(text.clone())
            } else {
                let parts = blocks
                    .into_iter()
                    .filter_map(|block| match block {
                        anthropic::ContentBlock::Known(anthropic::KnownBlock::Text {
                            text,
                            ..
                        }) => Some(json!({"type": "text", "text": text})),
                        anthropic::ContentBlock::Known(anthropic::KnownBlock::Image {
                            source,
                        }) => {
                            if source.source_type == "base64" {
                                Some(json!({
                                    "type": "image_url",
                                    "image_url": {
                                        "url": format!(
                                            "data:{};base64,{}",
                                            source.media_type, source.data
                                        )
                                    }
                                }))
                            } else {
                                tracing::warn!(
                                    "Skipping image block with unsupported source type: {}",
                                    source.source_type
                                );
                                None
                            }
                        }
                        anthropic::ContentBlock::Other(value) => Some(value),
                    })
                    .collect();
                openai::MessageContent::Parts(parts)
            }
        }
    };

    openai::Message {
        role: msg.role,
        content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn request(body: Value) -> anthropic::AnthropicRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_basic_conversion() {
        let req = request(json!({
            "model": "claude",
            "max_tokens": 128,
            "system": "S",
            "messages": [{"role": "user", "content": "hi"}]
        }));

        let result = anthropic_to_openai_request(req);
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["model"], "claude");
        assert_eq!(value["max_completion_tokens"], 128);
        assert!(value.get("max_tokens").is_none());
        assert!(value.get("system").is_none());
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][0]["content"], "S");
        assert_eq!(value["messages"][1]["role"], "user");
        assert_eq!(value["messages"][1]["content"], "hi");
    }

    #[test]
    fn test_system_block_array_joined_with_newline() {
        let req = request(json!({
            "model": "claude",
            "messages": [],
            "system": [
                {"type": "text", "text": "first"},
                {"type": "text", "text": "second"}
            ]
        }));

        let result = anthropic_to_openai_request(req);
        match &result.messages[0].content {
            openai::MessageContent::Text(text) => assert_eq!(text, "first\nsecond"),
            _ => panic!("expected flattened system string"),
        }
    }

    #[test]
    fn test_sampling_params_copied() {
        let req = request(json!({
            "model": "claude",
            "messages": [],
            "temperature": 0.7,
            "top_p": 0.9,
            "stop_sequences": ["END"],
            "stream": true
        }));

        let result = anthropic_to_openai_request(req);
        assert_eq!(result.temperature, Some(0.7));
        assert_eq!(result.top_p, Some(0.9));
        assert_eq!(result.stop, Some(vec!["END".to_string()]));
        assert_eq!(result.stream, Some(true));
    }

    #[test]
    fn test_single_text_block_flattened_to_string() {
        let req = request(json!({
            "model": "claude",
            "messages": [
                {"role": "user", "content": [{"type": "text", "text": "only"}]}
            ]
        }));

        let result = anthropic_to_openai_request(req);
        match &result.messages[0].content {
            openai::MessageContent::Text(text) => assert_eq!(text, "only"),
            _ => panic!("expected flattened string"),
        }
    }

    #[test]
    fn test_image_block_becomes_data_url() {
        let req = request(json!({
            "model": "claude",
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": "look"},
                    {"type": "image", "source": {
                        "type": "base64",
                        "media_type": "image/png",
                        "data": "iVBORw0KGgo="
                    }}
                ]
            }]
        }));

        let result = anthropic_to_openai_request(req);
        match &result.messages[0].content {
            openai::MessageContent::Parts(parts) => {
                assert_eq!(parts[0]["type"], "text");
                assert_eq!(parts[1]["type"], "image_url");
                assert_eq!(
                    parts[1]["image_url"]["url"],
                    "data:image/png;base64,iVBORw0KGgo="
                );
            }
            _ => panic!("expected content parts"),
        }
    }

    #[test]
    fn test_unknown_block_passes_through_verbatim() {
        let req = request(json!({
            "model": "claude",
            "messages": [{
                "role": "assistant",
                "content": [
                    {"type": "text", "text": "calling"},
                    {"type": "tool_use", "id": "toolu_1", "name": "search", "input": {}}
                ]
            }]
        }));

        let result = anthropic_to_openai_request(req);
        match &result.messages[0].content {
            openai::MessageContent::Parts(parts) => {
                assert_eq!(parts[1]["type"], "tool_use");
                assert_eq!(parts[1]["id"], "toolu_1");
            }
            _ => panic!("expected content parts"),
        }
    }

    #[test]
    fn test_unlisted_fields_dropped() {
        let req = request(json!({
            "model": "claude",
            "messages": [],
            "top_k": 40,
            "metadata": {"user_id": "u1"}
        }));

        let value = serde_json::to_value(anthropic_to_openai_request(req)).unwrap();
        assert!(value.get("top_k").is_none());
        assert!(value.get("metadata").is_none());
    }
}
