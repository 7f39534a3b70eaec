//! OpenAI 响应转换为 Anthropic 格式

use crate::models::{anthropic, openai};

/// 映射 OpenAI finish_reason 到 Anthropic stop_reason
pub fn map_finish_reason(finish_reason: Option<&str>) -> String {
    match finish_reason {
        Some("stop") => "end_turn",
        Some("length") => "max_tokens",
        Some("tool_calls") | Some("function_call") => "tool_use",
        _ => "end_turn",
    }
    .to_string()
}

/// 将 OpenAI Chat Completions 响应转换为 Anthropic Messages 响应
///
/// `model` 使用客户端声明的原始模型名，而非上游的目标模型名
pub fn openai_to_anthropic_response(
    resp: openai::OpenAIResponse,
    original_model: &str,
) -> anthropic::AnthropicResponse {
    let id = resp
        .id
        .unwrap_or_else(|| format!("msg_{:016x}", rand::random::<u64>()));
    let id = if id.starts_with("msg_") {
        id
    } else {
        format!("msg_{}", id)
    };

    let (content, stop_reason) = match resp.choices.first() {
        Some(choice) => {
            let content = choice
                .message
                .as_ref()
                .and_then(|m| m.content.as_ref())
                .map(convert_content)
                .unwrap_or_default();
            (content, map_finish_reason(choice.finish_reason.as_deref()))
        }
        None => (Vec::new(), "end_turn".to_string()),
    };

    let usage = resp.usage.map(|u| anthropic::Usage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
    });

    anthropic::AnthropicResponse {
        id,
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        model: original_model.to_string(),
        content,
        stop_reason,
        usage,
    }
}

/// 字符串内容映射为单个 text 块，分段数组逐个提取 text 块
fn convert_content(content: &openai::MessageContent) -> Vec<anthropic::ResponseBlock> {
    match content {
        openai::MessageContent::Text(text) => vec![anthropic::ResponseBlock::Text {
            text: text.clone(),
        }],
        openai::MessageContent::Parts(parts) => parts
            .iter()
            .filter(|part| part.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
            .map(|text| anthropic::ResponseBlock::Text {
                text: text.to_string(),
            })
            .collect(),
    }
}
