//! OpenAI SSE 流 → Anthropic SSE 流转换
//!
//! 逐块增量转换：流可能无界，绝不缓冲整个响应体。
//! 单个分块转换失败只记录日志并跳过，不中断整条流。

use crate::models::openai::StreamChunk;
use crate::transform::map_finish_reason;
use bytes::Bytes;
use futures::stream::Stream;
use futures::StreamExt;
use serde_json::json;

/// 单条流式转换的状态
#[derive(Debug, Default)]
pub struct StreamingState {
    pub message_id: Option<String>,
    pub message_start_sent: bool,
    pub content_block_start_sent: bool,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub stop_reason: Option<String>,
}

/// 将单个 OpenAI SSE 载荷翻译为零或多个 Anthropic SSE 事件
pub struct StreamTranslator {
    original_model: String,
    state: StreamingState,
}

impl StreamTranslator {
    pub fn new(original_model: impl Into<String>) -> Self {
        StreamTranslator {
            original_model: original_model.into(),
            state: StreamingState::default(),
        }
    }

    /// 处理一个 `data:` 载荷，返回已编码的 SSE 事件文本（可能为空）
    pub fn translate_payload(&mut self, payload: &str) -> String {
        if payload.trim() == "[DONE]" {
            return self.finish();
        }

        let chunk: StreamChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(err) => {
                tracing::warn!("Failed to parse OpenAI stream chunk: {} ({})", payload, err);
                return String::new();
            }
        };

        let mut out = String::new();

        // 首个有效分块：发出 message_start
        if !self.state.message_start_sent {
            out.push_str(&self.message_start(&chunk));
            self.state.message_start_sent = true;
        }

        if let Some(choice) = chunk.choices.first() {
            if let Some(content) = choice.delta.content.as_deref() {
                if !content.is_empty() {
                    if !self.state.content_block_start_sent {
                        out.push_str(&sse_event(
                            "content_block_start",
                            &json!({
                                "type": "content_block_start",
                                "index": 0,
                                "content_block": {"type": "text", "text": ""}
                            }),
                        ));
                        self.state.content_block_start_sent = true;
                    }

                    out.push_str(&sse_event(
                        "content_block_delta",
                        &json!({
                            "type": "content_block_delta",
                            "index": 0,
                            "delta": {"type": "text_delta", "text": content}
                        }),
                    ));
                    self.state.output_tokens += 1;
                }
            }

            if let Some(reason) = choice.finish_reason.as_deref() {
                self.state.stop_reason = Some(map_finish_reason(Some(reason)));
            }
        }

        // 部分上游在流中携带 usage，据此修正计数
        if let Some(usage) = &chunk.usage {
            if let Some(prompt) = usage.prompt_tokens {
                self.state.input_tokens = prompt;
            }
            if let Some(completion) = usage.completion_tokens {
                self.state.output_tokens = completion;
            }
        }

        out
    }

    fn message_start(&mut self, chunk: &StreamChunk) -> String {
        let id = chunk
            .id
            .clone()
            .unwrap_or_else(|| format!("msg_{:016x}", rand::random::<u64>()));
        let id = if id.starts_with("msg_") {
            id
        } else {
            format!("msg_{}", id)
        };
        self.state.message_id = Some(id.clone());

        sse_event(
            "message_start",
            &json!({
                "type": "message_start",
                "message": {
                    "id": id,
                    "type": "message",
                    "role": "assistant",
                    "model": self.original_model,
                    "content": [],
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {
                        "input_tokens": self.state.input_tokens,
                        "output_tokens": 0
                    }
                }
            }),
        )
    }

    fn finish(&mut self) -> String {
        let mut out = String::new();

        if self.state.content_block_start_sent {
            out.push_str(&sse_event(
                "content_block_stop",
                &json!({"type": "content_block_stop", "index": 0}),
            ));
        }

        let stop_reason = self
            .state
            .stop_reason
            .clone()
            .unwrap_or_else(|| "end_turn".to_string());
        out.push_str(&sse_event(
            "message_delta",
            &json!({
                "type": "message_delta",
                "delta": {"stop_reason": stop_reason, "stop_sequence": null},
                "usage": {"output_tokens": self.state.output_tokens}
            }),
        ));

        out.push_str(&sse_event("message_stop", &json!({"type": "message_stop"})));
        out
    }
}

fn sse_event(name: &str, data: &serde_json::Value) -> String {
    format!(
        "event: {}\ndata: {}\n\n",
        name,
        serde_json::to_string(data).unwrap_or_default()
    )
}

/// 包装上游字节流：按 `\n\n` 切帧、提取 `data:` 行并增量翻译
pub fn convert_stream<S, E>(
    stream: S,
    original_model: String,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut translator = StreamTranslator::new(original_model);
        let mut buffer = String::new();

        tokio::pin!(stream);

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));

                    while let Some(pos) = buffer.find("\n\n") {
                        let frame = buffer[..pos].to_string();
                        buffer = buffer[pos + 2..].to_string();

                        for line in frame.lines() {
                            if let Some(data) = line.strip_prefix("data: ") {
                                let out = translator.translate_payload(data.trim());
                                if !out.is_empty() {
                                    yield Ok(Bytes::from(out));
                                }
                            }
                        }
                    }
                }
                Err(err) => {
                    // 上游流中断：记录并干净地结束响应流
                    tracing::error!("Stream error: {}", err);
                    break;
                }
            }
        }
    }
}
