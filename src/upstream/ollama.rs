//! Ollama NDJSON 响应归约
//!
//! Ollama 非流式响应是逐行 JSON：取最后一条记录，
//! 或第一条 `done == true` 的记录（先到为准）

use serde_json::Value;

pub fn reduce_ndjson(body: &str) -> Option<Value> {
    let mut last = None;

    for line in body.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(record) => {
                let done = record
                    .get("done")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                last = Some(record);
                if done {
                    break;
                }
            }
            Err(_) => {
                tracing::warn!("Failed to parse NDJSON line: {}", line);
            }
        }
    }

    last
}
