//! JSON 路径操作
//!
//! 支持 `$` 根、`.name`、`['name']`、`[index]` 与通配符 `.*` / `[*]`。
//! REMOVE 删除所有匹配节点，缺失路径静默跳过；
//! ADD 设置所有引用节点，末段缺失时在父对象中创建。
//! 单条操作失败只记录日志，不影响后续操作。

use crate::config::{JsonPathOp, PathOp};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
    Wildcard,
}

/// 依次应用路径操作，失败的操作记录日志后跳过
pub fn apply_ops(doc: &mut Value, ops: &[JsonPathOp]) {
    for op in ops {
        let segments = match parse_path(&op.path) {
            Ok(segments) => segments,
            Err(err) => {
                tracing::error!(
                    "Failed to parse JSONPath expression {}: {}",
                    op.path,
                    err
                );
                continue;
            }
        };

        match op.op {
            PathOp::Remove => {
                remove(doc, &segments);
                tracing::debug!("Removed field at path: {}", op.path);
            }
            PathOp::Add => match &op.value {
                Some(value) => {
                    add(doc, &segments, value);
                    tracing::debug!("Added field at path: {}", op.path);
                }
                None => {
                    tracing::error!("ADD operation without value at path: {}", op.path);
                }
            },
        }
    }
}

fn parse_path(path: &str) -> Result<Vec<Segment>, String> {
    let mut rest = path.trim();
    if let Some(stripped) = rest.strip_prefix('$') {
        rest = stripped;
    }

    let mut segments = Vec::new();
    while !rest.is_empty() {
        if let Some(after_dot) = rest.strip_prefix('.') {
            if let Some(tail) = after_dot.strip_prefix('*') {
                segments.push(Segment::Wildcard);
                rest = tail;
                continue;
            }
            let end = after_dot
                .find(|c| c == '.' || c == '[')
                .unwrap_or(after_dot.len());
            if end == 0 {
                return Err(format!("empty segment after '.' in '{}'", path));
            }
            segments.push(Segment::Key(after_dot[..end].to_string()));
            rest = &after_dot[end..];
        } else if let Some(after_bracket) = rest.strip_prefix('[') {
            let end = after_bracket
                .find(']')
                .ok_or_else(|| format!("unterminated '[' in '{}'", path))?;
            let inner = after_bracket[..end].trim();
            rest = &after_bracket[end + 1..];

            if inner == "*" {
                segments.push(Segment::Wildcard);
            } else if (inner.starts_with('\'') && inner.ends_with('\'') && inner.len() >= 2)
                || (inner.starts_with('"') && inner.ends_with('"') && inner.len() >= 2)
            {
                segments.push(Segment::Key(inner[1..inner.len() - 1].to_string()));
            } else {
                let index: usize = inner
                    .parse()
                    .map_err(|_| format!("unsupported selector '[{}]' in '{}'", inner, path))?;
                segments.push(Segment::Index(index));
            }
        } else {
            return Err(format!("unexpected character at '{}' in '{}'", rest, path));
        }
    }

    Ok(segments)
}

#[derive(Debug, Clone)]
enum Concrete {
    Key(String),
    Index(usize),
}

/// 解析出所有匹配的具体路径（通配符展开）
fn resolve(doc: &Value, segments: &[Segment]) -> Vec<Vec<Concrete>> {
    let mut paths: Vec<Vec<Concrete>> = vec![Vec::new()];

    for segment in segments {
        let mut next = Vec::new();
        for path in &paths {
            let Some(node) = get_path(doc, path) else {
                continue;
            };
            match segment {
                Segment::Key(key) => {
                    if node.get(key.as_str()).is_some() {
                        let mut extended = path.clone();
                        extended.push(Concrete::Key(key.clone()));
                        next.push(extended);
                    }
                }
                Segment::Index(index) => {
                    if node.get(*index).is_some() {
                        let mut extended = path.clone();
                        extended.push(Concrete::Index(*index));
                        next.push(extended);
                    }
                }
                Segment::Wildcard => match node {
                    Value::Object(map) => {
                        for key in map.keys() {
                            let mut extended = path.clone();
                            extended.push(Concrete::Key(key.clone()));
                            next.push(extended);
                        }
                    }
                    Value::Array(items) => {
                        for index in 0..items.len() {
                            let mut extended = path.clone();
                            extended.push(Concrete::Index(index));
                            next.push(extended);
                        }
                    }
                    _ => {}
                },
            }
        }
        paths = next;
        if paths.is_empty() {
            break;
        }
    }

    paths
}

fn get_path<'a>(doc: &'a Value, path: &[Concrete]) -> Option<&'a Value> {
    let mut node = doc;
    for step in path {
        node = match step {
            Concrete::Key(key) => node.get(key.as_str())?,
            Concrete::Index(index) => node.get(*index)?,
        };
    }
    Some(node)
}

fn get_path_mut<'a>(doc: &'a mut Value, path: &[Concrete]) -> Option<&'a mut Value> {
    let mut node = doc;
    for step in path {
        node = match step {
            Concrete::Key(key) => node.get_mut(key.as_str())?,
            Concrete::Index(index) => node.get_mut(*index)?,
        };
    }
    Some(node)
}

fn remove(doc: &mut Value, segments: &[Segment]) {
    let Some((terminal, parents)) = segments.split_last() else {
        return;
    };

    for parent_path in resolve(doc, parents) {
        let Some(parent) = get_path_mut(doc, &parent_path) else {
            continue;
        };
        match (terminal, &mut *parent) {
            (Segment::Key(key), Value::Object(map)) => {
                map.remove(key.as_str());
            }
            (Segment::Index(index), Value::Array(items)) => {
                if *index < items.len() {
                    items.remove(*index);
                }
            }
            (Segment::Wildcard, Value::Object(map)) => map.clear(),
            (Segment::Wildcard, Value::Array(items)) => items.clear(),
            _ => {}
        }
    }
}

fn add(doc: &mut Value, segments: &[Segment], value: &Value) {
    let Some((terminal, parents)) = segments.split_last() else {
        *doc = value.clone();
        return;
    };

    for parent_path in resolve(doc, parents) {
        let Some(parent) = get_path_mut(doc, &parent_path) else {
            continue;
        };
        match (terminal, &mut *parent) {
            (Segment::Key(key), Value::Object(map)) => {
                map.insert(key.clone(), value.clone());
            }
            (Segment::Index(index), Value::Array(items)) => {
                if *index < items.len() {
                    items[*index] = value.clone();
                } else if *index == items.len() {
                    items.push(value.clone());
                } else {
                    tracing::warn!("Array index {} out of bounds for ADD", index);
                }
            }
            (Segment::Wildcard, Value::Object(map)) => {
                for slot in map.values_mut() {
                    *slot = value.clone();
                }
            }
            (Segment::Wildcard, Value::Array(items)) => {
                for slot in items.iter_mut() {
                    *slot = value.clone();
                }
            }
            _ => {
                tracing::warn!("ADD target parent is not a container, skipping");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op(kind: PathOp, path: &str, value: Option<Value>) -> JsonPathOp {
        JsonPathOp {
            op: kind,
            path: path.to_string(),
            value,
        }
    }

    #[test]
    fn test_parse_dotted_path() {
        let segments = parse_path("$.messages[0].content").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Key("messages".into()),
                Segment::Index(0),
                Segment::Key("content".into()),
            ]
        );
    }

    #[test]
    fn test_parse_bracket_and_wildcard() {
        let segments = parse_path("$['tools'][*].name").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Key("tools".into()),
                Segment::Wildcard,
                Segment::Key("name".into()),
            ]
        );
    }

    #[test]
    fn test_parse_rejects_filter_expressions() {
        assert!(parse_path("$.messages[?(@.role=='user')]").is_err());
    }

    #[test]
    fn test_add_top_level_field() {
        let mut doc = json!({"model": "gpt-4"});
        apply_ops(
            &mut doc,
            &[op(PathOp::Add, "$.stream_options", Some(json!({"include_usage": true})))],
        );
        assert_eq!(doc["stream_options"]["include_usage"], true);
    }

    #[test]
    fn test_add_overwrites_existing() {
        let mut doc = json!({"temperature": 0.1});
        apply_ops(&mut doc, &[op(PathOp::Add, "$.temperature", Some(json!(0.9)))]);
        assert_eq!(doc["temperature"], 0.9);
    }

    #[test]
    fn test_add_creates_missing_terminal_in_nested_object() {
        let mut doc = json!({"options": {}});
        apply_ops(
            &mut doc,
            &[op(PathOp::Add, "$.options.seed", Some(json!(42)))],
        );
        assert_eq!(doc["options"]["seed"], 42);
    }

    #[test]
    fn test_add_missing_parent_is_noop() {
        let mut doc = json!({"model": "m"});
        apply_ops(&mut doc, &[op(PathOp::Add, "$.a.b.c", Some(json!(1)))]);
        assert!(doc.get("a").is_none());
    }

    #[test]
    fn test_add_with_wildcard_sets_every_match() {
        let mut doc = json!({"messages": [{"role": "user"}, {"role": "assistant"}]});
        apply_ops(
            &mut doc,
            &[op(PathOp::Add, "$.messages[*].name", Some(json!("n")))],
        );
        assert_eq!(doc["messages"][0]["name"], "n");
        assert_eq!(doc["messages"][1]["name"], "n");
    }

    #[test]
    fn test_remove_field() {
        let mut doc = json!({"model": "m", "metadata": {"user_id": "u1"}});
        apply_ops(&mut doc, &[op(PathOp::Remove, "$.metadata", None)]);
        assert!(doc.get("metadata").is_none());
        assert_eq!(doc["model"], "m");
    }

    #[test]
    fn test_remove_missing_path_is_silent_noop() {
        let mut doc = json!({"model": "m"});
        apply_ops(&mut doc, &[op(PathOp::Remove, "$.not.there", None)]);
        assert_eq!(doc, json!({"model": "m"}));
    }

    #[test]
    fn test_remove_array_element() {
        let mut doc = json!({"stop": ["a", "b", "c"]});
        apply_ops(&mut doc, &[op(PathOp::Remove, "$.stop[1]", None)]);
        assert_eq!(doc["stop"], json!(["a", "c"]));
    }

    #[test]
    fn test_remove_wildcard_clears_matches() {
        let mut doc = json!({"messages": [{"x": 1, "y": 2}, {"x": 3}]});
        apply_ops(&mut doc, &[op(PathOp::Remove, "$.messages[*].x", None)]);
        assert_eq!(doc["messages"][0], json!({"y": 2}));
        assert_eq!(doc["messages"][1], json!({}));
    }

    #[test]
    fn test_failed_op_does_not_block_later_ops() {
        let mut doc = json!({"a": 1});
        apply_ops(
            &mut doc,
            &[
                op(PathOp::Remove, "$.bad[?(filter)]", None),
                op(PathOp::Add, "$.b", Some(json!(2))),
            ],
        );
        assert_eq!(doc["b"], 2);
    }

    #[test]
    fn test_ops_apply_in_order() {
        let mut doc = json!({});
        apply_ops(
            &mut doc,
            &[
                op(PathOp::Add, "$.x", Some(json!(1))),
                op(PathOp::Remove, "$.x", None),
            ],
        );
        assert!(doc.get("x").is_none());
    }
}
