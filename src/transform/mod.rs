//! 请求/响应转换模块
//!
//! 请求头改写、正则替换、JSON 路径操作，以及 Anthropic/OpenAI 方言互转

pub mod content;
pub mod headers;
pub mod json_path;
pub mod request;
pub mod response;

pub use request::anthropic_to_openai_request;
pub use response::{map_finish_reason, openai_to_anthropic_response};
