//! LLM 模块
//!
//! 提供 OpenAI Chat Completions 格式的流式客户端与文档生成后端接口。

mod client;
mod openai;
mod types;

pub use client::{GenerationBackend, LlmClient};
pub use types::*;
