//! LLM 类型定义

use serde::{Deserialize, Serialize};

/// 聊天消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// 角色：system, user, assistant
    pub role: String,
    /// 消息内容
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// 流式响应块
#[derive(Debug, Clone, Default)]
pub struct ChatChunk {
    /// 文本内容
    pub content: Option<String>,
    /// 完成原因
    pub finish_reason: Option<String>,
}

/// 聊天选项
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// 温度参数
    pub temperature: Option<f64>,
    /// 最大 token 数
    pub max_tokens: Option<u32>,
}

/// LLM 错误类型
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// HTTP 请求错误
    #[error("HTTP 请求失败: {0}")]
    HttpError(#[from] reqwest::Error),

    /// API 返回错误
    #[error("API 错误 ({status}): {message}")]
    ApiError { status: u16, message: String },

    /// 超时错误
    #[error("请求超时")]
    Timeout,

    /// 配置错误
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// JSON 解析错误
    #[error("JSON 解析失败: {0}")]
    JsonError(#[from] serde_json::Error),

    /// 流解析错误
    #[error("流解析错误: {0}")]
    StreamError(String),
}

impl LlmError {
    /// 是否为瞬态错误（限流、服务端故障、超时），重试有意义
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ApiError { status, .. } => *status == 429 || *status >= 500,
            Self::HttpError(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout | Self::StreamError(_) => true,
            _ => false,
        }
    }

    /// 是否为凭证拒绝（401/403），重试无意义且必须立即终止运行
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status == 401 || *status == 403)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(LlmError::ApiError { status: 429, message: String::new() }.is_transient());
        assert!(LlmError::ApiError { status: 503, message: String::new() }.is_transient());
        assert!(LlmError::Timeout.is_transient());
        assert!(LlmError::StreamError("broken".to_string()).is_transient());
        assert!(!LlmError::ApiError { status: 400, message: String::new() }.is_transient());
        assert!(!LlmError::ConfigError("missing key".to_string()).is_transient());
    }

    #[test]
    fn test_auth_classification() {
        assert!(LlmError::ApiError { status: 401, message: String::new() }.is_auth());
        assert!(LlmError::ApiError { status: 403, message: String::new() }.is_auth());
        assert!(!LlmError::ApiError { status: 429, message: String::new() }.is_auth());
        // 凭证拒绝不可重试
        assert!(!LlmError::ApiError { status: 401, message: String::new() }.is_transient());
    }
}
