//! 统一 LLM 客户端

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::time::Duration;
use tracing::info;

use super::openai::stream_openai;
use super::types::{ChatMessage, ChatOptions, LlmError};

/// 文档生成后端
///
/// 内容合成器只依赖这个接口，测试中以脚本化桩实现替换真实客户端
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// 对单个 Prompt 生成完整文本
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

/// OpenAI 格式的 LLM 客户端
pub struct LlmClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl LlmClient {
    /// 创建新的 LLM 客户端
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, LlmError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(LlmError::ConfigError("API Key is required".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(5)
            .build()
            .map_err(LlmError::HttpError)?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.into(),
            model: model.into(),
        })
    }

    /// 流式请求并收集完整响应
    pub async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, LlmError> {
        info!("LLM request: model={}", self.model);

        let mut stream = stream_openai(
            &self.client,
            &self.api_key,
            &self.base_url,
            messages,
            &self.model,
            &ChatOptions::default(),
        );

        let mut content = String::new();
        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result?;
            if let Some(text) = chunk.content {
                content.push_str(&text);
            }
        }

        Ok(content)
    }
}

#[async_trait]
impl GenerationBackend for LlmClient {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        self.complete(vec![ChatMessage::user(prompt)]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_api_key_rejected() {
        let result = LlmClient::new("", "https://api.openai.com", "gpt-4o");
        assert!(matches!(result, Err(LlmError::ConfigError(_))));
    }

    #[test]
    fn test_client_construction() {
        let client = LlmClient::new("sk-test", "https://api.openai.com", "gpt-4o");
        assert!(client.is_ok());
    }
}
