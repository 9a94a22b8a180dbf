//! 内容合成器
//!
//! 将候选文件逐个提交给文档生成后端，受限并发执行，
//! 瞬态错误指数退避重试，单文件失败不拖垮整次运行。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::llm::{GenerationBackend, LlmError};

use super::progress::ProgressEmitter;
use super::prompts;
use super::types::{CandidateStatus, FileCandidate, GenerationResult};

/// 并发上限的允许区间
const CONCURRENCY_RANGE: std::ops::RangeInclusive<usize> = 1..=10;

/// 合成器配置
#[derive(Debug, Clone)]
pub struct SynthesizerConfig {
    /// 同时在途的后端调用数
    pub concurrency: usize,
    /// 单文件最大调用次数（含首次）
    pub max_attempts: u32,
    /// 退避基准（毫秒），按尝试次数指数放大
    pub backoff_base_ms: u64,
    /// 提交给后端的单文件内容上限（字节）
    pub max_prompt_bytes: usize,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            max_attempts: 3,
            backoff_base_ms: 500,
            max_prompt_bytes: 60_000,
        }
    }
}

/// 单个候选的处理结果
#[derive(Debug)]
pub struct FileOutcome {
    /// 候选序列中的下标
    pub index: usize,
    /// 生成结果，失败时为错误描述
    pub result: Result<GenerationResult, String>,
}

/// 内容合成器
pub struct ContentSynthesizer {
    backend: Arc<dyn GenerationBackend>,
    config: SynthesizerConfig,
    semaphore: Arc<Semaphore>,
}

impl ContentSynthesizer {
    /// 创建合成器，并发度收敛到允许区间内
    pub fn new(backend: Arc<dyn GenerationBackend>, mut config: SynthesizerConfig) -> Self {
        config.concurrency = config
            .concurrency
            .clamp(*CONCURRENCY_RANGE.start(), *CONCURRENCY_RANGE.end());
        let semaphore = Arc::new(Semaphore::new(config.concurrency));
        Self {
            backend,
            config,
            semaphore,
        }
    }

    /// 并发处理全部待生成候选
    ///
    /// 返回向量覆盖每个 Pending 候选恰好一次。凭证拒绝与消费者
    /// 断开是仅有的两种中止整次运行的情况。
    pub async fn synthesize_files(
        &self,
        root: &Path,
        candidates: &[FileCandidate],
        emitter: &ProgressEmitter,
        project_name: &str,
        project_description: &str,
    ) -> PipelineResult<Vec<FileOutcome>> {
        let pending: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.status == CandidateStatus::Pending)
            .map(|(i, _)| i)
            .collect();

        info!(
            "Synthesizing {} files with concurrency {}",
            pending.len(),
            self.config.concurrency
        );

        let outcomes: Mutex<Vec<FileOutcome>> = Mutex::new(Vec::with_capacity(pending.len()));
        let fatal: Mutex<Option<PipelineError>> = Mutex::new(None);

        stream::iter(pending)
            .for_each_concurrent(self.config.concurrency, |index| {
                let semaphore = self.semaphore.clone();
                let outcomes = &outcomes;
                let fatal = &fatal;
                let candidate = &candidates[index];

                async move {
                    let Ok(_permit) = semaphore.acquire().await else {
                        return;
                    };

                    // 运行已注定失败时不再发起新调用
                    if fatal.lock().is_some() {
                        return;
                    }
                    // 消费者断开视为取消，后续候选不再消耗后端配额
                    if emitter.is_closed() {
                        *fatal.lock() = Some(PipelineError::Cancelled);
                        return;
                    }

                    let outcome = self
                        .synthesize_one(root, candidate, project_name, project_description, emitter)
                        .await;

                    match outcome {
                        Ok(result) => {
                            let payload = json!({
                                "path": candidate.relative_path,
                                "status": "generated",
                                "attempts": result.backend_attempts,
                                "truncated": result.truncated,
                            });
                            if emitter
                                .file_result(
                                    format!("Generated documentation for {}", candidate.relative_path),
                                    payload,
                                )
                                .await
                                .is_err()
                            {
                                *fatal.lock() = Some(PipelineError::Cancelled);
                                return;
                            }
                            outcomes.lock().push(FileOutcome {
                                index,
                                result: Ok(result),
                            });
                        }
                        Err(e) if e.is_auth() => {
                            warn!("Backend rejected credentials: {}", e);
                            *fatal.lock() = Some(PipelineError::AuthRejected(e.to_string()));
                        }
                        Err(e) => {
                            let message = e.to_string();
                            warn!(
                                "Generation failed for {}: {}",
                                candidate.relative_path, message
                            );
                            let payload = json!({
                                "path": candidate.relative_path,
                                "status": "failed",
                                "error": message,
                            });
                            if emitter
                                .file_result(
                                    format!("Failed to document {}", candidate.relative_path),
                                    payload,
                                )
                                .await
                                .is_err()
                            {
                                *fatal.lock() = Some(PipelineError::Cancelled);
                                return;
                            }
                            outcomes.lock().push(FileOutcome {
                                index,
                                result: Err(message),
                            });
                        }
                    }
                }
            })
            .await;

        if let Some(error) = fatal.lock().take() {
            return Err(error);
        }

        let mut collected = outcomes.into_inner();
        collected.sort_by_key(|o| o.index);
        Ok(collected)
    }

    /// 处理单个候选：读取内容、截断、带重试地调用后端
    async fn synthesize_one(
        &self,
        root: &Path,
        candidate: &FileCandidate,
        project_name: &str,
        project_description: &str,
        emitter: &ProgressEmitter,
    ) -> Result<GenerationResult, LlmError> {
        let full_path = root.join(&candidate.relative_path);
        let bytes = tokio::fs::read(&full_path)
            .await
            .map_err(|e| LlmError::ConfigError(format!("读取文件失败: {}", e)))?;
        let content = String::from_utf8_lossy(&bytes).to_string();

        let (content, truncated) = truncate_for_prompt(&content, self.config.max_prompt_bytes);
        if truncated {
            debug!(
                "Truncating {} to {} bytes for prompt",
                candidate.relative_path, self.config.max_prompt_bytes
            );
        }

        let prompt = prompts::format_file_doc_prompt(
            &candidate.relative_path,
            project_name,
            project_description,
            content,
            truncated,
        );

        let (text, attempts) = self.call_with_retry(&prompt, emitter).await?;
        Ok(GenerationResult {
            relative_path: candidate.relative_path.clone(),
            content: text,
            backend_attempts: attempts,
            truncated,
        })
    }

    /// 生成项目级总览文档
    ///
    /// 至少有一个文件成功时才调用。总览失败不终止运行（凭证
    /// 拒绝除外），由调用方根据 `None` 决定是否发出错误事件。
    pub async fn synthesize_project(
        &self,
        project_name: &str,
        project_description: &str,
        readme_note: Option<&str>,
        outcomes: &[FileOutcome],
        emitter: &ProgressEmitter,
    ) -> PipelineResult<Option<GenerationResult>> {
        let summaries: Vec<String> = outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .map(|r| {
                let (snippet, _) = truncate_for_prompt(&r.content, 2_000);
                format!("## {}\n{}\n", r.relative_path, snippet)
            })
            .collect();

        if summaries.is_empty() {
            return Ok(None);
        }

        let prompt = prompts::format_project_overview_prompt(
            project_name,
            project_description,
            readme_note,
            &summaries.join("\n"),
        );

        match self.call_with_retry(&prompt, emitter).await {
            Ok((text, attempts)) => Ok(Some(GenerationResult {
                relative_path: String::new(),
                content: text,
                backend_attempts: attempts,
                truncated: false,
            })),
            Err(e) if e.is_auth() => Err(PipelineError::AuthRejected(e.to_string())),
            Err(e) => {
                warn!("Project overview generation failed: {}", e);
                Ok(None)
            }
        }
    }

    /// 带指数退避的后端调用，返回内容与实际调用次数
    ///
    /// 每次发起调用前检查消费者是否仍在线，断开后立即停止重试。
    async fn call_with_retry(
        &self,
        prompt: &str,
        emitter: &ProgressEmitter,
    ) -> Result<(String, u32), LlmError> {
        let mut attempt = 1u32;
        loop {
            if emitter.is_closed() {
                return Err(LlmError::ConfigError("consumer disconnected".to_string()));
            }
            match self.backend.generate(prompt).await {
                Ok(text) => return Ok((text, attempt)),
                Err(e) if e.is_auth() => return Err(e),
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    let delay = self.config.backoff_base_ms * 2u64.pow(attempt - 1);
                    debug!("Transient backend error (attempt {}): {}, retrying in {}ms", attempt, e, delay);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// 在字符边界上截断文本，返回截断后的切片与是否发生截断
fn truncate_for_prompt(text: &str, max_bytes: usize) -> (&str, bool) {
    if text.len() <= max_bytes {
        return (text, false);
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    (&text[..end], true)
}
