//! 文档管线
//!
//! 从已物化的项目目录出发：编译排除规则、遍历文件树、并发合成
//! 文档、实时发射进度事件，最终把结果发布到远端分支或打包为可
//! 下载的归档。整个过程通过单一事件流对外汇报，Terminal 事件
//! 恰好一条且永远在最后。

pub mod archive;
pub mod exclusion;
pub mod git;
pub mod progress;
pub mod prompts;
pub mod synthesizer;
pub mod types;
pub mod walker;
pub mod workspace;

use std::path::PathBuf;
use std::sync::Arc;

use futures::Stream;
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::llm::{GenerationBackend, LlmClient};

use exclusion::ExclusionMatcher;
use progress::{event_lines, ProgressEmitter};
use synthesizer::{ContentSynthesizer, FileOutcome, SynthesizerConfig};
use types::{
    AccessToken, Artifact, CandidateStatus, EventKind, ExclusionRule, FileCandidate, RunSummary,
};
use walker::{TreeWalker, WalkError};
use workspace::Workspace;

/// 项目总览文档的文件名（置于项目根目录）
const OVERVIEW_DOC_NAME: &str = "README.codescribe.md";

/// 生成文档的输出目录（镜像源文件布局）
const DOCS_DIR: &str = "docs";

/// 进度通道容量
const PROGRESS_CAPACITY: usize = 64;

/// 运行的输出目标
#[derive(Debug, Clone)]
pub enum TargetMode {
    /// 打包为可下载归档，工作区保留到归档被取走
    Download,
    /// 提交到远端仓库的新分支
    RemoteBranch {
        /// owner/repo 形式的仓库全名
        repo_full_name: String,
        /// 运行起点分支
        base_branch: String,
        /// 要创建的新分支名
        new_branch_name: String,
        /// 请求级访问凭证
        credential: AccessToken,
    },
}

/// 一次处理请求
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    /// 已物化的项目根目录（上传解包或远端克隆的结果）
    pub project_root: PathBuf,
    /// 项目名称
    pub project_name: String,
    /// 项目描述，进入 Prompt 与提交消息
    pub description: String,
    /// 附加给总览文档的补充说明
    pub readme_note: Option<String>,
    /// 排除规则（正则与字面路径两个通道）
    pub exclusion_rules: Vec<ExclusionRule>,
    /// 输出目标
    pub target: TargetMode,
}

/// 成功运行的产出
enum RunOutput {
    Download {
        artifact: Artifact,
        summary: RunSummary,
    },
    RemoteBranch {
        repo_full_name: String,
        branch: String,
        commit_sha: String,
        summary: RunSummary,
    },
}

/// 管线编排器
///
/// 持有生成后端与配置，每次 `run` 启动一次独立的处理运行
pub struct Orchestrator {
    backend: Arc<dyn GenerationBackend>,
    config: AppConfig,
}

impl Orchestrator {
    /// 用给定后端创建编排器
    pub fn new(backend: Arc<dyn GenerationBackend>, config: AppConfig) -> Self {
        Self { backend, config }
    }

    /// 从配置构建真实 LLM 客户端
    pub fn from_config(config: AppConfig) -> PipelineResult<Self> {
        let client = LlmClient::new(
            config.api_key.clone(),
            config.base_url.clone(),
            config.model.clone(),
        )
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        Ok(Self::new(Arc::new(client), config))
    }

    /// 启动一次运行，返回行分隔的进度事件流
    ///
    /// 运行在后台任务中推进；调用方丢弃流即表示断开，
    /// 管线在下一次事件发送时感知并取消。
    pub fn run(self, request: ProcessRequest) -> impl Stream<Item = String> {
        let (emitter, rx) = ProgressEmitter::new(PROGRESS_CAPACITY);

        tokio::spawn(async move {
            match self.process(request, &emitter).await {
                Ok(output) => {
                    let (message, mut payload) = success_terminal(output);
                    payload["finished_at"] = json!(chrono::Utc::now().to_rfc3339());
                    if emitter.terminal(message, payload).await.is_err() {
                        warn!("Consumer disconnected before terminal event");
                    }
                }
                Err(PipelineError::Cancelled) => {
                    info!("Run cancelled by consumer disconnect");
                }
                Err(e) => {
                    error!("Run failed: {}", e);
                    let _ = emitter.error(e.to_string(), None).await;
                    let mut payload = json!({
                        "status": "failure",
                        "category": e.category(),
                        "message": e.to_string(),
                    });
                    if let Some(stage) = e.git_stage() {
                        payload["stage"] = json!(stage);
                    }
                    let _ = emitter.terminal("Run failed", payload).await;
                }
            }
        });

        event_lines(rx)
    }

    /// 执行处理并管理工作区生命周期
    async fn process(
        &self,
        request: ProcessRequest,
        emitter: &ProgressEmitter,
    ) -> PipelineResult<RunOutput> {
        // 规则编译与根目录校验在任何事件发出之前失败，保证无副作用
        let matcher = ExclusionMatcher::compile(&request.exclusion_rules).map_err(|e| match e {
            exclusion::ExclusionError::InvalidPattern { pattern, reason } => {
                PipelineError::InvalidExclusionPattern { pattern, reason }
            }
        })?;

        let metadata = std::fs::metadata(&request.project_root).map_err(|e| {
            PipelineError::ProjectRootUnreadable {
                path: request.project_root.clone(),
                reason: e.to_string(),
            }
        })?;
        if !metadata.is_dir() {
            return Err(PipelineError::ProjectRootUnreadable {
                path: request.project_root.clone(),
                reason: "not a directory".to_string(),
            });
        }

        let mut ws = Workspace::adopt(&request.project_root);
        ws.begin()
            .map_err(|e| PipelineError::Resource(e.to_string()))?;

        let result = self.process_inner(&request, &matcher, emitter).await;

        // Download 成功时保留工作区直到归档被取走，其余路径一律释放
        match &result {
            Ok(RunOutput::Download { .. }) => {
                ws.retain();
            }
            _ => {
                if let Err(e) = ws.release() {
                    warn!("Failed to release workspace: {}", e);
                }
            }
        }
        result
    }

    async fn process_inner(
        &self,
        request: &ProcessRequest,
        matcher: &ExclusionMatcher,
        emitter: &ProgressEmitter,
    ) -> PipelineResult<RunOutput> {
        let root = &request.project_root;

        emitter
            .info(format!("Scanning project '{}'", request.project_name))
            .await
            .map_err(|_| PipelineError::Cancelled)?;

        let walker = TreeWalker::new(self.config.max_file_size);
        let mut candidates = walker.walk(root, matcher).map_err(|e| match e {
            WalkError::PathNotFound(p) | WalkError::NotADirectory(p) => {
                PipelineError::ProjectRootUnreadable {
                    path: p,
                    reason: "project root disappeared during scan".to_string(),
                }
            }
            WalkError::IoError(p, e) => {
                PipelineError::Resource(format!("failed to scan {}: {}", p.display(), e))
            }
        })?;

        let pending = candidates
            .iter()
            .filter(|c| c.status == CandidateStatus::Pending)
            .count();
        emitter
            .emit(
                EventKind::Info,
                format!("Found {} files, {} to document", candidates.len(), pending),
                Some(json!({"total": candidates.len(), "to_document": pending})),
            )
            .await
            .map_err(|_| PipelineError::Cancelled)?;

        let synthesizer = ContentSynthesizer::new(
            self.backend.clone(),
            SynthesizerConfig {
                concurrency: self.config.concurrency,
                max_attempts: self.config.max_attempts,
                backoff_base_ms: self.config.backoff_base_ms,
                max_prompt_bytes: self.config.max_prompt_bytes,
            },
        );

        let outcomes = synthesizer
            .synthesize_files(
                root,
                &candidates,
                emitter,
                &request.project_name,
                &request.description,
            )
            .await?;

        for outcome in &outcomes {
            candidates[outcome.index].status = match outcome.result {
                Ok(_) => CandidateStatus::Generated,
                Err(_) => CandidateStatus::Failed,
            };
        }
        let summary = summarize(&candidates);

        // 至少一个文件成功时才生成项目总览；总览失败被吸收为错误事件
        let overview = if summary.generated > 0 {
            let overview = synthesizer
                .synthesize_project(
                    &request.project_name,
                    &request.description,
                    request.readme_note.as_deref(),
                    &outcomes,
                    emitter,
                )
                .await?;
            if overview.is_none() {
                emitter
                    .error("Project overview generation failed, continuing without it", None)
                    .await
                    .map_err(|_| PipelineError::Cancelled)?;
            }
            overview
        } else {
            None
        };

        write_generated_docs(root, request, &outcomes, overview.as_ref().map(|o| o.content.as_str()))?;

        match &request.target {
            TargetMode::Download => {
                emitter
                    .info("Packaging documentation archive")
                    .await
                    .map_err(|_| PipelineError::Cancelled)?;
                let artifact = archive::package(root, &request.project_name)
                    .map_err(|e| PipelineError::Resource(e.to_string()))?;
                Ok(RunOutput::Download { artifact, summary })
            }
            TargetMode::RemoteBranch {
                repo_full_name,
                base_branch,
                new_branch_name,
                credential,
            } => {
                emitter
                    .info(format!("Publishing branch '{}'", new_branch_name))
                    .await
                    .map_err(|_| PipelineError::Cancelled)?;
                let url = git::remote_url(repo_full_name, credential);
                let mut integrator = git::GitIntegrator::new(root, url, credential.clone());
                let outcome = integrator
                    .publish(base_branch, new_branch_name, &request.description)
                    .await?;
                Ok(RunOutput::RemoteBranch {
                    repo_full_name: repo_full_name.clone(),
                    branch: outcome.branch,
                    commit_sha: outcome.commit_sha,
                    summary,
                })
            }
        }
    }
}

/// 统计候选终态
fn summarize(candidates: &[FileCandidate]) -> RunSummary {
    let mut summary = RunSummary::default();
    for candidate in candidates {
        match candidate.status {
            CandidateStatus::Generated => summary.generated += 1,
            CandidateStatus::Skipped(_) => summary.skipped += 1,
            CandidateStatus::Failed => summary.failed += 1,
            CandidateStatus::Pending => {}
        }
    }
    summary
}

/// 将生成的文档写入工作区
///
/// 单文件文档镜像源文件布局写入 docs/ 下（追加 .md 后缀），
/// 项目总览写到项目根目录，不覆盖调用方已有的 README.md
fn write_generated_docs(
    root: &std::path::Path,
    request: &ProcessRequest,
    outcomes: &[FileOutcome],
    overview: Option<&str>,
) -> PipelineResult<()> {
    let docs_root = root.join(DOCS_DIR);
    for outcome in outcomes {
        let Ok(result) = &outcome.result else {
            continue;
        };
        let doc_path = docs_root.join(format!("{}.md", result.relative_path));
        if let Some(parent) = doc_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PipelineError::Resource(format!("创建文档目录失败: {}", e)))?;
        }
        std::fs::write(&doc_path, &result.content)
            .map_err(|e| PipelineError::Resource(format!("写入文档失败: {}", e)))?;
    }

    if let Some(content) = overview {
        let mut document = format!("# {}\n\n", request.project_name);
        if !request.description.trim().is_empty() {
            document.push_str(request.description.trim());
            document.push_str("\n\n");
        }
        if let Some(note) = request.readme_note.as_deref().filter(|n| !n.trim().is_empty()) {
            document.push_str(note.trim());
            document.push_str("\n\n");
        }
        document.push_str(content);
        document.push_str(&format!(
            "\n\n---\n*Generated by CodeScribe at {}*\n",
            chrono::Utc::now().to_rfc3339()
        ));
        std::fs::write(root.join(OVERVIEW_DOC_NAME), document)
            .map_err(|e| PipelineError::Resource(format!("写入总览文档失败: {}", e)))?;
    }
    Ok(())
}

/// 构建成功 Terminal 事件的消息与负载
fn success_terminal(output: RunOutput) -> (String, serde_json::Value) {
    match output {
        RunOutput::Download { artifact, summary } => (
            "Documentation archive ready".to_string(),
            json!({
                "status": "success",
                "mode": "download",
                "download_key": artifact.retrieval_key,
                "archive_path": artifact.archive_path,
                "includes_excluded_content": true,
                "summary": summary,
            }),
        ),
        RunOutput::RemoteBranch {
            repo_full_name,
            branch,
            commit_sha,
            summary,
        } => (
            format!("Branch '{}' published", branch),
            json!({
                "status": "success",
                "mode": "remote_branch",
                "branch": branch,
                "commit": commit_sha,
                "verified": true,
                "branch_url": format!("https://github.com/{}/tree/{}", repo_full_name, branch),
                "summary": summary,
            }),
        ),
    }
}
