//! CodeScribe 文档管线
//!
//! 接收一个已物化的项目目录，遍历其文件树，通过 LLM 后端为每个
//! 文本文件合成说明文档，并以行分隔的进度事件流对外汇报。运行
//! 结束时要么把文档发布到远端仓库的新分支，要么打包为可下载的
//! zip 归档。

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;

pub use config::{get_config, AppConfig};
pub use error::{PipelineError, PipelineResult};
pub use llm::{GenerationBackend, LlmClient};
pub use pipeline::types::{AccessToken, EventKind, ProgressEvent, RunSummary};
pub use pipeline::types::ExclusionRule;
pub use pipeline::workspace::Workspace;
pub use pipeline::{Orchestrator, ProcessRequest, TargetMode};

/// 初始化日志
///
/// 未设置 RUST_LOG 时默认输出本 crate 的 info 级别日志
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "codescribe_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
