//! 统一错误处理模块
//!
//! 定义运行级错误类型。每个错误携带一个机器可读的 category 字符串，
//! 供 Terminal 进度事件使用，调用方据此决定重试、重新认证或放弃。

use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::types::GitStage;

/// 管线运行错误枚举
///
/// 输入错误在遍历前失败且无副作用；单文件生成错误被局部吸收
/// （不出现在这里）；认证、git、资源错误均为致命错误，
/// 通过 Terminal 事件上报。
#[derive(Error, Debug)]
pub enum PipelineError {
    /// 排除规则编译失败（在任何文件系统遍历之前同步失败）
    #[error("无效的排除规则 '{pattern}': {reason}")]
    InvalidExclusionPattern { pattern: String, reason: String },

    /// 项目根目录不存在或不可读
    #[error("项目根目录不可用 ({path}): {reason}")]
    ProjectRootUnreadable { path: PathBuf, reason: String },

    /// 生成后端拒绝了凭证（401/403），与限流错误区分开
    #[error("生成后端拒绝了凭证: {0}")]
    AuthRejected(String),

    /// git 状态变更失败，记录到达的阶段
    #[error("git 操作在 {stage} 阶段失败: {message}")]
    Git { stage: GitStage, message: String },

    /// 目标分支在调用方预检与推送之间被并发创建
    #[error("分支 '{0}' 已在远端被并发创建")]
    BranchAppearedConcurrently(String),

    /// 资源错误（磁盘耗尽、归档写入失败等）
    #[error("资源错误: {0}")]
    Resource(String),

    /// 消费方断开连接，运行被取消
    #[error("调用方已断开，运行被取消")]
    Cancelled,

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),
}

impl PipelineError {
    /// 机器可读的错误类别，随 Terminal 事件下发
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidExclusionPattern { .. } => "invalid_exclusion_pattern",
            Self::ProjectRootUnreadable { .. } => "input_error",
            Self::AuthRejected(_) => "auth_rejected",
            Self::Git { stage, .. } => match stage {
                GitStage::Committed => "git_commit_failed",
                GitStage::BranchCreated => "git_branch_failed",
                GitStage::Pushed => "git_push_failed",
                GitStage::Verified => "git_verify_failed",
            },
            Self::BranchAppearedConcurrently(_) => "branch_appeared_concurrently",
            Self::Resource(_) => "resource_error",
            Self::Cancelled => "cancelled",
            Self::Config(_) => "config_error",
        }
    }

    /// 失败发生在哪个 git 阶段（仅 git 错误返回 Some）
    pub fn git_stage(&self) -> Option<GitStage> {
        match self {
            Self::Git { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// 便捷类型别名
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_mapping() {
        let err = PipelineError::InvalidExclusionPattern {
            pattern: "[".to_string(),
            reason: "unclosed character class".to_string(),
        };
        assert_eq!(err.category(), "invalid_exclusion_pattern");

        let err = PipelineError::Git {
            stage: GitStage::Pushed,
            message: "rejected".to_string(),
        };
        assert_eq!(err.category(), "git_push_failed");
        assert_eq!(err.git_stage(), Some(GitStage::Pushed));

        assert_eq!(PipelineError::Cancelled.category(), "cancelled");
        assert_eq!(
            PipelineError::AuthRejected("expired".to_string()).category(),
            "auth_rejected"
        );
    }
}
