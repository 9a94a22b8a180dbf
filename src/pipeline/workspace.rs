//! 工作区管理
//!
//! 每次运行独占一个隔离的临时目录，生命周期为
//! Created -> InUse，之后被 `release` 或 `retain` 消耗终结。
//! Download 模式成功后工作区保留以供产物下载，之后显式回收。

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tempfile::TempDir;
use tracing::{info, warn};

/// 临时目录名前缀，回收扫描据此识别本系统创建的工作区
const WORKSPACE_PREFIX: &str = "codescribe-";

/// 工作区错误
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("failed to create workspace: {0}")]
    Create(#[source] std::io::Error),

    #[error("failed to remove workspace {0}: {1}")]
    Remove(PathBuf, #[source] std::io::Error),

    #[error("workspace state transition rejected: {0}")]
    InvalidTransition(&'static str),
}

/// 工作区状态
///
/// 终结（释放或保留）通过消耗 `Workspace` 本身表达，不作为状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceState {
    /// 已创建，尚未投入使用
    Created,
    /// 正在被一次运行独占使用
    InUse,
}

/// 一次运行的隔离工作区
pub struct Workspace {
    path: PathBuf,
    state: WorkspaceState,
    temp: Option<TempDir>,
}

impl Workspace {
    /// 在系统临时目录下创建新工作区
    pub fn acquire() -> Result<Self, WorkspaceError> {
        let temp = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir()
            .map_err(WorkspaceError::Create)?;
        let path = temp.path().to_path_buf();
        info!("Workspace created: {}", path.display());
        Ok(Self {
            path,
            state: WorkspaceState::Created,
            temp: Some(temp),
        })
    }

    /// 把一个已经物化好的目录纳入管理
    ///
    /// 目录由调用方准备（例如解压上传的归档或克隆远程仓库），
    /// 释放与保留语义与 `acquire` 创建的工作区一致
    pub fn adopt(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        info!("Workspace adopted: {}", path.display());
        Self {
            path,
            state: WorkspaceState::Created,
            temp: None,
        }
    }

    /// 工作区路径
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 当前状态
    pub fn state(&self) -> WorkspaceState {
        self.state
    }

    /// 标记为投入使用
    pub fn begin(&mut self) -> Result<(), WorkspaceError> {
        if self.state != WorkspaceState::Created {
            return Err(WorkspaceError::InvalidTransition("begin requires Created"));
        }
        self.state = WorkspaceState::InUse;
        Ok(())
    }

    /// 释放工作区，删除目录及其全部内容
    ///
    /// 消耗 self，释放后不存在可观察的状态
    pub fn release(mut self) -> Result<(), WorkspaceError> {
        let path = self.path.clone();
        if let Some(temp) = self.temp.take() {
            temp.close()
                .map_err(|e| WorkspaceError::Remove(path.clone(), e))?;
        } else if path.exists() {
            fs::remove_dir_all(&path).map_err(|e| WorkspaceError::Remove(path.clone(), e))?;
        }
        info!("Workspace released: {}", path.display());
        Ok(())
    }

    /// 保留工作区，目录在本次运行结束后继续存在
    ///
    /// 消耗 self，返回保留目录的路径，调用方负责之后的 `reclaim`
    pub fn retain(mut self) -> PathBuf {
        if let Some(temp) = self.temp.take() {
            let kept = temp.keep();
            info!("Workspace retained: {}", kept.display());
            kept
        } else {
            info!("Workspace retained: {}", self.path.display());
            self.path.clone()
        }
    }

    /// 回收一个此前保留的工作区
    pub fn reclaim(path: &Path) -> Result<(), WorkspaceError> {
        if path.exists() {
            fs::remove_dir_all(path)
                .map_err(|e| WorkspaceError::Remove(path.to_path_buf(), e))?;
            info!("Workspace reclaimed: {}", path.display());
        }
        Ok(())
    }

    /// 回收系统临时目录下超过存活时限的保留工作区
    ///
    /// 只触碰以本系统前缀命名的目录，按修改时间判断是否过期。
    /// 单个目录的回收失败只记录日志，不影响其余目录。
    pub fn reclaim_stale(ttl: Duration) -> usize {
        let temp_root = std::env::temp_dir();
        let Ok(entries) = fs::read_dir(&temp_root) else {
            return 0;
        };

        let now = SystemTime::now();
        let mut reclaimed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(WORKSPACE_PREFIX) {
                continue;
            }
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let expired = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|mtime| now.duration_since(mtime).ok())
                .map(|age| age > ttl)
                .unwrap_or(false);
            if !expired {
                continue;
            }
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    info!("Reclaimed stale workspace: {}", path.display());
                    reclaimed += 1;
                }
                Err(e) => warn!("Failed to reclaim {}: {}", path.display(), e),
            }
        }
        reclaimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_begin_release() {
        let mut ws = Workspace::acquire().unwrap();
        let path = ws.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(ws.state(), WorkspaceState::Created);

        ws.begin().unwrap();
        assert_eq!(ws.state(), WorkspaceState::InUse);

        ws.release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_begin_twice_rejected() {
        let mut ws = Workspace::acquire().unwrap();
        ws.begin().unwrap();
        assert!(ws.begin().is_err());
        ws.release().unwrap();
    }

    #[test]
    fn test_retain_then_reclaim() {
        let mut ws = Workspace::acquire().unwrap();
        ws.begin().unwrap();
        std::fs::write(ws.path().join("artifact.zip"), b"zip").unwrap();

        let kept = ws.retain();
        assert!(kept.exists());
        assert!(kept.join("artifact.zip").exists());

        Workspace::reclaim(&kept).unwrap();
        assert!(!kept.exists());
    }

    #[test]
    fn test_adopted_workspace_release_removes_dir() {
        let parent = tempfile::TempDir::new().unwrap();
        let dir = parent.path().join("project");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("main.py"), b"print()").unwrap();

        let mut ws = Workspace::adopt(&dir);
        ws.begin().unwrap();
        ws.release().unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn test_reclaim_missing_path_is_ok() {
        assert!(Workspace::reclaim(Path::new("/nonexistent/codescribe-gone")).is_ok());
    }
}
