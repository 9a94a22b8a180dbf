//! 目录遍历器
//!
//! 遍历项目根目录，应用排除规则剪枝，产出确定有序的候选文件序列

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::exclusion::ExclusionMatcher;
use super::types::{CandidateStatus, FileCandidate, FileNode, SkipReason};

/// 二进制探测读取的前缀长度
const BINARY_SNIFF_BYTES: usize = 8192;

/// 版本控制元数据目录，先于用户规则被无条件排除
const VCS_DIR: &str = ".git";

/// 遍历错误类型
#[derive(Debug, thiserror::Error)]
pub enum WalkError {
    #[error("路径不存在: {0}")]
    PathNotFound(PathBuf),

    #[error("路径不是目录: {0}")]
    NotADirectory(PathBuf),

    #[error("IO错误 ({0}): {1}")]
    IoError(PathBuf, #[source] std::io::Error),
}

/// 目录遍历器
pub struct TreeWalker {
    /// 超过该大小的文件标记为跳过而非提交生成
    max_file_size: u64,
}

impl TreeWalker {
    /// 创建新的遍历器
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    /// 遍历项目根目录，返回确定有序的候选序列
    ///
    /// 每一层按名称字典序迭代，与文件系统枚举顺序无关，
    /// 保证同一棵树两次运行产出完全相同的序列。跳过的文件
    /// （二进制、超大、不可读）保留在序列中以稳定进度统计。
    pub fn walk(
        &self,
        root: &Path,
        matcher: &ExclusionMatcher,
    ) -> Result<Vec<FileCandidate>, WalkError> {
        let tree = self.scan(root, matcher)?;

        let mut candidates = Vec::new();
        self.flatten(&tree, &mut candidates);
        info!(
            "Walk completed: {} candidates under {}",
            candidates.len(),
            root.display()
        );
        Ok(candidates)
    }

    /// 扫描目录，构建显式文件树
    pub fn scan(&self, root: &Path, matcher: &ExclusionMatcher) -> Result<FileNode, WalkError> {
        if !root.exists() {
            return Err(WalkError::PathNotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(WalkError::NotADirectory(root.to_path_buf()));
        }

        info!("Starting directory walk: {}", root.display());
        self.scan_dir(root, root, matcher)
    }

    /// 递归扫描目录
    fn scan_dir(
        &self,
        path: &Path,
        root: &Path,
        matcher: &ExclusionMatcher,
    ) -> Result<FileNode, WalkError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        let relative = relative_of(path, root);

        let mut node = FileNode::new_dir(name, path.to_path_buf(), relative);

        let entries = fs::read_dir(path).map_err(|e| WalkError::IoError(path.to_path_buf(), e))?;

        // 先收集、后按名称排序，消除文件系统迭代顺序的不确定性
        let mut names: Vec<(String, PathBuf, fs::FileType)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| WalkError::IoError(path.to_path_buf(), e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| WalkError::IoError(entry.path(), e))?;
            names.push((
                entry.file_name().to_string_lossy().to_string(),
                entry.path(),
                file_type,
            ));
        }
        names.sort_by(|a, b| a.0.cmp(&b.0));

        for (entry_name, entry_path, file_type) in names {
            let entry_relative = relative_of(&entry_path, root);

            // 不跟随符号链接，避免循环链接和越界读取
            if file_type.is_symlink() {
                debug!("Skipping symlink: {}", entry_relative);
                continue;
            }

            if file_type.is_dir() {
                // 版本控制元数据无条件剪枝
                if entry_name == VCS_DIR {
                    continue;
                }
                // 被排除的目录不下探（剪枝而非后过滤）
                if matcher.is_dir_excluded(&entry_relative) {
                    debug!("Pruning excluded directory: {}", entry_relative);
                    continue;
                }
                match self.scan_dir(&entry_path, root, matcher) {
                    Ok(child) => node.children.push(child),
                    Err(e) => {
                        warn!("Failed to scan subdirectory {}: {}", entry_path.display(), e);
                    }
                }
            } else if file_type.is_file() {
                if matcher.is_excluded(&entry_relative) {
                    debug!("Excluding file: {}", entry_relative);
                    continue;
                }
                let size = fs::metadata(&entry_path)
                    .map(|m| m.len())
                    .unwrap_or_default();
                node.children
                    .push(FileNode::new_file(entry_name, entry_path, entry_relative, size));
            }
        }

        Ok(node)
    }

    /// 深度优先展平文件树，文件节点转换为候选
    fn flatten(&self, node: &FileNode, out: &mut Vec<FileCandidate>) {
        if node.is_file {
            out.push(self.classify(node));
            return;
        }
        for child in &node.children {
            self.flatten(child, out);
        }
    }

    /// 将文件节点转换为候选
    fn classify(&self, node: &FileNode) -> FileCandidate {
        let size = node.size.unwrap_or_default();

        let (is_binary, status) = if size > self.max_file_size {
            (false, CandidateStatus::Skipped(SkipReason::Oversized))
        } else {
            match sniff_binary(&node.path) {
                Ok(true) => (true, CandidateStatus::Skipped(SkipReason::Binary)),
                Ok(false) => (false, CandidateStatus::Pending),
                Err(e) => {
                    warn!("Failed to read {}: {}", node.path.display(), e);
                    (false, CandidateStatus::Skipped(SkipReason::Unreadable))
                }
            }
        };

        FileCandidate {
            relative_path: node.relative_path.clone(),
            size_bytes: size,
            is_binary,
            status,
        }
    }
}

/// 计算相对路径字符串（`/` 分隔）
fn relative_of(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .map(|p| p.to_string_lossy().to_string().replace('\\', "/"))
        .unwrap_or_default()
}

/// 读取文件前缀探测是否为二进制（包含 NUL 字节）
fn sniff_binary(path: &Path) -> std::io::Result<bool> {
    let mut file = fs::File::open(path)?;
    let mut buffer = [0u8; BINARY_SNIFF_BYTES];
    let read = file.read(&mut buffer)?;
    Ok(buffer[..read].contains(&0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::ExclusionRule;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_tree() -> TempDir {
        let dir = TempDir::new().unwrap();

        fs::create_dir(dir.path().join("src")).unwrap();
        File::create(dir.path().join("src/main.go"))
            .unwrap()
            .write_all(b"package main")
            .unwrap();
        File::create(dir.path().join("src/util.go"))
            .unwrap()
            .write_all(b"package main // util")
            .unwrap();
        File::create(dir.path().join("README.md"))
            .unwrap()
            .write_all(b"# demo")
            .unwrap();

        // 版本控制元数据
        fs::create_dir(dir.path().join(".git")).unwrap();
        File::create(dir.path().join(".git/HEAD"))
            .unwrap()
            .write_all(b"ref: refs/heads/main")
            .unwrap();

        dir
    }

    fn no_rules() -> ExclusionMatcher {
        ExclusionMatcher::compile(&[]).unwrap()
    }

    #[test]
    fn test_walk_is_lexicographic_and_deterministic() {
        let dir = create_test_tree();
        let walker = TreeWalker::new(1024 * 1024);

        let first = walker.walk(dir.path(), &no_rules()).unwrap();
        let second = walker.walk(dir.path(), &no_rules()).unwrap();

        let paths: Vec<_> = first.iter().map(|c| c.relative_path.clone()).collect();
        assert_eq!(paths, vec!["README.md", "src/main.go", "src/util.go"]);
        let paths2: Vec<_> = second.iter().map(|c| c.relative_path.clone()).collect();
        assert_eq!(paths, paths2);
    }

    #[test]
    fn test_vcs_dir_always_pruned() {
        let dir = create_test_tree();
        let walker = TreeWalker::new(1024 * 1024);
        let candidates = walker.walk(dir.path(), &no_rules()).unwrap();
        assert!(candidates.iter().all(|c| !c.relative_path.starts_with(".git")));
    }

    #[test]
    fn test_excluded_directory_never_recursed() {
        let dir = create_test_tree();
        // 被排除目录中的哨兵文件绝不能出现
        fs::create_dir(dir.path().join("vendor")).unwrap();
        File::create(dir.path().join("vendor/lib.go"))
            .unwrap()
            .write_all(b"package vendored")
            .unwrap();

        let matcher =
            ExclusionMatcher::compile(&[ExclusionRule::Pattern("vendor/".to_string())]).unwrap();
        let walker = TreeWalker::new(1024 * 1024);
        let candidates = walker.walk(dir.path(), &matcher).unwrap();

        assert!(candidates.iter().all(|c| !c.relative_path.contains("vendor")));
        assert!(candidates.iter().any(|c| c.relative_path == "src/main.go"));
    }

    #[test]
    fn test_binary_file_skipped_but_listed() {
        let dir = create_test_tree();
        File::create(dir.path().join("logo.png"))
            .unwrap()
            .write_all(&[0x89, 0x50, 0x4e, 0x47, 0x00, 0x01, 0x02])
            .unwrap();

        let walker = TreeWalker::new(1024 * 1024);
        let candidates = walker.walk(dir.path(), &no_rules()).unwrap();

        let binary = candidates
            .iter()
            .find(|c| c.relative_path == "logo.png")
            .unwrap();
        assert!(binary.is_binary);
        assert_eq!(binary.status, CandidateStatus::Skipped(SkipReason::Binary));
    }

    #[test]
    fn test_oversized_file_skipped() {
        let dir = create_test_tree();
        File::create(dir.path().join("big.txt"))
            .unwrap()
            .write_all(&b"x".repeat(64))
            .unwrap();

        let walker = TreeWalker::new(16);
        let candidates = walker.walk(dir.path(), &no_rules()).unwrap();

        let big = candidates
            .iter()
            .find(|c| c.relative_path == "big.txt")
            .unwrap();
        assert_eq!(big.status, CandidateStatus::Skipped(SkipReason::Oversized));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_never_followed() {
        let dir = TempDir::new().unwrap();
        File::create(dir.path().join("main.py"))
            .unwrap()
            .write_all(b"print('hi')")
            .unwrap();
        // 自引用目录链接，跟随则无限复制候选
        std::os::unix::fs::symlink(".", dir.path().join("loop")).unwrap();
        // 指向项目外文件的链接不得被读取
        let outside = TempDir::new().unwrap();
        File::create(outside.path().join("secret.txt"))
            .unwrap()
            .write_all(b"outside")
            .unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret.txt"),
            dir.path().join("leak.txt"),
        )
        .unwrap();

        let walker = TreeWalker::new(1024 * 1024);
        let candidates = walker.walk(dir.path(), &no_rules()).unwrap();

        let paths: Vec<_> = candidates.iter().map(|c| c.relative_path.clone()).collect();
        assert_eq!(paths, vec!["main.py"]);
    }

    #[test]
    fn test_missing_root_fails() {
        let walker = TreeWalker::new(1024);
        let result = walker.walk(Path::new("/nonexistent/codescribe-test"), &no_rules());
        assert!(matches!(result, Err(WalkError::PathNotFound(_))));
    }
}
