//! 产物打包
//!
//! 将工作区内容（原始文件与生成的文档）打成单个 zip 归档，
//! 归档落在工作区内部，检索 key 即归档文件名。

use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::info;
use uuid::Uuid;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::types::Artifact;

/// 打包错误
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("IO错误 ({0}): {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("归档写入失败: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// 打包整个工作区
///
/// 先收集条目再创建归档文件，避免归档把自身也收进去。
/// 条目按路径字典序写入，保证归档内容确定。
pub fn package(workspace_root: &Path, project_name: &str) -> Result<Artifact, ArchiveError> {
    let retrieval_key = build_retrieval_key(project_name);
    let archive_path = workspace_root.join(&retrieval_key);

    let mut entries: Vec<(PathBuf, String)> = Vec::new();
    for entry in WalkDir::new(workspace_root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            ArchiveError::Io(workspace_root.to_path_buf(), e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(workspace_root)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();
        if relative.is_empty() {
            continue;
        }
        entries.push((entry.path().to_path_buf(), relative));
    }

    let file = File::create(&archive_path)
        .map_err(|e| ArchiveError::Io(archive_path.clone(), e))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    // 逐条流式拷贝，超大文件不整体进内存
    for (path, relative) in &entries {
        writer.start_file(relative, options)?;
        let mut source = File::open(path).map_err(|e| ArchiveError::Io(path.clone(), e))?;
        std::io::copy(&mut source, &mut writer)
            .map_err(|e| ArchiveError::Io(path.clone(), e))?;
    }
    writer.finish()?;

    info!(
        "Packaged {} files into {}",
        entries.len(),
        archive_path.display()
    );
    Ok(Artifact {
        archive_path,
        retrieval_key,
    })
}

/// 构建检索 key：清洗后的项目名 + 短随机后缀
fn build_retrieval_key(project_name: &str) -> String {
    let sanitized: String = project_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let sanitized = if sanitized.is_empty() {
        "project".to_string()
    } else {
        sanitized
    };
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_documented_{}.zip", sanitized, &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;
    use zip::ZipArchive;

    #[test]
    fn test_retrieval_key_sanitized_and_unique() {
        let key = build_retrieval_key("my project/v2");
        assert!(key.starts_with("my_project_v2_documented_"));
        assert!(key.ends_with(".zip"));
        assert_ne!(build_retrieval_key("a"), build_retrieval_key("a"));

        let fallback = build_retrieval_key("本地项目");
        assert!(fallback.starts_with("____"));
    }

    #[test]
    fn test_package_contains_all_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("main.py"), "print('hi')").unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/main.py.md"), "# 文档").unwrap();

        let artifact = package(dir.path(), "demo").unwrap();
        assert!(artifact.archive_path.exists());
        assert!(artifact.archive_path.starts_with(dir.path()));

        let file = File::open(&artifact.archive_path).unwrap();
        let mut archive = ZipArchive::new(file).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.contains(&"main.py".to_string()));
        assert!(names.contains(&"docs/main.py.md".to_string()));
        // 归档不包含自身
        assert!(!names.iter().any(|n| n == &artifact.retrieval_key));
    }

    #[test]
    fn test_package_streams_large_entry_intact() {
        let dir = TempDir::new().unwrap();
        // 超过任何内部缓冲区的条目，验证分块拷贝不丢字节
        let big: Vec<u8> = (0..1_048_576u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(dir.path().join("asset.bin"), &big).unwrap();

        let artifact = package(dir.path(), "demo").unwrap();
        let file = File::open(&artifact.archive_path).unwrap();
        let mut archive = ZipArchive::new(file).unwrap();
        let mut entry = archive.by_name("asset.bin").unwrap();
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        assert_eq!(content, big);
    }

    #[test]
    fn test_package_roundtrip_content() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "原始内容").unwrap();

        let artifact = package(dir.path(), "demo").unwrap();
        let file = File::open(&artifact.archive_path).unwrap();
        let mut archive = ZipArchive::new(file).unwrap();
        let mut entry = archive.by_name("a.txt").unwrap();
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        assert_eq!(content, "原始内容");
    }
}
