//! 排除规则匹配器
//!
//! 将正则规则与字面路径规则编译为针对相对路径的单一谓词

use regex::Regex;
use tracing::debug;

use super::types::ExclusionRule;

/// 编译后的排除规则匹配器
///
/// 规则按 OR 组合：任意一条规则命中即排除。匹配前统一
/// 规范化路径分隔符并去除前导 `./`，保证平台差异不影响结果。
pub struct ExclusionMatcher {
    /// 编译后的正则规则
    patterns: Vec<Regex>,
    /// 字面路径规则（精确或目录前缀匹配）
    paths: Vec<String>,
}

/// 规则编译错误类型
#[derive(Debug, thiserror::Error)]
pub enum ExclusionError {
    #[error("无效的排除规则 '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// 规范化相对路径：统一分隔符、去除前导 `./` 与尾部 `/`
fn normalize(path: &str) -> String {
    let mut p = path.replace('\\', "/");
    while let Some(stripped) = p.strip_prefix("./") {
        p = stripped.to_string();
    }
    p.trim_end_matches('/').to_string()
}

impl ExclusionMatcher {
    /// 编译规则集合
    ///
    /// 空白规则被忽略；任何一条非法正则都会让整个请求同步失败，
    /// 不允许在遍历中途才暴露规则错误。
    pub fn compile(rules: &[ExclusionRule]) -> Result<Self, ExclusionError> {
        let mut patterns = Vec::new();
        let mut paths = Vec::new();

        for rule in rules {
            match rule {
                ExclusionRule::Pattern(raw) => {
                    let trimmed = raw.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    let regex = Regex::new(trimmed).map_err(|e| {
                        ExclusionError::InvalidPattern {
                            pattern: trimmed.to_string(),
                            reason: e.to_string(),
                        }
                    })?;
                    patterns.push(regex);
                }
                ExclusionRule::Path(raw) => {
                    let normalized = normalize(raw.trim());
                    if normalized.is_empty() {
                        continue;
                    }
                    paths.push(normalized);
                }
            }
        }

        debug!(
            "Compiled exclusion matcher: {} patterns, {} literal paths",
            patterns.len(),
            paths.len()
        );

        Ok(Self { patterns, paths })
    }

    /// 单个路径字符串是否命中任意规则
    ///
    /// 正则按搜索语义匹配；目录会额外以 `dir/` 形式再测一次，
    /// 使 `vendor/` 这类以分隔符结尾的规则能够剪掉整个子树。
    fn hit(&self, normalized: &str, is_dir: bool) -> bool {
        for regex in &self.patterns {
            if regex.is_match(normalized) {
                return true;
            }
            if is_dir && regex.is_match(&format!("{}/", normalized)) {
                return true;
            }
        }
        for path in &self.paths {
            if normalized == path || normalized.starts_with(&format!("{}/", path)) {
                return true;
            }
        }
        false
    }

    /// 文件是否被排除（检查自身及所有祖先目录）
    pub fn is_excluded(&self, relative_path: &str) -> bool {
        let normalized = normalize(relative_path);
        if normalized.is_empty() {
            return false;
        }
        if self.hit(&normalized, false) {
            return true;
        }
        // 祖先目录命中则整个子树被排除
        let mut ancestor = String::new();
        for part in normalized.split('/') {
            if !ancestor.is_empty() {
                ancestor.push('/');
            }
            ancestor.push_str(part);
            if ancestor == normalized {
                break;
            }
            if self.hit(&ancestor, true) {
                return true;
            }
        }
        false
    }

    /// 目录是否被排除（遍历器据此决定是否下探）
    pub fn is_dir_excluded(&self, relative_path: &str) -> bool {
        let normalized = normalize(relative_path);
        if normalized.is_empty() {
            return false;
        }
        self.hit(&normalized, true)
    }
}
