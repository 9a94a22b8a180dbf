//! 应用配置管理
//!
//! 提供配置的加载、保存、更新功能，使用全局单例模式管理配置状态。

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::error::PipelineError;

/// 获取配置文件路径
fn get_config_path() -> PathBuf {
    // 配置文件位于可执行文件同级目录
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("config.json")
}

/// 应用配置结构体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// LLM API 密钥
    #[serde(default)]
    pub api_key: String,

    /// LLM API 基础 URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// 模型名称
    #[serde(default = "default_model")]
    pub model: String,

    /// 同时在途的后端调用数
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// 单文件大小上限（字节），超过则跳过
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// 单文件最大后端调用次数（含首次）
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// 重试退避基准（毫秒）
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// 提交给后端的单文件内容上限（字节）
    #[serde(default = "default_max_prompt_bytes")]
    pub max_prompt_bytes: usize,
}

fn default_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_concurrency() -> usize {
    3
}

fn default_max_file_size() -> u64 {
    1024 * 1024
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_max_prompt_bytes() -> usize {
    60_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            model: default_model(),
            concurrency: default_concurrency(),
            max_file_size: default_max_file_size(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            max_prompt_bytes: default_max_prompt_bytes(),
        }
    }
}

/// 全局配置单例
static CONFIG: Lazy<RwLock<AppConfig>> = Lazy::new(|| {
    RwLock::new(load_config_from_file().unwrap_or_default())
});

/// 从文件加载配置
fn load_config_from_file() -> Option<AppConfig> {
    let path = get_config_path();
    if path.exists() {
        let content = fs::read_to_string(&path).ok()?;
        serde_json::from_str(&content).ok()
    } else {
        None
    }
}

/// 保存配置到文件
fn save_config_to_file(config: &AppConfig) -> Result<(), PipelineError> {
    let path = get_config_path();
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| PipelineError::Config(format!("序列化配置失败: {}", e)))?;
    fs::write(&path, content)
        .map_err(|e| PipelineError::Config(format!("写入配置文件失败: {}", e)))?;
    Ok(())
}

/// 获取当前配置（克隆）
pub fn get_config() -> AppConfig {
    CONFIG.read().clone()
}

/// 更新配置
///
/// 接收一个闭包来修改配置，修改后自动保存到文件
pub fn update_config<F>(updater: F) -> Result<AppConfig, PipelineError>
where
    F: FnOnce(&mut AppConfig),
{
    let mut config = CONFIG.write();
    updater(&mut config);
    save_config_to_file(&config)?;
    Ok(config.clone())
}

/// 替换整个配置
pub fn set_config(new_config: AppConfig) -> Result<(), PipelineError> {
    save_config_to_file(&new_config)?;
    *CONFIG.write() = new_config;
    Ok(())
}

/// 重新从文件加载配置
pub fn reload_config() {
    if let Some(config) = load_config_from_file() {
        *CONFIG.write() = config;
    }
}
