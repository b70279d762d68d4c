//! 同步配置模块
//!
//! 所有配置都保存在 `<config_dir>/config.json` 中，按 section 区分（`sync`、`log`）。

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

const CONFIG_FILE: &str = "config.json";

/// 同步配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// 暂停时检查恢复/取消的轮询间隔（毫秒）
    #[serde(default = "default_pause_poll_interval_ms")]
    pub pause_poll_interval_ms: u64,
    /// 累计失败多少个文件后自动取消，0 表示不限制
    #[serde(default)]
    pub max_errors_before_cancel: usize,
    /// 监听器回调失败是否终止运行
    #[serde(default)]
    pub listener_errors_fatal: bool,
    /// 单个文件的最大重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 重试基础延迟（毫秒），按指数退避
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// 修改时间容差（秒），差值不超过该值视为相同
    #[serde(default)]
    pub time_tolerance_seconds: i64,
    /// 排除规则（glob）
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// 两端大小相同时是否读取内容计算 checksum
    #[serde(default)]
    pub include_checksums: bool,
}

fn default_pause_poll_interval_ms() -> u64 {
    250
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pause_poll_interval_ms: default_pause_poll_interval_ms(),
            max_errors_before_cancel: 0,
            listener_errors_fatal: false,
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            time_tolerance_seconds: 0,
            exclude_patterns: Vec::new(),
            include_checksums: false,
        }
    }
}

impl SyncConfig {
    /// 从配置文件加载，缺失或损坏时使用默认值
    pub fn load(config_dir: &Path) -> Self {
        load_section(config_dir, "sync").unwrap_or_default()
    }

    /// 保存同步配置（保留其他 section）
    pub fn save(&self, config_dir: &Path) -> Result<()> {
        save_section(config_dir, "sync", self)
    }

    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pause_poll_interval_ms.max(1))
    }
}

/// 读取 config.json 中的某个 section
pub(crate) fn load_section<T: DeserializeOwned>(config_dir: &Path, key: &str) -> Option<T> {
    let content = fs::read_to_string(config_dir.join(CONFIG_FILE)).ok()?;
    let mut config: serde_json::Value = serde_json::from_str(&content).ok()?;
    let section = config.get_mut(key)?.take();
    match serde_json::from_value(section) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("配置项 {} 解析失败，使用默认值: {}", key, e);
            None
        }
    }
}

/// 更新 config.json 中的某个 section
pub(crate) fn save_section<T: Serialize>(config_dir: &Path, key: &str, value: &T) -> Result<()> {
    let config_file = config_dir.join(CONFIG_FILE);

    // 读取现有配置
    let mut config: serde_json::Value = if config_file.exists() {
        let content = fs::read_to_string(&config_file)?;
        serde_json::from_str(&content).unwrap_or_else(|_| serde_json::json!({}))
    } else {
        fs::create_dir_all(config_dir)?;
        serde_json::json!({})
    };
    if !config.is_object() {
        config = serde_json::json!({});
    }

    config[key] = serde_json::to_value(value)?;
    fs::write(&config_file, serde_json::to_string_pretty(&config)?)?;

    Ok(())
}
