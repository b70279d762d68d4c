//! 日志模块 - 控制台输出 + 按天滚动的文件日志

use crate::config::{load_section, save_section};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否启用日志记录
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
    /// 文件日志目录，None 表示只输出到控制台
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_enabled() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            level: default_level(),
            directory: None,
        }
    }
}

impl LogConfig {
    /// 从配置文件加载日志配置
    pub fn load(config_dir: &Path) -> Self {
        load_section(config_dir, "log").unwrap_or_default()
    }

    /// 保存日志配置
    pub fn save(&self, config_dir: &Path) -> Result<()> {
        save_section(config_dir, "log", self)
    }

    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

/// 日志过滤器：设置了 `RUST_LOG` 时只使用它，否则使用配置的级别
///
/// `RUST_LOG` 无法解析时回退到配置。
fn build_filter(rust_log: Option<&str>, config: &LogConfig) -> EnvFilter {
    if let Some(directives) = rust_log.filter(|s| !s.trim().is_empty()) {
        match EnvFilter::try_new(directives) {
            Ok(filter) => return filter,
            Err(e) => eprintln!("RUST_LOG 无效，使用配置的日志级别: {}", e),
        }
    }
    EnvFilter::new(config.tracing_level().as_str().to_lowercase())
}

/// 初始化全局日志
///
/// 返回的 guard 需要由调用方持有到进程结束，否则文件日志可能丢失尾部。
/// 全局 subscriber 已存在时（例如测试中重复调用）静默忽略。
pub fn init_logging(config: &LogConfig) -> Option<WorkerGuard> {
    if !config.enabled {
        return None;
    }

    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let env_filter = build_filter(rust_log.as_deref(), config);

    let file_dir = match config.directory.as_ref() {
        Some(dir) => match std::fs::create_dir_all(dir) {
            Ok(()) => Some(dir),
            Err(e) => {
                // 文件日志创建失败，回退到控制台
                eprintln!("无法创建日志目录 {:?}: {}", dir, e);
                None
            }
        },
        None => None,
    };

    let Some(dir) = file_dir else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false);
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init();
        return None;
    };

    let appender = tracing_appender::rolling::daily(dir, "gridsync.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false);
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    Some(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_level_fallback() {
        let mut config = LogConfig::default();
        assert_eq!(config.tracing_level(), tracing::Level::INFO);
        config.level = "DEBUG".into();
        assert_eq!(config.tracing_level(), tracing::Level::DEBUG);
        config.level = "verbose".into();
        assert_eq!(config.tracing_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_log_section_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            enabled: true,
            level: "warn".into(),
            directory: Some(dir.path().join("logs")),
        };
        config.save(dir.path()).unwrap();
        assert_eq!(LogConfig::load(dir.path()), config);
    }

    #[test]
    fn test_disabled_logging_returns_no_guard() {
        let config = LogConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(init_logging(&config).is_none());
    }

    #[test]
    fn test_rust_log_replaces_configured_level() {
        use tracing_subscriber::filter::LevelFilter;

        let config = LogConfig {
            level: "debug".into(),
            ..Default::default()
        };
        assert_eq!(
            build_filter(None, &config).max_level_hint(),
            Some(LevelFilter::DEBUG)
        );
        // 不与配置合并
        assert_eq!(
            build_filter(Some("warn"), &config).max_level_hint(),
            Some(LevelFilter::WARN)
        );
        assert_eq!(
            build_filter(Some("  "), &config).max_level_hint(),
            Some(LevelFilter::DEBUG)
        );
        assert_eq!(
            build_filter(Some("gridsync=loud"), &config).max_level_hint(),
            Some(LevelFilter::DEBUG)
        );
    }
}
