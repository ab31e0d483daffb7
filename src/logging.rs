//! 日志模块

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否启用日志记录
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
    /// 额外写入的日志文件
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
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
            file: None,
        }
    }
}

impl LogConfig {
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

    /// 过滤器：`RUST_LOG` 优先，否则使用配置的级别
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::default()
                .add_directive(self.tracing_level().into())
        })
    }
}

fn split_log_path(file: &Path) -> (PathBuf, PathBuf) {
    let dir = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let name = file
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("treesync.log"));
    (dir, name)
}

/// 初始化日志系统
///
/// 日志写 stderr，配置了文件时同时写入文件。返回的 guard 需要保持到进程结束，
/// 否则缓冲中的文件日志会丢失。
pub fn init_logging(config: &LogConfig) -> Option<WorkerGuard> {
    if !config.enabled {
        // 日志已禁用，只初始化一个空的 subscriber
        let _ = tracing::subscriber::set_global_default(tracing_subscriber::registry());
        return None;
    }

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let mut guard = None;
    let file_layer = config.file.as_deref().and_then(|file| {
        let (dir, name) = split_log_path(file);
        if let Err(e) = std::fs::create_dir_all(&dir) {
            eprintln!("无法创建日志目录 {}: {}", dir.display(), e);
            return None;
        }
        let appender = tracing_appender::rolling::never(dir, name);
        let (writer, g) = tracing_appender::non_blocking(appender);
        guard = Some(g);
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false),
        )
    });

    let subscriber = tracing_subscriber::registry()
        .with(config.env_filter())
        .with(console_layer)
        .with(file_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing() {
        let mut config = LogConfig::default();
        assert_eq!(config.tracing_level(), tracing::Level::INFO);
        config.level = "DEBUG".into();
        assert_eq!(config.tracing_level(), tracing::Level::DEBUG);
        config.level = "nonsense".into();
        assert_eq!(config.tracing_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_split_log_path() {
        let (dir, name) = split_log_path(Path::new("logs/run.log"));
        assert_eq!(dir, PathBuf::from("logs"));
        assert_eq!(name, PathBuf::from("run.log"));

        let (dir, _) = split_log_path(Path::new("run.log"));
        assert_eq!(dir, PathBuf::from("."));
    }
}
