//! 应用配置模块

use crate::logging::LogConfig;
use crate::transport::TransportConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 同步参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    /// 包含规则（为空表示全部）
    #[serde(default)]
    pub include: Vec<String>,
    /// 排除规则（优先于包含）
    #[serde(default)]
    pub exclude: Vec<String>,
    /// 双向同步时 mtime 差值在此范围内视为冲突（秒）
    #[serde(default = "default_conflict_tolerance")]
    pub conflict_tolerance_secs: i64,
    /// 最大并发传输数
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_transfers: usize,
}

fn default_conflict_tolerance() -> i64 {
    5
}

fn default_max_concurrent() -> usize {
    1 // 默认逐个传输
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            conflict_tolerance_secs: default_conflict_tolerance(),
            max_concurrent_transfers: default_max_concurrent(),
        }
    }
}

/// 完整配置文件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub remote: TransportConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub log: LogConfig,
}

impl AppConfig {
    /// 从 JSON 文件加载配置
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("配置文件格式错误: {}", path.display()))
    }

    /// 文件不存在时使用默认配置
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("配置文件不存在，使用默认配置: {}", path.display());
            Ok(Self::default())
        }
    }

    /// 保存配置
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("无法写入配置文件: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportType;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: AppConfig =
            serde_json::from_str(r#"{"sync": {"include": ["*.txt"]}}"#).unwrap();
        assert_eq!(config.sync.include, vec!["*.txt".to_string()]);
        assert_eq!(config.sync.conflict_tolerance_secs, 5);
        assert_eq!(config.sync.max_concurrent_transfers, 1);
        assert_eq!(config.log.level, "info");
        assert_eq!(config.remote.typ, TransportType::Local);
    }

    #[test]
    fn test_load_or_default_and_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let config = AppConfig::load_or_default(&path).unwrap();
        assert!(config.sync.exclude.is_empty());

        let mut config = config;
        config.sync.exclude.push("*.tmp".into());
        config.sync.max_concurrent_transfers = 4;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.sync.exclude, vec!["*.tmp".to_string()]);
        assert_eq!(loaded.sync.max_concurrent_transfers, 4);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(AppConfig::load(&path).is_err());
        assert!(AppConfig::load_or_default(&path).is_err());
    }
}
