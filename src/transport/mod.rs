//! 远程传输适配层
//!
//! 同步核心只依赖 [`Transport`] 这一组操作；具体端点（本地目录、WebDAV、S3、内存）
//! 在各自的子模块中实现。

pub mod local;
pub mod memory;
pub mod operator;

use crate::error::TransportError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub use local::LocalTransport;
pub use memory::{MemoryTransport, Op};
pub use operator::OperatorTransport;

// ============ 文件类型位 ============

pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;

/// 目录列表中的一项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    pub mode: u32,
    pub size: u64,
    pub mtime: i64,
}

impl RemoteEntry {
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }
}

/// 已连接的远程会话
///
/// 语义与常见的远程文件协议一致：`rename` 在目标已存在时失败，
/// `mkdir` 在父目录缺失或路径已存在时失败，`change_dir` 仅用于探测目录是否存在。
#[async_trait]
pub trait Transport: Send + Sync {
    /// 上传本地文件的完整内容
    async fn put(&self, local: &Path, remote: &str) -> Result<(), TransportError>;

    /// 下载远程文件到本地路径
    async fn get(&self, remote: &str, local: &Path) -> Result<(), TransportError>;

    async fn rename(&self, from: &str, to: &str) -> Result<(), TransportError>;

    async fn remove(&self, path: &str) -> Result<(), TransportError>;

    async fn mkdir(&self, path: &str) -> Result<(), TransportError>;

    /// 列出单层目录及每项的 mode/size/mtime
    async fn list_dir(&self, dir: &str) -> Result<Vec<RemoteEntry>, TransportError>;

    async fn change_dir(&self, dir: &str) -> Result<(), TransportError>;

    /// 端点名称（用于日志）
    fn name(&self) -> &str;
}

/// 端点类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    #[default]
    Local,
    Memory,
    WebDav,
    S3,
}

/// 端点配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    #[serde(rename = "type", default)]
    pub typ: TransportType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
}

/// 根据配置创建传输实例
pub fn create_transport(config: &TransportConfig) -> Result<Arc<dyn Transport>> {
    match config.typ {
        TransportType::Local => {
            let path = config
                .path
                .as_ref()
                .context("local transport requires path")?;
            tracing::info!("初始化本地端点: {}", path);
            Ok(Arc::new(LocalTransport::new(path)?) as Arc<dyn Transport>)
        }
        TransportType::Memory => {
            tracing::info!("初始化内存端点");
            Ok(Arc::new(MemoryTransport::new()) as Arc<dyn Transport>)
        }
        TransportType::WebDav => {
            let endpoint = config
                .endpoint
                .as_ref()
                .context("webdav transport requires endpoint")?;
            tracing::info!("初始化WebDAV端点: endpoint={}, root={:?}", endpoint, config.root);
            Ok(Arc::new(OperatorTransport::webdav(
                endpoint,
                config.username.as_deref(),
                config.password.as_deref(),
                config.root.as_deref(),
            )?) as Arc<dyn Transport>)
        }
        TransportType::S3 => {
            let bucket = config
                .bucket
                .as_ref()
                .context("s3 transport requires bucket")?;
            let region = config
                .region
                .as_ref()
                .context("s3 transport requires region")?;
            tracing::info!("初始化S3端点: bucket={}, region={}", bucket, region);
            Ok(Arc::new(OperatorTransport::s3(
                bucket,
                region,
                config.access_key.as_deref(),
                config.secret_key.as_deref(),
                config.endpoint.as_deref(),
                config.root.as_deref(),
            )?) as Arc<dyn Transport>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_mode_bits() {
        let dir = RemoteEntry {
            name: "docs".into(),
            mode: S_IFDIR | 0o755,
            size: 0,
            mtime: 0,
        };
        let file = RemoteEntry {
            name: "a.txt".into(),
            mode: S_IFREG | 0o644,
            size: 2,
            mtime: 0,
        };
        assert!(dir.is_dir());
        assert!(!file.is_dir());
    }

    #[test]
    fn test_transport_config_from_json() {
        let config: TransportConfig = serde_json::from_str(
            r#"{"type": "webdav", "endpoint": "https://dav.example.com", "username": "u", "root": "/backup"}"#,
        )
        .unwrap();
        assert_eq!(config.typ, TransportType::WebDav);
        assert_eq!(config.root.as_deref(), Some("/backup"));
        assert!(config.password.is_none());
    }

    #[test]
    fn test_create_local_requires_path() {
        let config = TransportConfig::default();
        assert!(create_transport(&config).is_err());
    }
}
