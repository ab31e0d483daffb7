use super::{RemoteEntry, Transport, S_IFDIR, S_IFREG};
use crate::error::TransportError;
use async_trait::async_trait;
use opendal::{layers::TimeoutLayer, Metakey, Operator};
use std::path::Path;
use std::time::Duration;

/// 非 IO 操作超时（秒）- stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 基于 opendal `Operator` 的远程端点（WebDAV、S3 等）
///
/// 不支持原生 rename 的服务会返回 `Unsupported`，由上传的回退分支处理。
pub struct OperatorTransport {
    operator: Operator,
    name: String,
}

/// opendal 路径不以 `/` 开头
fn object_path(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// 目录路径以 `/` 结尾，根目录为 `/`
fn dir_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        "/".to_string()
    } else {
        format!("{}/", trimmed)
    }
}

impl OperatorTransport {
    pub fn new(operator: Operator, name: impl Into<String>) -> Self {
        Self {
            operator,
            name: name.into(),
        }
    }

    fn with_timeouts(operator: Operator) -> Operator {
        operator.layer(
            TimeoutLayer::default()
                .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
        )
    }

    pub fn webdav(
        endpoint: &str,
        username: Option<&str>,
        password: Option<&str>,
        root: Option<&str>,
    ) -> Result<Self, TransportError> {
        use opendal::services::Webdav;

        let mut builder = Webdav::default().endpoint(endpoint);
        if let Some(u) = username {
            builder = builder.username(u);
        }
        if let Some(p) = password {
            builder = builder.password(p);
        }
        if let Some(r) = root {
            builder = builder.root(r);
        }

        let operator = Self::with_timeouts(Operator::new(builder)?.finish());
        let name = format!(
            "webdav://{}{}",
            endpoint.trim_end_matches('/'),
            root.map(|r| format!("/{}", r.trim_start_matches('/')))
                .unwrap_or_default()
        );
        Ok(Self::new(operator, name))
    }

    pub fn s3(
        bucket: &str,
        region: &str,
        access_key: Option<&str>,
        secret_key: Option<&str>,
        endpoint: Option<&str>,
        root: Option<&str>,
    ) -> Result<Self, TransportError> {
        use opendal::services::S3;

        let mut builder = S3::default().bucket(bucket).region(region);
        if let Some(k) = access_key {
            builder = builder.access_key_id(k);
        }
        if let Some(s) = secret_key {
            builder = builder.secret_access_key(s);
        }
        if let Some(ep) = endpoint {
            builder = builder.endpoint(ep);
        }
        if let Some(r) = root {
            builder = builder.root(r);
        }

        let operator = Self::with_timeouts(Operator::new(builder)?.finish());
        let name = format!(
            "s3://{}{}",
            bucket,
            root.map(|r| format!("/{}", r.trim_start_matches('/')))
                .unwrap_or_default()
        );
        Ok(Self::new(operator, name))
    }

    /// 本地文件系统服务，主要用于测试 opendal 路径
    pub fn fs(root: &str) -> Result<Self, TransportError> {
        use opendal::services::Fs;

        let operator = Operator::new(Fs::default().root(root))?.finish();
        Ok(Self::new(operator, format!("fs://{}", root)))
    }
}

#[async_trait]
impl Transport for OperatorTransport {
    async fn put(&self, local: &Path, remote: &str) -> Result<(), TransportError> {
        let data = tokio::fs::read(local)
            .await
            .map_err(|e| TransportError::from_io(e, &local.display().to_string()))?;
        self.operator.write(object_path(remote), data).await?;
        Ok(())
    }

    async fn get(&self, remote: &str, local: &Path) -> Result<(), TransportError> {
        let data = self.operator.read(object_path(remote)).await?;
        tokio::fs::write(local, data.to_vec())
            .await
            .map_err(|e| TransportError::from_io(e, &local.display().to_string()))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), TransportError> {
        if self.operator.exists(object_path(to)).await? {
            return Err(TransportError::AlreadyExists(to.to_string()));
        }
        self.operator
            .rename(object_path(from), object_path(to))
            .await?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), TransportError> {
        // 部分服务删除不存在的对象不会报错，这里统一成 NotFound
        if !self.operator.exists(object_path(path)).await? {
            return Err(TransportError::NotFound(path.to_string()));
        }
        self.operator.delete(object_path(path)).await?;
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> Result<(), TransportError> {
        let dir = dir_path(path);
        if self.operator.exists(&dir).await? {
            return Err(TransportError::AlreadyExists(path.to_string()));
        }
        self.operator.create_dir(&dir).await?;
        Ok(())
    }

    async fn list_dir(&self, dir: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        let dir = dir_path(dir);
        let entries = self
            .operator
            .list_with(&dir)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
            .await?;

        Ok(entries
            .into_iter()
            .filter(|entry| entry.path() != dir && !entry.path().is_empty())
            .map(|entry| {
                let meta = entry.metadata();
                let is_dir = meta.is_dir();
                RemoteEntry {
                    name: entry.name().trim_end_matches('/').to_string(),
                    mode: if is_dir { S_IFDIR | 0o755 } else { S_IFREG | 0o644 },
                    size: if is_dir { 0 } else { meta.content_length() },
                    mtime: meta.last_modified().map_or(0, |t| t.timestamp()),
                }
            })
            .collect())
    }

    async fn change_dir(&self, dir: &str) -> Result<(), TransportError> {
        let meta = self.operator.stat(&dir_path(dir)).await?;
        if meta.is_dir() {
            Ok(())
        } else {
            Err(TransportError::NotFound(dir.to_string()))
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
