use super::{RemoteEntry, Transport};
use crate::error::TransportError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

/// 以本机目录作为远程端点
pub struct LocalTransport {
    base_path: PathBuf,
    name: String,
}

impl LocalTransport {
    pub fn new(path: &str) -> std::io::Result<Self> {
        let base_path = PathBuf::from(path);
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)?;
        }
        let name = format!("local:{}", path);
        Ok(Self { base_path, name })
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = path.trim_start_matches('/').trim_start_matches('\\');
        if path.is_empty() || path == "." {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }
}

fn mtime_secs(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs() as i64)
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use super::{S_IFDIR, S_IFREG};
    let kind = if metadata.is_dir() { S_IFDIR } else { S_IFREG };
    let perm = if metadata.permissions().readonly() { 0o444 } else { 0o644 };
    kind | perm
}

#[async_trait]
impl Transport for LocalTransport {
    async fn put(&self, local: &Path, remote: &str) -> Result<(), TransportError> {
        let target = self.resolve_path(remote);
        fs::copy(local, &target)
            .await
            .map_err(|e| TransportError::from_io(e, remote))?;
        Ok(())
    }

    async fn get(&self, remote: &str, local: &Path) -> Result<(), TransportError> {
        let source = self.resolve_path(remote);
        fs::copy(&source, local)
            .await
            .map_err(|e| TransportError::from_io(e, remote))?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), TransportError> {
        let target = self.resolve_path(to);
        // 与远程协议保持一致：目标存在时不覆盖
        if fs::symlink_metadata(&target).await.is_ok() {
            return Err(TransportError::AlreadyExists(to.to_string()));
        }
        fs::rename(self.resolve_path(from), &target)
            .await
            .map_err(|e| TransportError::from_io(e, from))
    }

    async fn remove(&self, path: &str) -> Result<(), TransportError> {
        fs::remove_file(self.resolve_path(path))
            .await
            .map_err(|e| TransportError::from_io(e, path))
    }

    async fn mkdir(&self, path: &str) -> Result<(), TransportError> {
        fs::create_dir(self.resolve_path(path))
            .await
            .map_err(|e| TransportError::from_io(e, path))
    }

    async fn list_dir(&self, dir: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        let mut reader = fs::read_dir(self.resolve_path(dir))
            .await
            .map_err(|e| TransportError::from_io(e, dir))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| TransportError::from_io(e, dir))?
        {
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| TransportError::from_io(e, dir))?;
            entries.push(RemoteEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                mode: file_mode(&metadata),
                size: if metadata.is_dir() { 0 } else { metadata.len() },
                mtime: mtime_secs(&metadata),
            });
        }
        Ok(entries)
    }

    async fn change_dir(&self, dir: &str) -> Result<(), TransportError> {
        let metadata = fs::metadata(self.resolve_path(dir))
            .await
            .map_err(|e| TransportError::from_io(e, dir))?;
        if metadata.is_dir() {
            Ok(())
        } else {
            Err(TransportError::NotFound(dir.to_string()))
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_rename_refuses_existing_target() {
        let dir = TempDir::new().unwrap();
        let transport = LocalTransport::new(dir.path().to_str().unwrap()).unwrap();
        std::fs::write(dir.path().join("a.tmp"), b"new").unwrap();
        std::fs::write(dir.path().join("a"), b"old").unwrap();

        let err = transport.rename("a.tmp", "a").await.unwrap_err();
        assert!(err.is_already_exists());

        transport.remove("a").await.unwrap();
        transport.rename("a.tmp", "a").await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("a")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_mkdir_requires_parent() {
        let dir = TempDir::new().unwrap();
        let transport = LocalTransport::new(dir.path().to_str().unwrap()).unwrap();

        assert!(transport.mkdir("x/y").await.unwrap_err().is_not_found());
        transport.mkdir("x").await.unwrap();
        assert!(transport.mkdir("x").await.unwrap_err().is_already_exists());
        transport.mkdir("x/y").await.unwrap();
        transport.change_dir("x/y").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_dir_reports_modes() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("f.txt"), b"hello").unwrap();
        let transport = LocalTransport::new(dir.path().to_str().unwrap()).unwrap();

        let mut entries = transport.list_dir("").await.unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "f.txt");
        assert_eq!(entries[0].size, 5);
        assert!(!entries[0].is_dir());
        assert!(entries[1].is_dir());
    }
}
