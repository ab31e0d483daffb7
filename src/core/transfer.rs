//! 原子传输
//!
//! 先写入 `目标 + ".tmp"`，再重命名为最终路径。正常完成时目标路径只会呈现旧的完整文件
//! 或新的完整文件；只有上传的直写回退分支会放弃这一保证，并在事件中标记出来。

use crate::core::events::{EventSink, SyncEvent};
use crate::core::path::{join_remote, remote_ancestors, remote_basename, remote_parent};
use crate::error::{SyncError, SyncResult, TransportError};
use crate::transport::Transport;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::sync::Arc;
use tracing::{debug, warn};

/// 临时文件后缀
pub const TEMP_SUFFIX: &str = ".tmp";

/// 上传结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// 临时文件 + 重命名完成
    Atomic,
    /// 重命名失败后直接写入最终路径（非原子）
    Direct,
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// 目标以 `/` 结尾或文件名为空时，把源文件名追加上去
pub fn resolve_upload_target(local: &Path, remote: &str) -> String {
    if remote.ends_with('/') || remote_basename(remote).is_empty() {
        join_remote(remote, &file_name_of(local))
    } else {
        remote.to_string()
    }
}

/// 本地临时文件路径：`目标 + ".tmp"`
pub fn local_temp_path(target: &Path) -> PathBuf {
    let mut s: OsString = target.as_os_str().to_owned();
    s.push(TEMP_SUFFIX);
    PathBuf::from(s)
}

fn names_directory(path: &Path) -> bool {
    let s = path.as_os_str().to_string_lossy();
    s.is_empty() || s.ends_with('/') || s.ends_with(MAIN_SEPARATOR)
}

/// 原子传输引擎
#[derive(Clone)]
pub struct TransferEngine {
    transport: Arc<dyn Transport>,
    sink: Arc<dyn EventSink>,
}

impl TransferEngine {
    pub fn new(transport: Arc<dyn Transport>, sink: Arc<dyn EventSink>) -> Self {
        Self { transport, sink }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// 上传单个文件
    ///
    /// 失败时先向事件接收端报告，再返回错误。
    pub async fn upload(&self, local: &Path, remote: &str) -> SyncResult<UploadOutcome> {
        let target = resolve_upload_target(local, remote);
        let tmp = format!("{}{}", target, TEMP_SUFFIX);

        let result = self.upload_inner(local, &target, &tmp).await;
        match &result {
            Ok(outcome) => self.sink.emit(SyncEvent::Uploaded {
                local: local.display().to_string(),
                remote: target.clone(),
                atomic: *outcome == UploadOutcome::Atomic,
            }),
            Err(e) => self.sink.emit(SyncEvent::Failed {
                path: local.display().to_string(),
                error: e.to_string(),
            }),
        }
        result
    }

    async fn upload_inner(&self, local: &Path, target: &str, tmp: &str) -> SyncResult<UploadOutcome> {
        let local_str = local.display().to_string();
        match tokio::fs::metadata(local).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(SyncError::Io {
                    path: local_str,
                    source: io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
                })
            }
            Err(e) => return Err(SyncError::from_io(&local_str, e)),
        }

        if let Some(dir) = remote_parent(target) {
            if dir != "." {
                self.ensure_remote_dirs(dir).await;
            }
        }

        debug!("上传: {} -> {}", local_str, tmp);
        if let Err(e) = self.transport.put(local, tmp).await {
            self.cleanup_remote(tmp).await;
            return Err(if e.is_permission_denied() {
                SyncError::PermissionDenied {
                    path: target.to_string(),
                }
            } else {
                SyncError::Transport {
                    path: target.to_string(),
                    source: e,
                }
            });
        }

        let rename_err = match self.transport.rename(tmp, target).await {
            Ok(()) => return Ok(UploadOutcome::Atomic),
            Err(e) => e,
        };

        // 目标已存在时部分后端拒绝重命名：先删除旧文件再重试
        debug!("重命名失败 ({}), 删除旧文件后重试: {}", rename_err, target);
        match self.transport.remove(target).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!("删除旧文件失败: {}: {}", target, e),
        }
        match self.transport.rename(tmp, target).await {
            Ok(()) => return Ok(UploadOutcome::Atomic),
            Err(e) => warn!("重试重命名失败: {}: {}", target, e),
        }

        // 回退：删除临时文件并直接写入最终路径，这一分支不是原子的
        warn!("重命名仍然失败，直接写入最终路径（非原子）: {}", target);
        self.cleanup_remote(tmp).await;
        match self.transport.put(local, target).await {
            Ok(()) => Ok(UploadOutcome::Direct),
            Err(put_err) => Err(SyncError::TransferAggregate {
                target: target.to_string(),
                rename: Box::new(rename_err),
                fallback: Box::new(put_err),
            }),
        }
    }

    /// 逐级创建远程祖先目录（尽力而为）
    async fn ensure_remote_dirs(&self, dir: &str) {
        if self.transport.change_dir(dir).await.is_ok() {
            return;
        }
        for ancestor in remote_ancestors(dir) {
            match self.transport.mkdir(&ancestor).await {
                Ok(()) => debug!("创建远程目录: {}", ancestor),
                Err(e) if e.is_already_exists() => {}
                Err(e) => warn!("创建远程目录失败（继续）: {}: {}", ancestor, e),
            }
        }
    }

    /// 删除远程临时文件；不存在时静默
    async fn cleanup_remote(&self, path: &str) {
        match self.transport.remove(path).await {
            Ok(()) => debug!("已清理临时文件: {}", path),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!("清理临时文件失败: {}: {}", path, e),
        }
    }

    /// 下载单个文件，返回最终的本地路径
    ///
    /// 失败时清理临时文件、报告并返回错误，由调用方计入失败数。
    pub async fn download(&self, remote: &str, local: &Path) -> SyncResult<PathBuf> {
        let is_dir = tokio::fs::metadata(local)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        let target = if is_dir || names_directory(local) {
            local.join(remote_basename(remote.trim_end_matches('/')))
        } else {
            local.to_path_buf()
        };
        let tmp = local_temp_path(&target);

        let result = self.download_inner(remote, &target, &tmp).await;
        match &result {
            Ok(()) => self.sink.emit(SyncEvent::Downloaded {
                remote: remote.to_string(),
                local: target.display().to_string(),
            }),
            Err(e) => self.sink.emit(SyncEvent::Failed {
                path: remote.to_string(),
                error: e.to_string(),
            }),
        }
        result.map(|()| target)
    }

    async fn download_inner(&self, remote: &str, target: &Path, tmp: &Path) -> SyncResult<()> {
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    let path = parent.display().to_string();
                    SyncError::DirectoryCreation {
                        source: TransportError::from_io(e, &path),
                        path,
                    }
                })?;
            }
        }

        debug!("下载: {} -> {}", remote, tmp.display());
        if let Err(e) = self.transport.get(remote, tmp).await {
            cleanup_local(tmp).await;
            return Err(SyncError::classify(remote, e));
        }

        if let Err(e) = tokio::fs::rename(tmp, target).await {
            cleanup_local(tmp).await;
            let to = target.display().to_string();
            return Err(match e.kind() {
                io::ErrorKind::AlreadyExists => SyncError::RenameConflict {
                    from: tmp.display().to_string(),
                    source: TransportError::from_io(e, &to),
                    to,
                },
                io::ErrorKind::PermissionDenied => SyncError::PermissionDenied { path: to },
                _ => SyncError::Io { path: to, source: e },
            });
        }
        Ok(())
    }
}

/// 删除本地临时文件；不存在时静默
async fn cleanup_local(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("已清理临时文件: {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("清理临时文件失败: {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::Fault;
    use crate::transport::{MemoryTransport, Op};
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn engine(
        remote: &Arc<MemoryTransport>,
    ) -> (TransferEngine, mpsc::UnboundedReceiver<SyncEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TransferEngine::new(remote.clone(), Arc::new(tx)), rx)
    }

    fn no_temp_files(remote: &MemoryTransport) -> bool {
        remote.file_paths().iter().all(|p| !p.ends_with(TEMP_SUFFIX))
    }

    #[test]
    fn test_resolve_upload_target() {
        let local = Path::new("/home/u/notes.txt");
        assert_eq!(resolve_upload_target(local, "/srv/"), "/srv/notes.txt");
        assert_eq!(resolve_upload_target(local, ""), "notes.txt");
        assert_eq!(resolve_upload_target(local, "/srv/n.txt"), "/srv/n.txt");
        assert_eq!(
            local_temp_path(Path::new("/tmp/a.txt")),
            PathBuf::from("/tmp/a.txt.tmp")
        );
    }

    #[tokio::test]
    async fn test_upload_creates_ancestors_and_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("c.txt");
        std::fs::write(&src, b"yo").unwrap();

        let remote = Arc::new(MemoryTransport::new());
        let (engine, mut rx) = engine(&remote);

        let outcome = engine.upload(&src, "/srv/b/c.txt").await.unwrap();
        assert_eq!(outcome, UploadOutcome::Atomic);
        assert_eq!(remote.read_file("srv/b/c.txt").unwrap(), b"yo");
        assert!(remote.has_dir("srv/b"));
        assert!(no_temp_files(&remote));
        assert!(matches!(
            rx.try_recv().unwrap(),
            SyncEvent::Uploaded { atomic: true, .. }
        ));
    }

    #[tokio::test]
    async fn test_upload_replaces_existing_target() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"new content").unwrap();

        let remote = Arc::new(MemoryTransport::new());
        remote.insert_file("a.txt", "old", 1);
        let (engine, _rx) = engine(&remote);

        let outcome = engine.upload(&src, "a.txt").await.unwrap();
        assert_eq!(outcome, UploadOutcome::Atomic);
        assert_eq!(remote.read_file("a.txt").unwrap(), b"new content");
        assert_eq!(remote.file_paths(), vec!["a.txt".to_string()]);
        assert_eq!(remote.calls_of(Op::Remove), vec!["a.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_upload_falls_back_to_direct_write() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"data").unwrap();

        let remote = Arc::new(MemoryTransport::new());
        remote.inject_fault(Op::Rename, "a.txt", Fault::Unsupported);
        let (engine, mut rx) = engine(&remote);

        let outcome = engine.upload(&src, "a.txt").await.unwrap();
        assert_eq!(outcome, UploadOutcome::Direct);
        assert_eq!(remote.read_file("a.txt").unwrap(), b"data");
        assert!(no_temp_files(&remote));
        // 删除旧文件后重试过一次
        assert_eq!(remote.calls_of(Op::Rename), vec!["a.txt", "a.txt"]);
        assert!(matches!(
            rx.try_recv().unwrap(),
            SyncEvent::Uploaded { atomic: false, .. }
        ));
    }

    #[tokio::test]
    async fn test_upload_aggregates_rename_and_fallback_errors() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"data").unwrap();

        let remote = Arc::new(MemoryTransport::new());
        remote.inject_fault(Op::Rename, "a.txt", Fault::Unsupported);
        remote.inject_fault(Op::Put, "a.txt", Fault::PermissionDenied);
        let (engine, mut rx) = engine(&remote);

        let err = engine.upload(&src, "a.txt").await.unwrap_err();
        match err {
            SyncError::TransferAggregate {
                rename, fallback, ..
            } => {
                assert!(matches!(*rename, TransportError::Unsupported(_)));
                assert!(fallback.is_permission_denied());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(remote.file_paths().is_empty());
        assert!(matches!(rx.try_recv().unwrap(), SyncEvent::Failed { .. }));
    }

    #[tokio::test]
    async fn test_upload_missing_source() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(MemoryTransport::new());
        let (engine, _rx) = engine(&remote);

        let err = engine
            .upload(&dir.path().join("missing.txt"), "x.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::SourceNotFound { .. }));
        assert!(remote.calls_of(Op::Put).is_empty());
    }

    #[tokio::test]
    async fn test_upload_into_directory_target() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("report.pdf");
        std::fs::write(&src, b"%PDF").unwrap();

        let remote = Arc::new(MemoryTransport::new());
        let (engine, _rx) = engine(&remote);

        engine.upload(&src, "inbox/").await.unwrap();
        assert_eq!(remote.read_file("inbox/report.pdf").unwrap(), b"%PDF");
    }

    #[tokio::test]
    async fn test_download_round_trip() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("orig.bin");
        let content: Vec<u8> = (0..=255u8).collect();
        std::fs::write(&src, &content).unwrap();

        let remote = Arc::new(MemoryTransport::new());
        let (engine, _rx) = engine(&remote);
        engine.upload(&src, "data/orig.bin").await.unwrap();

        let dst = dir.path().join("out/nested/orig.bin");
        let resolved = engine.download("data/orig.bin", &dst).await.unwrap();
        assert_eq!(resolved, dst);
        assert_eq!(std::fs::read(&dst).unwrap(), content);
        assert!(!local_temp_path(&dst).exists());
        assert!(no_temp_files(&remote));
    }

    #[tokio::test]
    async fn test_download_into_existing_directory() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(MemoryTransport::new());
        remote.insert_file("docs/guide.md", "# guide", 1);
        let (engine, _rx) = engine(&remote);

        let resolved = engine.download("docs/guide.md", dir.path()).await.unwrap();
        assert_eq!(resolved, dir.path().join("guide.md"));
        assert_eq!(std::fs::read_to_string(&resolved).unwrap(), "# guide");
    }

    #[tokio::test]
    async fn test_download_missing_remote_cleans_up() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(MemoryTransport::new());
        let (engine, mut rx) = engine(&remote);

        let dst = dir.path().join("x.txt");
        let err = engine.download("nope.txt", &dst).await.unwrap_err();
        assert!(matches!(err, SyncError::SourceNotFound { .. }));
        assert!(!dst.exists());
        assert!(!local_temp_path(&dst).exists());
        assert!(matches!(rx.try_recv().unwrap(), SyncEvent::Failed { .. }));
    }

    #[tokio::test]
    async fn test_download_surfaces_directory_creation_failure() {
        let dir = TempDir::new().unwrap();
        // 父路径被普通文件占用
        std::fs::write(dir.path().join("blocker"), b"").unwrap();
        let remote = Arc::new(MemoryTransport::new());
        remote.insert_file("a.txt", "hi", 1);
        let (engine, _rx) = engine(&remote);

        let err = engine
            .download("a.txt", &dir.path().join("blocker/a.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::DirectoryCreation { .. }));
    }
}
