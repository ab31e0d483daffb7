use crate::core::path::{join_remote, PathKey};
use crate::error::{SyncError, SyncResult};
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 单个文件的元数据
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// 平台文件 mode 位
    pub mode: u32,
    pub size: u64,
    /// 修改时间（Unix 秒）
    pub mtime: i64,
}

/// 一侧目录树在某一时刻的快照：路径键 → 元数据
pub type TreeMapping = BTreeMap<PathKey, FileRecord>;

#[cfg(unix)]
fn local_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn local_mode(metadata: &std::fs::Metadata) -> u32 {
    use crate::transport::S_IFREG;
    if metadata.permissions().readonly() {
        S_IFREG | 0o444
    } else {
        S_IFREG | 0o644
    }
}

pub(crate) fn local_mtime(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs() as i64)
}

fn walk_local(root: &Path) -> SyncResult<TreeMapping> {
    let scan_error = |reason: String| SyncError::Scan {
        root: root.display().to_string(),
        reason,
    };

    let mut tree = TreeMapping::new();
    let mut rejected = 0usize;

    for entry in WalkDir::new(root).follow_links(false) {
        // 任一子树不可读都会中止整个扫描
        let entry = entry.map_err(|e| scan_error(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let Some(key) = PathKey::relative(root, entry.path()) else {
            warn!("拒绝无法表示为相对路径的条目: {}", entry.path().display());
            rejected += 1;
            continue;
        };

        let metadata = entry.metadata().map_err(|e| scan_error(e.to_string()))?;
        tree.insert(
            key,
            FileRecord {
                mode: local_mode(&metadata),
                size: metadata.len(),
                mtime: local_mtime(&metadata),
            },
        );
    }

    if rejected > 0 {
        warn!("{} 个条目因路径越界被拒绝", rejected);
    }
    Ok(tree)
}

/// 扫描本地目录树
pub async fn scan_local(root: &Path) -> SyncResult<TreeMapping> {
    info!("开始扫描本地目录: {}", root.display());

    let owned: PathBuf = root.to_path_buf();
    // 使用 spawn_blocking 避免阻塞 async runtime
    let tree = tokio::task::spawn_blocking(move || walk_local(&owned))
        .await
        .map_err(|e| SyncError::Scan {
            root: root.display().to_string(),
            reason: e.to_string(),
        })??;

    info!("本地扫描完成: {} 个文件", tree.len());
    Ok(tree)
}

/// 通过传输层递归扫描远程目录树，键相对远程根目录
pub async fn scan_remote(transport: &dyn Transport, root: &str) -> SyncResult<TreeMapping> {
    info!("开始扫描远程目录: {} ({})", root, transport.name());

    let mut tree = TreeMapping::new();
    // 深度优先：(远程目录, 相对根目录的键)
    let mut pending: Vec<(String, Option<PathKey>)> = vec![(root.to_string(), None)];

    while let Some((dir, rel)) = pending.pop() {
        let entries = transport
            .list_dir(&dir)
            .await
            .map_err(|e| SyncError::Scan {
                root: root.to_string(),
                reason: format!("{}: {}", dir, e),
            })?;
        debug!("列出 {}: {} 个条目", dir, entries.len());

        for entry in entries {
            if entry.name.is_empty() || entry.name == "." || entry.name == ".." {
                continue;
            }
            // 远程名称只按 `/` 分段，`\` 等字符原样保留
            let Some(key) = PathKey::child(rel.as_ref(), &entry.name) else {
                warn!("拒绝非法的远程条目名: {}/{}", dir, entry.name);
                continue;
            };

            if entry.is_dir() {
                pending.push((join_remote(&dir, &entry.name), Some(key)));
                continue;
            }

            tree.insert(
                key,
                FileRecord {
                    mode: entry.mode,
                    size: entry.size,
                    mtime: entry.mtime,
                },
            );
        }
    }

    info!("远程扫描完成: {} 个文件", tree.len());
    Ok(tree)
}
