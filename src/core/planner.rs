//! 同步规划与执行
//!
//! 规划函数是纯函数：输入两侧的快照和过滤规则，输出每个路径的传输意图。
//! [`SyncEngine`] 负责扫描、规划并驱动 [`TransferEngine`] 执行。

use crate::config::SyncSettings;
use crate::core::events::{EventSink, SyncEvent};
use crate::core::filter::PatternFilter;
use crate::core::path::PathKey;
use crate::core::scanner::{scan_local, scan_remote, TreeMapping};
use crate::core::transfer::TransferEngine;
use crate::error::SyncResult;
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

/// 冲突时远程版本的副本后缀
pub const REMOTE_COPY_SUFFIX: &str = ".remote";

/// 被过滤规则排除时的原因
pub const FILTERED_REASON: &str = "excluded by filter";

/// 传输方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
    Conflict,
    Skip,
}

/// 单个路径的传输意图
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferIntent {
    pub key: PathKey,
    pub direction: Direction,
    pub reason: String,
    /// 将要传输的字节数（来自源端快照）
    pub size: u64,
}

impl TransferIntent {
    fn new(key: &PathKey, direction: Direction, reason: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.clone(),
            direction,
            reason: reason.into(),
            size,
        }
    }

    fn filtered(key: &PathKey) -> Self {
        Self::new(key, Direction::Skip, FILTERED_REASON, 0)
    }
}

/// 推送：本地每个通过过滤的文件都上传，远程独有文件不删除
pub fn plan_push(local: &TreeMapping, filter: &PatternFilter) -> Vec<TransferIntent> {
    local
        .iter()
        .map(|(key, record)| {
            if filter.included(key) {
                TransferIntent::new(key, Direction::Upload, "local file", record.size)
            } else {
                TransferIntent::filtered(key)
            }
        })
        .collect()
}

/// 拉取：远程每个通过过滤的文件都下载
pub fn plan_pull(remote: &TreeMapping, filter: &PatternFilter) -> Vec<TransferIntent> {
    remote
        .iter()
        .map(|(key, record)| {
            if filter.included(key) {
                TransferIntent::new(key, Direction::Download, "remote file", record.size)
            } else {
                TransferIntent::filtered(key)
            }
        })
        .collect()
}

/// 双向：对两侧路径的并集逐个决策
///
/// 两侧都存在时比较 mtime：差值不超过 `tolerance` 秒视为冲突，否则较新的一侧胜出。
/// 冲突副本 `<P>.remote` 的路径被预留，同名的其他条目本次跳过，保证每个目标路径只有一个意图。
pub fn plan_bidirectional(
    local: &TreeMapping,
    remote: &TreeMapping,
    filter: &PatternFilter,
    tolerance: i64,
) -> Vec<TransferIntent> {
    let keys: BTreeSet<&PathKey> = local.keys().chain(remote.keys()).collect();
    // `P` 总是排在 `P.remote` 之前，按序遍历即可先完成预留
    let mut reserved: BTreeMap<PathKey, &PathKey> = BTreeMap::new();
    let mut intents = Vec::with_capacity(keys.len());

    for key in keys {
        if !filter.included(key) {
            intents.push(TransferIntent::filtered(key));
            continue;
        }
        if let Some(owner) = reserved.get(key) {
            intents.push(TransferIntent::new(
                key,
                Direction::Skip,
                format!("path reserved for conflict copy of {}", owner),
                0,
            ));
            continue;
        }

        let intent = match (local.get(key), remote.get(key)) {
            (Some(l), None) => {
                TransferIntent::new(key, Direction::Upload, "only present locally", l.size)
            }
            (None, Some(r)) => {
                TransferIntent::new(key, Direction::Download, "only present remotely", r.size)
            }
            (Some(l), Some(r)) => {
                let diff = l.mtime - r.mtime;
                if diff.abs() <= tolerance {
                    reserved.insert(key.with_suffix(REMOTE_COPY_SUFFIX), key);
                    TransferIntent::new(
                        key,
                        Direction::Conflict,
                        format!("modified on both sides within {}s", tolerance),
                        r.size,
                    )
                } else if diff > 0 {
                    TransferIntent::new(key, Direction::Upload, "local is newer", l.size)
                } else {
                    TransferIntent::new(key, Direction::Download, "remote is newer", r.size)
                }
            }
            // 并集中的键至少在一侧存在
            (None, None) => TransferIntent::new(key, Direction::Skip, "missing on both sides", 0),
        };
        intents.push(intent);
    }
    intents
}

/// 同步模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Push,
    Pull,
    Bidirectional,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Push => write!(f, "push"),
            SyncMode::Pull => write!(f, "pull"),
            SyncMode::Bidirectional => write!(f, "bidirectional"),
        }
    }
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub mode: SyncMode,
    pub uploaded: u32,
    pub downloaded: u32,
    pub conflicts: u32,
    pub skipped: u32,
    pub failed: u32,
    pub bytes_transferred: u64,
    /// 成功上传或下载的路径（按规划顺序）
    pub transferred: Vec<PathKey>,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    fn new(mode: SyncMode, started_at: DateTime<Utc>) -> Self {
        Self {
            mode,
            uploaded: 0,
            downloaded: 0,
            conflicts: 0,
            skipped: 0,
            failed: 0,
            bytes_transferred: 0,
            transferred: Vec::new(),
            errors: Vec::new(),
            started_at,
            finished_at: started_at,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    fn record_success(&mut self, intent: TransferIntent) {
        self.bytes_transferred += intent.size;
        match intent.direction {
            Direction::Upload => {
                self.uploaded += 1;
                self.transferred.push(intent.key);
            }
            Direction::Download => {
                self.downloaded += 1;
                self.transferred.push(intent.key);
            }
            Direction::Conflict => self.conflicts += 1,
            Direction::Skip => self.skipped += 1,
        }
    }

    fn record_failure(&mut self, intent: &TransferIntent, error: String) {
        self.failed += 1;
        self.errors.push(format!("{}: {}", intent.key, error));
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} complete: {} uploaded, {} downloaded, {} conflicts, {} skipped, {} failed ({} bytes)",
            self.mode,
            self.uploaded,
            self.downloaded,
            self.conflicts,
            self.skipped,
            self.failed,
            self.bytes_transferred
        )
    }
}

/// 同步引擎
pub struct SyncEngine {
    transfer: TransferEngine,
    sink: Arc<dyn EventSink>,
    filter: PatternFilter,
    settings: SyncSettings,
}

impl SyncEngine {
    /// 创建引擎；过滤规则无效时返回错误
    pub fn new(
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EventSink>,
        settings: SyncSettings,
    ) -> SyncResult<Self> {
        let filter = PatternFilter::from_patterns(&settings.include, &settings.exclude)?;
        Ok(Self {
            transfer: TransferEngine::new(transport, sink.clone()),
            sink,
            filter,
            settings,
        })
    }

    /// 本地 → 远程
    pub async fn push(&self, local_root: &Path, remote_root: &str) -> SyncResult<SyncReport> {
        let started_at = Utc::now();
        info!("开始推送: {} -> {}", local_root.display(), remote_root);

        let local = scan_local(local_root).await?;
        let intents = plan_push(&local, &self.filter);
        Ok(self
            .execute(SyncMode::Push, intents, local_root, remote_root, started_at)
            .await)
    }

    /// 远程 → 本地
    pub async fn pull(&self, remote_root: &str, local_root: &Path) -> SyncResult<SyncReport> {
        let started_at = Utc::now();
        info!("开始拉取: {} -> {}", remote_root, local_root.display());

        let remote = scan_remote(self.transfer.transport().as_ref(), remote_root).await?;
        let intents = plan_pull(&remote, &self.filter);
        Ok(self
            .execute(SyncMode::Pull, intents, local_root, remote_root, started_at)
            .await)
    }

    /// 双向合并
    pub async fn bidirectional(
        &self,
        local_root: &Path,
        remote_root: &str,
    ) -> SyncResult<SyncReport> {
        let started_at = Utc::now();
        info!("开始双向同步: {} <-> {}", local_root.display(), remote_root);

        // 两侧快照在规划前全部完成，之后只读
        let local = scan_local(local_root).await?;
        let remote = scan_remote(self.transfer.transport().as_ref(), remote_root).await?;
        let intents = plan_bidirectional(
            &local,
            &remote,
            &self.filter,
            self.settings.conflict_tolerance_secs,
        );
        Ok(self
            .execute(SyncMode::Bidirectional, intents, local_root, remote_root, started_at)
            .await)
    }

    /// 并行执行传输意图，单个文件失败不影响其他文件
    async fn execute(
        &self,
        mode: SyncMode,
        intents: Vec<TransferIntent>,
        local_root: &Path,
        remote_root: &str,
        started_at: DateTime<Utc>,
    ) -> SyncReport {
        let mut report = SyncReport::new(mode, started_at);
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_transfers.max(1)));
        let mut handles = Vec::new();

        for intent in intents {
            if intent.direction == Direction::Skip {
                debug!("跳过 {}: {}", intent.key, intent.reason);
                report.skipped += 1;
                continue;
            }

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let transfer = self.transfer.clone();
            let sink = self.sink.clone();
            let local_root = local_root.to_path_buf();
            let remote_root = remote_root.to_string();

            handles.push(tokio::spawn(async move {
                let result =
                    execute_intent(&transfer, sink.as_ref(), &intent, &local_root, &remote_root)
                        .await;
                drop(permit);
                (intent, result)
            }));
        }

        // 按规划顺序收集结果
        for handle in handles {
            match handle.await {
                Ok((intent, Ok(()))) => report.record_success(intent),
                Ok((intent, Err(e))) => report.record_failure(&intent, e.to_string()),
                Err(e) => {
                    error!("传输任务异常退出: {}", e);
                    report.failed += 1;
                    report.errors.push(format!("transfer task aborted: {}", e));
                }
            }
        }

        report.finished_at = Utc::now();
        info!("{}", report);
        report
    }
}

async fn execute_intent(
    transfer: &TransferEngine,
    sink: &dyn EventSink,
    intent: &TransferIntent,
    local_root: &Path,
    remote_root: &str,
) -> SyncResult<()> {
    let key = &intent.key;
    let local_path: PathBuf = key.to_local(local_root);
    let remote_path = key.to_remote(remote_root);
    debug!("{:?} {} ({})", intent.direction, key, intent.reason);

    match intent.direction {
        Direction::Upload => transfer.upload(&local_path, &remote_path).await.map(|_| ()),
        Direction::Download => transfer.download(&remote_path, &local_path).await.map(|_| ()),
        Direction::Conflict => {
            // 本地原文件保持不动，远程版本写到旁边
            let copy = key.with_suffix(REMOTE_COPY_SUFFIX).to_local(local_root);
            transfer.download(&remote_path, &copy).await?;
            sink.emit(SyncEvent::Conflict {
                path: key.to_string(),
                local: local_path.display().to_string(),
                remote_copy: copy.display().to_string(),
            });
            Ok(())
        }
        Direction::Skip => Ok(()),
    }
}
