//! 面向用户的状态事件
//!
//! 传输引擎和规划器不直接打印，而是把事件交给注入的 [`EventSink`]。

use serde::Serialize;
use tokio::sync::mpsc;

/// 同步过程中产生的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// 上传完成；`atomic` 为 false 表示走了直写回退分支
    Uploaded {
        local: String,
        remote: String,
        atomic: bool,
    },
    Downloaded { remote: String, local: String },
    /// 冲突：本地原文件保留，远程版本写入 `remote_copy`
    Conflict {
        path: String,
        local: String,
        remote_copy: String,
    },
    Failed { path: String, error: String },
}

impl std::fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncEvent::Uploaded {
                local,
                remote,
                atomic: true,
            } => write!(f, "Uploaded {} to {}", local, remote),
            SyncEvent::Uploaded {
                local,
                remote,
                atomic: false,
            } => write!(f, "Uploaded {} to {} (direct write, not atomic)", local, remote),
            SyncEvent::Downloaded { remote, local } => {
                write!(f, "Downloaded {} to {}", remote, local)
            }
            SyncEvent::Conflict {
                local, remote_copy, ..
            } => write!(f, "  conflict: kept {} and {}", local, remote_copy),
            SyncEvent::Failed { path, error } => write!(f, "Error: {}: {}", path, error),
        }
    }
}

/// 事件接收端
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SyncEvent);
}

/// 输出到控制台：成功与冲突写 stdout，失败写 stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn emit(&self, event: SyncEvent) {
        match event {
            SyncEvent::Failed { .. } => eprintln!("{}", event),
            _ => println!("{}", event),
        }
    }
}

/// 丢弃所有事件
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: SyncEvent) {}
}

/// 通过通道转发（测试中收集事件，或交给界面层）
impl EventSink for mpsc::UnboundedSender<SyncEvent> {
    fn emit(&self, event: SyncEvent) {
        // 接收端已关闭时忽略
        let _ = self.send(event);
    }
}
