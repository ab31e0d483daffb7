//! 错误类型
//!
//! `TransportError` 描述远程端点返回的失败，`SyncError` 是同步核心对外暴露的错误分类。

use std::io;
use thiserror::Error;

/// 传输层错误（远程端点操作失败）
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("i/o error: {0}")]
    Io(io::Error),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, TransportError::AlreadyExists(_))
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, TransportError::PermissionDenied(_))
    }

    /// 按 `io::ErrorKind` 归类，附带出错路径
    pub fn from_io(err: io::Error, path: &str) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => TransportError::NotFound(path.to_string()),
            io::ErrorKind::PermissionDenied => TransportError::PermissionDenied(path.to_string()),
            io::ErrorKind::AlreadyExists => TransportError::AlreadyExists(path.to_string()),
            _ => TransportError::Io(err),
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => TransportError::NotFound(err.to_string()),
            io::ErrorKind::PermissionDenied => TransportError::PermissionDenied(err.to_string()),
            io::ErrorKind::AlreadyExists => TransportError::AlreadyExists(err.to_string()),
            _ => TransportError::Io(err),
        }
    }
}

impl From<opendal::Error> for TransportError {
    fn from(err: opendal::Error) -> Self {
        match err.kind() {
            opendal::ErrorKind::NotFound => TransportError::NotFound(err.to_string()),
            opendal::ErrorKind::PermissionDenied => TransportError::PermissionDenied(err.to_string()),
            opendal::ErrorKind::AlreadyExists => TransportError::AlreadyExists(err.to_string()),
            opendal::ErrorKind::Unsupported => TransportError::Unsupported(err.to_string()),
            _ => TransportError::Other(err.to_string()),
        }
    }
}

/// 同步核心错误
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("source not found: {path}")]
    SourceNotFound { path: String },

    #[error("permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("failed to create directory {path}: {source}")]
    DirectoryCreation {
        path: String,
        #[source]
        source: TransportError,
    },

    #[error("cannot rename {from} to {to}: {source}")]
    RenameConflict {
        from: String,
        to: String,
        #[source]
        source: TransportError,
    },

    /// 原子重命名与直写回退都失败
    #[error("failed to move uploaded temp file to {target}: rename error: {rename}; fallback put error: {fallback}")]
    TransferAggregate {
        target: String,
        rename: Box<TransportError>,
        fallback: Box<TransportError>,
    },

    #[error("failed to scan {root}: {reason}")]
    Scan { root: String, reason: String },

    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("transfer failed for {path}: {source}")]
    Transport {
        path: String,
        #[source]
        source: TransportError,
    },

    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl SyncError {
    /// 把传输错误归入同步错误分类
    pub fn classify(path: &str, err: TransportError) -> Self {
        match err {
            TransportError::NotFound(_) => SyncError::SourceNotFound {
                path: path.to_string(),
            },
            TransportError::PermissionDenied(_) => SyncError::PermissionDenied {
                path: path.to_string(),
            },
            other => SyncError::Transport {
                path: path.to_string(),
                source: other,
            },
        }
    }

    /// 本地文件系统错误归类
    pub fn from_io(path: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => SyncError::SourceNotFound {
                path: path.to_string(),
            },
            io::ErrorKind::PermissionDenied => SyncError::PermissionDenied {
                path: path.to_string(),
            },
            _ => SyncError::Io {
                path: path.to_string(),
                source: err,
            },
        }
    }

    /// 扫描阶段的失败会中止整个操作
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Scan { .. } | SyncError::InvalidPattern { .. })
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_kinds_are_classified() {
        let err = TransportError::from_io(io::Error::from(io::ErrorKind::NotFound), "a/b.txt");
        assert!(err.is_not_found());

        let err = SyncError::from_io("x", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, SyncError::PermissionDenied { .. }));
    }

    #[test]
    fn test_aggregate_message_names_both_causes() {
        let err = SyncError::TransferAggregate {
            target: "dir/file.txt".into(),
            rename: Box::new(TransportError::AlreadyExists("dir/file.txt".into())),
            fallback: Box::new(TransportError::PermissionDenied("dir/file.txt".into())),
        };
        let msg = err.to_string();
        assert!(msg.contains("rename error: already exists"));
        assert!(msg.contains("fallback put error: permission denied"));
    }
}
