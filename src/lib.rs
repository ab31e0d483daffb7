//! 本地目录树与远程端点之间的同步：推送、拉取和带冲突检测的双向合并。

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod transport;

pub use crate::config::{AppConfig, SyncSettings};
pub use crate::core::{SyncEngine, SyncMode, SyncReport};
pub use crate::error::{SyncError, SyncResult, TransportError};
pub use crate::transport::{create_transport, Transport, TransportConfig};
