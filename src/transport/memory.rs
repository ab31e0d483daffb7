//! 内存端点
//!
//! 按远程协议的严格语义模拟一棵目录树，支持按操作和路径注入故障，
//! 主要用于测试同步核心。

use super::{RemoteEntry, Transport, S_IFDIR, S_IFREG};
use crate::error::TransportError;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// 传输操作（用于故障注入和调用记录）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Put,
    Get,
    Rename,
    Remove,
    Mkdir,
    List,
    ChangeDir,
}

/// 注入的故障类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    NotFound,
    PermissionDenied,
    AlreadyExists,
    Unsupported,
    Other,
}

impl Fault {
    fn into_error(self, path: &str) -> TransportError {
        let path = path.to_string();
        match self {
            Fault::NotFound => TransportError::NotFound(path),
            Fault::PermissionDenied => TransportError::PermissionDenied(path),
            Fault::AlreadyExists => TransportError::AlreadyExists(path),
            Fault::Unsupported => TransportError::Unsupported(path),
            Fault::Other => TransportError::Other(format!("injected failure: {}", path)),
        }
    }
}

#[derive(Debug, Clone)]
struct MemoryFile {
    data: Vec<u8>,
    mode: u32,
    mtime: i64,
}

#[derive(Debug, Default)]
struct State {
    files: BTreeMap<String, MemoryFile>,
    dirs: BTreeSet<String>,
    faults: HashMap<(Op, String), Fault>,
    calls: Vec<(Op, String)>,
    clock: Option<i64>,
}

impl State {
    fn dir_exists(&self, path: &str) -> bool {
        path.is_empty() || self.dirs.contains(path)
    }

    fn occupied(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.dir_exists(path)
    }

    fn now(&self) -> i64 {
        self.clock.unwrap_or_else(|| chrono::Utc::now().timestamp())
    }

    /// 记录调用并检查注入的故障
    fn enter(&mut self, op: Op, path: &str) -> Result<(), TransportError> {
        self.calls.push((op, path.to_string()));
        match self.faults.get(&(op, path.to_string())) {
            Some(fault) => Err(fault.into_error(path)),
            None => Ok(()),
        }
    }
}

/// 规范化路径：去掉首尾 `/`、空段和 `.` 段
fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(parent, _)| parent)
}

fn name_of(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

/// 内存远程端点
pub struct MemoryTransport {
    state: Mutex<State>,
    name: String,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            name: "memory:".to_string(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 固定写入时间戳；未设置时使用当前时间
    pub fn set_clock(&self, secs: i64) {
        self.state().clock = Some(secs);
    }

    /// 直接放入一个文件，自动创建祖先目录
    pub fn insert_file(&self, path: &str, data: impl Into<Vec<u8>>, mtime: i64) {
        let path = normalize(path);
        let mut state = self.state();
        let mut current = String::new();
        for part in parent_of(&path).split('/').filter(|s| !s.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(part);
            state.dirs.insert(current.clone());
        }
        state.files.insert(
            path,
            MemoryFile {
                data: data.into(),
                mode: S_IFREG | 0o644,
                mtime,
            },
        );
    }

    pub fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        self.state().files.get(&normalize(path)).map(|f| f.data.clone())
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.state().dir_exists(&normalize(path))
    }

    /// 所有文件路径（有序）
    pub fn file_paths(&self) -> Vec<String> {
        self.state().files.keys().cloned().collect()
    }

    /// 让 `op` 作用在 `path` 上时失败；`rename` 以目标路径为准
    pub fn inject_fault(&self, op: Op, path: &str, fault: Fault) {
        self.state().faults.insert((op, normalize(path)), fault);
    }

    pub fn clear_faults(&self) {
        self.state().faults.clear();
    }

    /// 已发生的调用
    pub fn calls_of(&self, op: Op) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter(|(o, _)| *o == op)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn put(&self, local: &Path, remote: &str) -> Result<(), TransportError> {
        let path = normalize(remote);
        {
            let mut state = self.state();
            state.enter(Op::Put, &path)?;
            if !state.dir_exists(parent_of(&path)) {
                return Err(TransportError::NotFound(remote.to_string()));
            }
            if state.dir_exists(&path) {
                return Err(TransportError::Other(format!("{} is a directory", remote)));
            }
        }

        let data = tokio::fs::read(local)
            .await
            .map_err(|e| TransportError::from_io(e, &local.display().to_string()))?;

        let mut state = self.state();
        let mtime = state.now();
        state.files.insert(
            path,
            MemoryFile {
                data,
                mode: S_IFREG | 0o644,
                mtime,
            },
        );
        Ok(())
    }

    async fn get(&self, remote: &str, local: &Path) -> Result<(), TransportError> {
        let path = normalize(remote);
        let data = {
            let mut state = self.state();
            state.enter(Op::Get, &path)?;
            state
                .files
                .get(&path)
                .map(|f| f.data.clone())
                .ok_or_else(|| TransportError::NotFound(remote.to_string()))?
        };

        tokio::fs::write(local, data)
            .await
            .map_err(|e| TransportError::from_io(e, &local.display().to_string()))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), TransportError> {
        let from = normalize(from);
        let to = normalize(to);
        let mut state = self.state();
        state.enter(Op::Rename, &to)?;

        if !state.files.contains_key(&from) {
            return Err(TransportError::NotFound(from));
        }
        if state.occupied(&to) {
            return Err(TransportError::AlreadyExists(to));
        }
        if !state.dir_exists(parent_of(&to)) {
            return Err(TransportError::NotFound(to));
        }
        if let Some(file) = state.files.remove(&from) {
            state.files.insert(to, file);
        }
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), TransportError> {
        let path = normalize(path);
        let mut state = self.state();
        state.enter(Op::Remove, &path)?;
        state
            .files
            .remove(&path)
            .map(|_| ())
            .ok_or(TransportError::NotFound(path))
    }

    async fn mkdir(&self, path: &str) -> Result<(), TransportError> {
        let path = normalize(path);
        let mut state = self.state();
        state.enter(Op::Mkdir, &path)?;

        if state.occupied(&path) {
            return Err(TransportError::AlreadyExists(path));
        }
        if !state.dir_exists(parent_of(&path)) {
            return Err(TransportError::NotFound(path));
        }
        state.dirs.insert(path);
        Ok(())
    }

    async fn list_dir(&self, dir: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        let dir = normalize(dir);
        let mut state = self.state();
        state.enter(Op::List, &dir)?;

        if !state.dir_exists(&dir) {
            return Err(TransportError::NotFound(dir));
        }

        let mut entries: Vec<RemoteEntry> = state
            .dirs
            .iter()
            .filter(|d| parent_of(d) == dir)
            .map(|d| RemoteEntry {
                name: name_of(d).to_string(),
                mode: S_IFDIR | 0o755,
                size: 0,
                mtime: 0,
            })
            .collect();

        entries.extend(
            state
                .files
                .iter()
                .filter(|(p, _)| parent_of(p) == dir)
                .map(|(p, f)| RemoteEntry {
                    name: name_of(p).to_string(),
                    mode: f.mode,
                    size: f.data.len() as u64,
                    mtime: f.mtime,
                }),
        );
        Ok(entries)
    }

    async fn change_dir(&self, dir: &str) -> Result<(), TransportError> {
        let dir = normalize(dir);
        let mut state = self.state();
        state.enter(Op::ChangeDir, &dir)?;
        if state.dir_exists(&dir) {
            Ok(())
        } else {
            Err(TransportError::NotFound(dir))
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
