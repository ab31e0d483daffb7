//! 路径键与远程路径辅助函数

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// 相对同步根目录的规范化路径（使用 `/` 分隔）
///
/// 作为本地与远程两棵树的连接键。不会以 `..` 开头，也不含 `.` 段。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PathKey(String);

impl PathKey {
    /// 从 `/` 分隔的相对路径构造；含 `..` 或为空时返回 `None`
    ///
    /// `\` 是普通字符，不作为分隔符。
    pub fn new(raw: &str) -> Option<Self> {
        let mut parts = Vec::new();
        for part in raw.split('/') {
            match part {
                "" | "." => continue,
                ".." => return None,
                p => parts.push(p),
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(Self(parts.join("/")))
        }
    }

    /// 计算 `path` 相对 `root` 的键；不在根目录之下时返回 `None`
    pub fn relative(root: &Path, path: &Path) -> Option<Self> {
        let rel = path.strip_prefix(root).ok()?;
        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(p) => parts.push(p.to_string_lossy().into_owned()),
                Component::CurDir => continue,
                _ => return None,
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(Self(parts.join("/")))
        }
    }

    /// 在 `parent` 下追加一个目录项名；名称含 `/` 或为 `.`、`..`、空时返回 `None`
    pub fn child(parent: Option<&PathKey>, name: &str) -> Option<Self> {
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return None;
        }
        Some(match parent {
            Some(p) => Self(format!("{}/{}", p.0, name)),
            None => Self(name.to_string()),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn basename(&self) -> &str {
        self.0.rsplit_once('/').map_or(&self.0, |(_, name)| name)
    }

    /// 父目录部分（顶层文件返回 `None`）
    pub fn parent(&self) -> Option<&str> {
        self.0.rsplit_once('/').map(|(parent, _)| parent)
    }

    /// 追加后缀，例如冲突副本的 `.remote`
    pub fn with_suffix(&self, suffix: &str) -> Self {
        Self(format!("{}{}", self.0, suffix))
    }

    /// 在本地根目录下的完整路径
    pub fn to_local(&self, root: &Path) -> PathBuf {
        self.0.split('/').fold(root.to_path_buf(), |acc, p| acc.join(p))
    }

    /// 在远程根目录下的完整路径
    pub fn to_remote(&self, root: &str) -> String {
        join_remote(root, &self.0)
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PathKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// 拼接远程路径
pub fn join_remote(root: &str, rel: &str) -> String {
    let rel = rel.trim_start_matches('/');
    if root.is_empty() || root == "." {
        return rel.to_string();
    }
    if rel.is_empty() {
        return root.to_string();
    }
    format!("{}/{}", root.trim_end_matches('/'), rel)
}

/// 远程路径的父目录；没有父目录时返回 `None`
pub fn remote_parent(path: &str) -> Option<&str> {
    let (parent, _) = path.rsplit_once('/')?;
    if parent.is_empty() {
        // "/file" 的父目录是根
        None
    } else {
        Some(parent)
    }
}

/// 远程路径的最后一段（以 `/` 结尾时为空）
pub fn remote_basename(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

/// 远程目录的逐级前缀：`a/b/c` → `a`, `a/b`, `a/b/c`；保留开头的 `/`
pub fn remote_ancestors(dir: &str) -> Vec<String> {
    let absolute = dir.starts_with('/');
    let mut current = String::new();
    let mut out = Vec::new();
    for part in dir.split('/').filter(|s| !s.is_empty() && *s != ".") {
        if current.is_empty() {
            if absolute {
                current.push('/');
            }
        } else {
            current.push('/');
        }
        current.push_str(part);
        out.push(current.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_key_normalization() {
        assert_eq!(PathKey::new("a//b/./c.txt").unwrap().as_str(), "a/b/c.txt");
        assert_eq!(PathKey::new("a\\b.txt").unwrap().as_str(), "a\\b.txt");
        assert!(PathKey::new("../escape.txt").is_none());
        assert!(PathKey::new("a/../b").is_none());
        assert!(PathKey::new("").is_none());
    }

    #[test]
    fn test_child_keeps_name_as_one_segment() {
        let dir = PathKey::child(None, "docs").unwrap();
        let key = PathKey::child(Some(&dir), "a\\b.txt").unwrap();
        assert_eq!(key.as_str(), "docs/a\\b.txt");
        assert_eq!(key.basename(), "a\\b.txt");
        assert_eq!(key.to_remote("/srv"), "/srv/docs/a\\b.txt");
        assert!(PathKey::child(Some(&dir), "x/y").is_none());
        assert!(PathKey::child(None, "..").is_none());
        assert!(PathKey::child(None, "").is_none());
    }

    #[test]
    fn test_relative_rejects_outside_root() {
        let root = Path::new("/data/root");
        let key = PathKey::relative(root, Path::new("/data/root/b/c.txt")).unwrap();
        assert_eq!(key.as_str(), "b/c.txt");
        assert_eq!(key.basename(), "c.txt");
        assert_eq!(key.parent(), Some("b"));
        assert!(PathKey::relative(root, Path::new("/data/other/c.txt")).is_none());
        assert!(PathKey::relative(root, root).is_none());
    }

    #[test]
    fn test_remote_helpers() {
        assert_eq!(join_remote("/srv/data/", "b/c.txt"), "/srv/data/b/c.txt");
        assert_eq!(join_remote("", "a.txt"), "a.txt");
        assert_eq!(remote_parent("/srv/a.txt"), Some("/srv"));
        assert_eq!(remote_parent("/a.txt"), None);
        assert_eq!(remote_parent("a.txt"), None);
        assert_eq!(remote_basename("dir/"), "");
        assert_eq!(
            remote_ancestors("/srv/data/b"),
            vec!["/srv", "/srv/data", "/srv/data/b"]
        );
        assert_eq!(remote_ancestors("x/y"), vec!["x", "x/y"]);
    }
}
