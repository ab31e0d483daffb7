//! 包含/排除规则
//!
//! 使用 shell glob 语义（`*`、`?`、`[...]`），同时匹配文件名和完整相对路径。

use crate::core::path::PathKey;
use crate::error::{SyncError, SyncResult};
use regex::Regex;

/// 把 glob 翻译成锚定的正则表达式
///
/// `*` 可以跨越 `/`；`[!...]` 表示取反；没有闭合的 `[` 按字面量处理。
fn glob_to_regex(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');

    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                // 查找闭合的 ]，紧跟在 [ 或 [! 之后的 ] 属于字符集
                let mut j = i + 1;
                if j < chars.len() && chars[j] == '!' {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ']' {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }

                if j >= chars.len() {
                    out.push_str("\\[");
                } else {
                    let mut body: String = chars[i + 1..j].iter().collect();
                    let negated = body.starts_with('!');
                    if negated {
                        body.remove(0);
                    }
                    out.push('[');
                    if negated {
                        out.push('^');
                    }
                    for c in body.chars() {
                        if c == '\\' || c == '[' || c == ']' || c == '^' || c == '&' || c == '~' {
                            out.push('\\');
                        }
                        out.push(c);
                    }
                    out.push(']');
                    i = j;
                }
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    out.push('$');
    out
}

/// 一组 glob 规则
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<String>,
    compiled: Vec<Regex>,
}

impl PatternSet {
    pub fn new<I, S>(patterns: I) -> SyncResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for pattern in patterns {
            let pattern = pattern.into();
            let re = Regex::new(&glob_to_regex(&pattern)).map_err(|e| SyncError::InvalidPattern {
                pattern: pattern.clone(),
                source: e,
            })?;
            set.patterns.push(pattern);
            set.compiled.push(re);
        }
        Ok(set)
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// 文件名或完整路径匹配任意一条规则
    pub fn matches(&self, key: &PathKey) -> bool {
        let name = key.basename();
        let full = key.as_str();
        self.compiled
            .iter()
            .any(|re| re.is_match(name) || re.is_match(full))
    }
}

/// 决定路径是否参与同步
#[derive(Debug, Clone, Default)]
pub struct PatternFilter {
    include: PatternSet,
    exclude: PatternSet,
}

impl PatternFilter {
    pub fn new(include: PatternSet, exclude: PatternSet) -> Self {
        Self { include, exclude }
    }

    pub fn from_patterns(include: &[String], exclude: &[String]) -> SyncResult<Self> {
        Ok(Self::new(
            PatternSet::new(include.iter().cloned())?,
            PatternSet::new(exclude.iter().cloned())?,
        ))
    }

    /// 空的包含集表示全部候选；排除总是优先
    pub fn included(&self, key: &PathKey) -> bool {
        if !self.include.is_empty() && !self.include.matches(key) {
            return false;
        }
        self.exclude.is_empty() || !self.exclude.matches(key)
    }

    pub fn include(&self) -> &PatternSet {
        &self.include
    }

    pub fn exclude(&self) -> &PatternSet {
        &self.exclude
    }
}
