//! 试运行报告
//!
//! 只描述将要执行的步骤，不接触远程端，也不传输任何数据。

use crate::core::filter::PatternFilter;
use crate::core::path::{join_remote, remote_basename, PathKey};
use crate::core::scanner::{scan_local, TreeMapping};
use crate::core::transfer::{local_temp_path, resolve_upload_target, TEMP_SUFFIX};
use chrono::{DateTime, Local, TimeZone};
use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

const RULE_WIDTH: usize = 81;
const KEY_WIDTH: usize = 15;
const LISTED_FILES: usize = 10;
const HASH_BUF_SIZE: usize = 64 * 1024;

/// 格式化字节数：B、KiB、MiB…，保留一位小数
pub fn human_bytes(n: u64) -> String {
    let mut size = n as f64;
    for unit in ["B", "KiB", "MiB", "GiB", "TiB"] {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} PiB", size)
}

/// 流式计算文件的 BLAKE3（十六进制）
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; HASH_BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReportLine {
    Item {
        key: String,
        value: String,
        indent: usize,
    },
    Action {
        text: String,
        indent: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ReportSection {
    title: String,
    lines: Vec<ReportLine>,
}

/// 一份试运行报告
#[derive(Debug, Clone)]
pub struct DryRunReport {
    operation: String,
    target: String,
    generated_at: DateTime<Local>,
    sections: Vec<ReportSection>,
}

impl DryRunReport {
    pub fn new(operation: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            target: target.into(),
            generated_at: Local::now(),
            sections: Vec::new(),
        }
    }

    /// 开始一个新小节
    pub fn section(&mut self, title: impl Into<String>) -> &mut Self {
        self.sections.push(ReportSection {
            title: title.into(),
            lines: Vec::new(),
        });
        self
    }

    fn push_line(&mut self, line: ReportLine) -> &mut Self {
        if self.sections.is_empty() {
            self.section("Details");
        }
        if let Some(section) = self.sections.last_mut() {
            section.lines.push(line);
        }
        self
    }

    pub fn item(&mut self, key: impl Into<String>, value: impl fmt::Display) -> &mut Self {
        self.indented_item(key, value, 0)
    }

    pub fn indented_item(
        &mut self,
        key: impl Into<String>,
        value: impl fmt::Display,
        indent: usize,
    ) -> &mut Self {
        self.push_line(ReportLine::Item {
            key: key.into(),
            value: value.to_string(),
            indent,
        })
    }

    pub fn action(&mut self, text: impl Into<String>) -> &mut Self {
        self.push_line(ReportLine::Action {
            text: text.into(),
            indent: 0,
        })
    }

    /// 指定标题的小节是否存在
    pub fn has_section(&self, title: &str) -> bool {
        self.sections.iter().any(|s| s.title == title)
    }

    fn failed(&mut self, reason: impl fmt::Display) -> &mut Self {
        self.section("Error").item("Status", "FAILED").item("Reason", reason)
    }
}

impl fmt::Display for DryRunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "-".repeat(RULE_WIDTH);
        writeln!(f, "\nDRY RUN: {}", self.operation)?;
        writeln!(f, "Target: {}", self.target)?;
        writeln!(f, "Time: {}", self.generated_at.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f, "{}", rule)?;

        for section in &self.sections {
            writeln!(f, "\n{}:", section.title)?;
            for line in &section.lines {
                match line {
                    ReportLine::Item { key, value, indent } => writeln!(
                        f,
                        "{:indent$}{:<width$}: {}",
                        "",
                        key,
                        value,
                        indent = *indent,
                        width = KEY_WIDTH
                    )?,
                    ReportLine::Action { text, indent } => {
                        writeln!(f, "{:indent$}→ {}", "", text, indent = *indent)?
                    }
                }
            }
        }

        writeln!(f, "{}", rule)?;
        writeln!(f, "DRY RUN COMPLETE: No changes were made")?;
        writeln!(f)
    }
}

fn format_mtime(secs: i64) -> String {
    Local
        .timestamp_opt(secs, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}

/// 单文件上传的试运行
pub async fn dry_run_upload(local: &Path, remote: &str) -> DryRunReport {
    let target = resolve_upload_target(local, remote);
    let tmp = format!("{}{}", target, TEMP_SUFFIX);
    let mut report = DryRunReport::new(
        "File Upload",
        format!("{} → {}", local.display(), target),
    );

    let metadata = match tokio::fs::metadata(local).await {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            report.failed(format!("Local file not found: {}", local.display()));
            return report;
        }
        Err(e) => {
            report.failed(format!("Error simulating upload: {}", e));
            return report;
        }
    };

    let owned = local.to_path_buf();
    let hash = match tokio::task::spawn_blocking(move || hash_file(&owned)).await {
        Ok(Ok(hash)) => hash,
        Ok(Err(e)) => {
            report.failed(format!("Error simulating upload: {}", e));
            return report;
        }
        Err(e) => {
            report.failed(format!("Error simulating upload: {}", e));
            return report;
        }
    };

    let mtime = crate::core::scanner::local_mtime(&metadata);
    report
        .section("File Details")
        .item("Local path", local.display())
        .item("Remote path", &target)
        .item("File size", human_bytes(metadata.len()))
        .item("Content hash", format!("{} (BLAKE3)", hash))
        .item("Modified", format_mtime(mtime));

    let prefix: String = hash.chars().take(16).collect();
    report
        .section("Operation Plan")
        .action(format!("Create temporary file: {}", tmp))
        .action("Transfer data to temporary file")
        .action(format!("Verify content hash: {}...", prefix))
        .action(format!("Atomically rename: {} → {}", tmp, target));
    report
}

/// 单文件下载的试运行；不获取远程文件信息
pub async fn dry_run_download(remote: &str, local: &Path) -> DryRunReport {
    let is_dir = tokio::fs::metadata(local)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);
    let target: PathBuf = if is_dir {
        local.join(remote_basename(remote.trim_end_matches('/')))
    } else {
        local.to_path_buf()
    };
    let tmp = local_temp_path(&target);

    let mut report = DryRunReport::new(
        "File Download",
        format!("{} → {}", remote, target.display()),
    );
    report
        .section("Operation Plan")
        .action(format!("Create temporary file: {}", tmp.display()))
        .action("Transfer data to temporary file")
        .action(format!(
            "Atomically rename: {} → {}",
            tmp.display(),
            target.display()
        ));
    report.section("Note").item(
        "Information",
        "Remote file details cannot be determined in dry-run mode",
    );
    report
}

/// 推送预估：对过滤后的文件列表做一次折叠得到
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushEstimate {
    /// 扫描到的文件数
    pub files_found: usize,
    /// 扫描到的总字节数
    pub total_size: u64,
    /// 通过过滤的文件数
    pub matched_count: usize,
    /// 通过过滤的字节数
    pub matched_size: u64,
    /// 前若干个匹配文件
    pub listed: Vec<(PathKey, u64)>,
}

impl PushEstimate {
    pub fn from_tree(tree: &TreeMapping, filter: &PatternFilter) -> Self {
        tree.iter().fold(Self::default(), |mut acc, (key, record)| {
            acc.files_found += 1;
            acc.total_size += record.size;
            if filter.included(key) {
                acc.matched_count += 1;
                acc.matched_size += record.size;
                if acc.listed.len() < LISTED_FILES {
                    acc.listed.push((key.clone(), record.size));
                }
            }
            acc
        })
    }

    /// 未列出的匹配文件数
    pub fn remaining(&self) -> usize {
        self.matched_count.saturating_sub(self.listed.len())
    }
}

/// 目录推送的试运行
pub async fn dry_run_push(
    local_root: &Path,
    remote_root: &str,
    filter: &PatternFilter,
) -> DryRunReport {
    let direction = format!("{} → {}", local_root.display(), remote_root);
    let mut report = DryRunReport::new("Synchronization push", direction.clone());

    report.section("Operation Parameters").item("Direction", &direction);
    if !filter.include().is_empty() {
        report.item("Include patterns", filter.include().patterns().join(", "));
    }
    if !filter.exclude().is_empty() {
        report.item("Exclude patterns", filter.exclude().patterns().join(", "));
    }

    let tree = match scan_local(local_root).await {
        Ok(tree) => tree,
        Err(e) => {
            report.failed(format!("Error scanning local directory: {}", e));
            return report;
        }
    };

    let estimate = PushEstimate::from_tree(&tree, filter);
    report
        .section("File Analysis")
        .item("Files found", estimate.files_found)
        .item("Total size", human_bytes(estimate.total_size));

    if estimate.files_found == 0 {
        return report;
    }

    report.section("Files to be transferred");
    for (key, size) in &estimate.listed {
        report.indented_item(
            join_remote(remote_root, key.as_str()),
            human_bytes(*size),
            2,
        );
    }
    if estimate.remaining() > 0 {
        report.indented_item(format!("... and {} more", estimate.remaining()), "", 2);
    } else if estimate.matched_count == 0 {
        report.indented_item("No files match the filter criteria", "", 2);
    } else {
        report.indented_item("Total files to transfer", estimate.matched_count, 2);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::filter::PatternSet;
    use tempfile::TempDir;

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(0), "0.0 B");
        assert_eq!(human_bytes(1023), "1023.0 B");
        assert_eq!(human_bytes(1536), "1.5 KiB");
        assert_eq!(human_bytes(5 * 1024 * 1024), "5.0 MiB");
        assert_eq!(human_bytes(1u64 << 50), "1.0 PiB");
    }

    #[test]
    fn test_hash_file_matches_blake3() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.bin");
        let data = vec![7u8; HASH_BUF_SIZE * 2 + 17];
        std::fs::write(&path, &data).unwrap();
        assert_eq!(
            hash_file(&path).unwrap(),
            blake3::hash(&data).to_hex().to_string()
        );
    }

    #[test]
    fn test_report_layout() {
        let mut report = DryRunReport::new("File Upload", "a → b");
        report.section("File Details").item("File size", "2.0 B");
        report.section("Operation Plan").action("Transfer data");
        let text = report.to_string();

        let rule = "-".repeat(81);
        assert!(text.starts_with("\nDRY RUN: File Upload\nTarget: a → b\nTime: "));
        assert!(text.contains(&format!("{}\n\nFile Details:\nFile size      : 2.0 B\n", rule)));
        assert!(text.contains("\nOperation Plan:\n→ Transfer data\n"));
        assert!(text.ends_with(&format!("{}\nDRY RUN COMPLETE: No changes were made\n\n", rule)));
    }

    #[tokio::test]
    async fn test_dry_run_upload_describes_plan() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hi").unwrap();

        let report = dry_run_upload(&path, "/srv/").await;
        let text = report.to_string();
        assert!(text.contains("Remote path    : /srv/a.txt"));
        assert!(text.contains("File size      : 2.0 B"));
        assert!(text.contains("→ Create temporary file: /srv/a.txt.tmp"));
        assert!(text.contains("→ Atomically rename: /srv/a.txt.tmp → /srv/a.txt"));
        assert!(!report.has_section("Error"));
    }

    #[tokio::test]
    async fn test_dry_run_upload_missing_source_reports_failure() {
        let dir = TempDir::new().unwrap();
        let report = dry_run_upload(&dir.path().join("missing.txt"), "x.txt").await;
        assert!(report.has_section("Error"));
        let text = report.to_string();
        assert!(text.contains("Status         : FAILED"));
        assert!(text.contains("Local file not found"));
    }

    #[tokio::test]
    async fn test_dry_run_download_notes_missing_details() {
        let dir = TempDir::new().unwrap();
        let report = dry_run_download("/srv/data.csv", dir.path()).await;
        let text = report.to_string();
        assert!(text.contains(&format!(
            "Atomically rename: {} → {}",
            dir.path().join("data.csv.tmp").display(),
            dir.path().join("data.csv").display()
        )));
        assert!(text.contains("Remote file details cannot be determined in dry-run mode"));
    }

    #[tokio::test]
    async fn test_dry_run_push_lists_first_ten() {
        let dir = TempDir::new().unwrap();
        for i in 0..12 {
            std::fs::write(dir.path().join(format!("f{:02}.txt", i)), b"x").unwrap();
        }
        std::fs::write(dir.path().join("skip.log"), b"x").unwrap();

        let filter = PatternFilter::new(PatternSet::default(), PatternSet::new(["*.log"]).unwrap());
        let tree = scan_local(dir.path()).await.unwrap();
        let estimate = PushEstimate::from_tree(&tree, &filter);
        assert_eq!(estimate.files_found, 13);
        assert_eq!(estimate.matched_count, 12);
        assert_eq!(estimate.listed.len(), 10);
        assert_eq!(estimate.remaining(), 2);

        let text = dry_run_push(dir.path(), "/srv", &filter).await.to_string();
        assert!(text.contains("Exclude patterns: *.log"));
        assert!(text.contains("  /srv/f00.txt   : 1.0 B"));
        assert!(text.contains("... and 2 more"));
        assert!(!text.contains("skip.log   "));
    }

    #[tokio::test]
    async fn test_dry_run_push_without_matches() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.md"), b"x").unwrap();
        let filter = PatternFilter::new(PatternSet::new(["*.txt"]).unwrap(), PatternSet::default());

        let text = dry_run_push(dir.path(), "/srv", &filter).await.to_string();
        assert!(text.contains("No files match the filter criteria"));
    }

    #[tokio::test]
    async fn test_dry_run_push_scan_failure() {
        let dir = TempDir::new().unwrap();
        let report = dry_run_push(&dir.path().join("nope"), "/srv", &PatternFilter::default()).await;
        assert!(report.has_section("Error"));
    }
}
