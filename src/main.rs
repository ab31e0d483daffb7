use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use treesync::core::{
    dry_run_download, dry_run_push, dry_run_upload, ConsoleSink, EventSink, PatternFilter,
    TransferEngine,
};
use treesync::logging::init_logging;
use treesync::transport::TransportType;
use treesync::{create_transport, AppConfig, SyncEngine, SyncSettings, Transport, TransportConfig};

const DEFAULT_CONFIG: &str = "treesync.json";

#[derive(Parser, Debug)]
#[command(name = "treesync", version, about = "Synchronize a local directory tree with a remote endpoint")]
struct Cli {
    /// JSON config file (default: ./treesync.json if present)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Use a local directory as the remote endpoint
    #[arg(long, global = true, value_name = "DIR")]
    remote_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone, Default)]
struct FilterArgs {
    /// Only transfer paths matching this glob (repeatable)
    #[arg(long = "include", value_name = "GLOB")]
    include: Vec<String>,

    /// Skip paths matching this glob (repeatable, wins over --include)
    #[arg(long = "exclude", value_name = "GLOB")]
    exclude: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload every local file to the remote tree
    Push {
        local: PathBuf,
        remote: String,
        #[command(flatten)]
        filter: FilterArgs,
        /// Describe the transfer without performing it
        #[arg(long)]
        dry_run: bool,
    },
    /// Download every remote file into the local tree
    Pull {
        remote: String,
        local: PathBuf,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Merge both trees, keeping both versions on conflict
    Sync {
        local: PathBuf,
        remote: String,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Upload a single file
    Upload {
        file: PathBuf,
        remote: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Download a single file
    Download {
        remote: String,
        file: PathBuf,
        #[arg(long)]
        dry_run: bool,
    },
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::load_or_default(&PathBuf::from(DEFAULT_CONFIG))?,
    };
    if let Some(dir) = &cli.remote_dir {
        config.remote = TransportConfig {
            typ: TransportType::Local,
            path: Some(dir.display().to_string()),
            ..TransportConfig::default()
        };
    }
    Ok(config)
}

/// 命令行规则覆盖配置文件
fn merge_filters(settings: &SyncSettings, args: &FilterArgs) -> SyncSettings {
    let mut merged = settings.clone();
    if !args.include.is_empty() {
        merged.include = args.include.clone();
    }
    if !args.exclude.is_empty() {
        merged.exclude = args.exclude.clone();
    }
    merged
}

fn connect(config: &AppConfig) -> Result<Arc<dyn Transport>> {
    create_transport(&config.remote).context("无法创建远程端点")
}

/// 执行命令；返回 false 表示有文件传输失败
async fn run(cli: Cli, config: AppConfig) -> Result<bool> {
    let sink: Arc<dyn EventSink> = Arc::new(ConsoleSink);

    match cli.command {
        Command::Push {
            local,
            remote,
            filter,
            dry_run,
        } => {
            let settings = merge_filters(&config.sync, &filter);
            if dry_run {
                let filter = PatternFilter::from_patterns(&settings.include, &settings.exclude)?;
                print!("{}", dry_run_push(&local, &remote, &filter).await);
                return Ok(true);
            }
            let engine = SyncEngine::new(connect(&config)?, sink, settings)?;
            let report = engine.push(&local, &remote).await?;
            println!("{}", report);
            Ok(!report.has_failures())
        }
        Command::Pull {
            remote,
            local,
            filter,
        } => {
            let settings = merge_filters(&config.sync, &filter);
            let engine = SyncEngine::new(connect(&config)?, sink, settings)?;
            let report = engine.pull(&remote, &local).await?;
            println!("{}", report);
            Ok(!report.has_failures())
        }
        Command::Sync {
            local,
            remote,
            filter,
        } => {
            let settings = merge_filters(&config.sync, &filter);
            let engine = SyncEngine::new(connect(&config)?, sink, settings)?;
            let report = engine.bidirectional(&local, &remote).await?;
            println!("{}", report);
            Ok(!report.has_failures())
        }
        Command::Upload {
            file,
            remote,
            dry_run,
        } => {
            if dry_run {
                print!("{}", dry_run_upload(&file, &remote).await);
                return Ok(true);
            }
            let transfer = TransferEngine::new(connect(&config)?, sink);
            // 失败已经通过事件输出
            Ok(transfer.upload(&file, &remote).await.is_ok())
        }
        Command::Download {
            remote,
            file,
            dry_run,
        } => {
            if dry_run {
                print!("{}", dry_run_download(&remote, &file).await);
                return Ok(true);
            }
            let transfer = TransferEngine::new(connect(&config)?, sink);
            Ok(transfer.download(&remote, &file).await.is_ok())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("treesync: {:#}", e);
            return ExitCode::from(2);
        }
    };

    // guard 需要保持到进程结束
    let _guard = init_logging(&config.log);
    info!("treesync {} 启动", env!("CARGO_PKG_VERSION"));

    match run(cli, config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("执行失败: {:#}", e);
            eprintln!("treesync: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_repeatable_filters() {
        let cli = Cli::try_parse_from([
            "treesync",
            "--remote-dir",
            "/mnt/backup",
            "push",
            "./docs",
            "/docs",
            "--include",
            "*.md",
            "--include",
            "*.txt",
            "--exclude",
            "draft*",
            "--dry-run",
        ])
        .unwrap();

        match cli.command {
            Command::Push {
                filter, dry_run, ..
            } => {
                assert_eq!(filter.include, vec!["*.md", "*.txt"]);
                assert_eq!(filter.exclude, vec!["draft*"]);
                assert!(dry_run);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_flags_override_config() {
        let settings = SyncSettings {
            include: vec!["*.rs".into()],
            exclude: vec!["target*".into()],
            ..SyncSettings::default()
        };
        let args = FilterArgs {
            include: vec!["*.md".into()],
            exclude: Vec::new(),
        };
        let merged = merge_filters(&settings, &args);
        assert_eq!(merged.include, vec!["*.md".to_string()]);
        assert_eq!(merged.exclude, vec!["target*".to_string()]);
    }

    #[test]
    fn test_remote_dir_selects_local_transport() {
        let cli = Cli::try_parse_from([
            "treesync",
            "--config",
            "/nonexistent/treesync.json",
            "pull",
            "/a",
            "./b",
        ])
        .unwrap();
        assert!(load_config(&cli).is_err());

        let cli = Cli::try_parse_from(["treesync", "--remote-dir", "/srv", "pull", "/a", "./b"])
            .unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.remote.typ, TransportType::Local);
        assert_eq!(config.remote.path.as_deref(), Some("/srv"));
    }
}
