//! 日志模块 - 控制台日志和可选的文件日志

use crate::progress::Verbosity;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// 文件日志的时间格式
const FILE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// 日志配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// 默认日志级别: "error", "warn", "info", "debug"，`RUST_LOG` 优先
    pub level: String,
    /// 日志文件，为空时只输出到控制台
    pub file: Option<PathBuf>,
}

impl LogConfig {
    pub fn new(verbosity: Verbosity, file: Option<PathBuf>) -> Self {
        Self {
            level: verbosity.log_level().to_string(),
            file,
        }
    }

    /// 创建日志级别过滤器
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }
}

/// 初始化日志系统
///
/// 返回的 guard 必须在进程结束前一直持有，否则文件日志可能丢失尾部。
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let (dir, name) = split_log_path(path)?;
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("无法创建日志目录 '{}'", dir.display()))?;

            let appender = tracing_appender::rolling::never(&dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .with_timer(ChronoLocal::new(FILE_TIME_FORMAT.to_string()));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("日志系统已经初始化")?;

    Ok(guard)
}

/// 拆分日志文件路径为目录和文件名
fn split_log_path(path: &Path) -> Result<(PathBuf, String)> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("日志文件路径无效: '{}'", path.display()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, name))
}
