use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod cli;
pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod progress;
pub mod storage;

#[cfg(test)]
mod testutils;

pub use cli::Cli;
pub use commands::Endpoints;
pub use config::{Config, Modes};
pub use core::{BatchOutcome, SyncConfig, SyncEngine};
pub use error::SyncError;

use progress::{ProgressReporter, SyncMode, Verbosity};
use storage::{LocalStorage, SftpStorage};

/// 完整的一次运行：读取配置、连接服务器、依次执行启用的模式
///
/// 配置和连接错误在任何传输开始前返回。
pub async fn run(cli: &Cli) -> Result<()> {
    let modes = cli.modes();
    let config = Config::load(&cli.config)?;
    config.validate(&modes)?;

    if !modes.backup && !modes.download && !modes.upload {
        info!("没有启用任何模式");
        return Ok(());
    }

    let connection = config.connection.clone();
    let remote = tokio::task::spawn_blocking(move || SftpStorage::connect(&connection))
        .await
        .context("连接任务异常退出")??;
    let endpoints = Endpoints::new(Arc::new(remote), Arc::new(LocalStorage::new()));

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，正在取消...");
            ctrl_c.cancel();
        }
    });

    run_modes(&endpoints, &config, modes, cli.verbosity(), cancel).await
}

/// 按 备份 -> 下载 -> 上传 的顺序执行，某个模式失败时不再执行后续模式
pub async fn run_modes(
    endpoints: &Endpoints,
    config: &Config,
    modes: Modes,
    verbosity: Verbosity,
    cancel: CancellationToken,
) -> Result<()> {
    if modes.backup {
        let sink = ProgressReporter::new(SyncMode::Backup, verbosity);
        commands::run_backup(endpoints, &config.backup, cancel.clone(), &sink)
            .await
            .into_result(SyncMode::Backup.label())?;
    }

    if modes.download {
        let sink = ProgressReporter::new(SyncMode::Download, verbosity);
        commands::run_download(endpoints, &config.download, cancel.clone(), &sink)
            .await
            .into_result(SyncMode::Download.label())?;
    }

    if modes.upload {
        let sink = ProgressReporter::new(SyncMode::Upload, verbosity);
        commands::run_upload(endpoints, &config.upload, cancel.clone(), &sink)
            .await
            .into_result(SyncMode::Upload.label())?;
    }

    debug!("所有模式执行完毕");
    Ok(())
}
