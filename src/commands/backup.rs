use super::Endpoints;
use crate::config::BackupConfig;
use crate::core::{
    BatchOutcome, CountPolicy, FileScanner, Inventory, RootKind, Route, SyncConfig, SyncEngine,
    TransferOptions, TransferResult,
};
use crate::progress::ProgressSink;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 备份：把所有远程目录完整镜像到 `config.to` 之下
///
/// 先预扫描全部远程根目录，任何扫描错误都会让整个批次失败且不传输任何文件。
/// 远程路径 `p` 的目标为 `to/p`（去掉 `p` 的一个前导 "/"）。
pub async fn run_backup(
    endpoints: &Endpoints,
    config: &BackupConfig,
    cancel: CancellationToken,
    sink: &dyn ProgressSink,
) -> BatchOutcome {
    let started = Instant::now();
    info!("开始备份: {} 个远程目录 -> {}", config.from.len(), config.to);

    let scanner = FileScanner::new(cancel.clone());
    let inventory = scanner
        .collect_remote(endpoints.remote.as_ref(), &config.from)
        .await;

    if !inventory.is_clean() {
        return abort(inventory, started, sink);
    }

    let engine = SyncEngine::with_cancel(
        endpoints.remote.clone(),
        endpoints.local.clone(),
        SyncConfig {
            root_kind: RootKind::Remote,
            count_policy: CountPolicy::Upfront,
            transfer: TransferOptions {
                create_parents: true,
                file_mode: None,
            },
            ..SyncConfig::default()
        },
        cancel,
    );

    debug!("备份清单: {} 个条目", inventory.items.len());
    let route = Route::listed(inventory.items, "", config.to.as_str());
    let mut outcome = engine.run(vec![route], sink).await;
    outcome.duration = started.elapsed();
    outcome
}

/// 预扫描出错：每个错误报告一次结构性失败，不做任何传输
fn abort(inventory: Inventory, started: Instant, sink: &dyn ProgressSink) -> BatchOutcome {
    info!(
        "预扫描出错，放弃备份（已发现 {} 个条目）",
        inventory.items.len()
    );

    let mut outcome = BatchOutcome::default();
    let errors = inventory.errors.len() as u64;
    outcome.discovered = errors;
    sink.discovered(errors);

    for e in inventory.errors {
        let result = TransferResult::structural(e);
        sink.item(&result);
        outcome.record(&result);
    }

    outcome.duration = started.elapsed();
    sink.finish(&outcome);
    outcome
}
