use super::Endpoints;
use crate::config::FolderMapping;
use crate::core::{
    BatchOutcome, CountPolicy, RootKind, Route, SyncConfig, SyncEngine, TransferOptions,
};
use crate::progress::ProgressSink;
use crate::storage::UPLOAD_FILE_MODE;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// 上传：每个映射把本地目录复制到远程目录
///
/// 本地根目录先解析符号链接，不可访问时静默跳过该映射。
/// 边遍历边传输，每个文件先补建远程父目录，复制后设置为 0644。
pub async fn run_upload(
    endpoints: &Endpoints,
    mappings: &[FolderMapping],
    cancel: CancellationToken,
    sink: &dyn ProgressSink,
) -> BatchOutcome {
    info!("开始上传: {} 个映射", mappings.len());

    let engine = SyncEngine::with_cancel(
        endpoints.local.clone(),
        endpoints.remote.clone(),
        SyncConfig {
            root_kind: RootKind::Local,
            count_policy: CountPolicy::Streaming,
            transfer: TransferOptions {
                create_parents: true,
                file_mode: Some(UPLOAD_FILE_MODE),
            },
            ..SyncConfig::default()
        },
        cancel,
    );

    let routes = mappings
        .iter()
        .map(|m| Route::walk(m.local.as_str(), m.remote.as_str()))
        .collect();

    engine.run(routes, sink).await
}
