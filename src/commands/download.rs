use super::Endpoints;
use crate::config::FolderMapping;
use crate::core::{BatchOutcome, CountPolicy, RootKind, Route, SyncConfig, SyncEngine};
use crate::progress::ProgressSink;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// 下载：每个映射把远程目录复制到本地目录
///
/// 远程根目录不存在时该映射报告一次失败，其余映射照常执行。
/// 本地目录逐个创建，不补建父目录（深度优先遍历保证父目录先出现）。
pub async fn run_download(
    endpoints: &Endpoints,
    mappings: &[FolderMapping],
    cancel: CancellationToken,
    sink: &dyn ProgressSink,
) -> BatchOutcome {
    info!("开始下载: {} 个映射", mappings.len());

    let engine = SyncEngine::with_cancel(
        endpoints.remote.clone(),
        endpoints.local.clone(),
        SyncConfig {
            root_kind: RootKind::Remote,
            count_policy: CountPolicy::Upfront,
            ..SyncConfig::default()
        },
        cancel,
    );

    let routes = mappings
        .iter()
        .map(|m| Route::walk(m.remote.as_str(), m.local.as_str()))
        .collect();

    engine.run(routes, sink).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::storage::{LocalStorage, Storage};
    use crate::testutils::{path_str, read_tree, write_tree};
    use std::sync::Arc;

    fn endpoints() -> Endpoints {
        let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new());
        Endpoints::new(storage.clone(), storage)
    }

    fn mapping(local: &std::path::Path, remote: &std::path::Path) -> FolderMapping {
        FolderMapping {
            local: path_str(local),
            remote: path_str(remote),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_download_nested_tree() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        write_tree(
            remote.path(),
            &[("media/a/b/c/deep.jpg", "jpeg"), ("media/top.png", "png")],
        );

        let mappings = vec![mapping(local.path(), &remote.path().join("media"))];
        let outcome =
            run_download(&endpoints(), &mappings, CancellationToken::new(), &NoProgress).await;

        assert!(!outcome.had_errors, "{:?}", outcome.failures);
        // a, a/b, a/b/c, deep.jpg, top.png
        assert_eq!(outcome.total, 5);
        assert_eq!(read_tree(local.path()), read_tree(&remote.path().join("media")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_download_missing_remote_root() {
        let remote = tempfile::tempdir().unwrap();
        let local_ok = tempfile::tempdir().unwrap();
        let local_bad = tempfile::tempdir().unwrap();
        write_tree(remote.path(), &[("ok/file.txt", "data")]);

        let mappings = vec![
            mapping(local_bad.path(), &remote.path().join("gone")),
            mapping(local_ok.path(), &remote.path().join("ok")),
        ];
        let outcome =
            run_download(&endpoints(), &mappings, CancellationToken::new(), &NoProgress).await;

        assert!(outcome.had_errors);
        assert_eq!(outcome.structural_failures(), 1);
        assert!(outcome.failures[0].message.contains("gone"));
        assert_eq!(
            std::fs::read_to_string(local_ok.path().join("file.txt")).unwrap(),
            "data"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_download_overwrites_existing() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        write_tree(remote.path(), &[("r/f.txt", "new")]);
        write_tree(local.path(), &[("f.txt", "old content that is longer")]);

        let mappings = vec![mapping(local.path(), &remote.path().join("r"))];
        let outcome =
            run_download(&endpoints(), &mappings, CancellationToken::new(), &NoProgress).await;

        assert!(!outcome.had_errors);
        assert_eq!(std::fs::read_to_string(local.path().join("f.txt")).unwrap(), "new");
    }
}
