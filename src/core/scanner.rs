use super::outcome::DiscoveredItem;
use crate::error::SyncError;
use crate::storage::Storage;
use anyhow::Result;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 惰性的发现流，`Err` 表示某个条目出错（遍历会继续）
pub type DiscoveryStream = Pin<Box<dyn Stream<Item = Result<DiscoveredItem>> + Send>>;

/// 一个已开始遍历的根目录
pub struct ScannedRoot {
    /// 实际遍历的根路径（本地根为解析符号链接后的路径）
    pub root: String,
    pub items: DiscoveryStream,
}

/// 多个根目录预扫描的结果
#[derive(Debug, Default)]
pub struct Inventory {
    pub items: Vec<DiscoveredItem>,
    pub errors: Vec<anyhow::Error>,
}

impl Inventory {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// 文件扫描器
pub struct FileScanner {
    cancel: CancellationToken,
}

impl FileScanner {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// 扫描远程根目录
    ///
    /// 先 stat 根目录，不存在或不是目录时整体失败，不产生任何条目。
    pub async fn scan_remote(&self, storage: &dyn Storage, root: &str) -> Result<ScannedRoot> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled.into());
        }

        match storage.stat(root).await? {
            None => return Err(SyncError::RootNotFound(format!("remote:{}", root)).into()),
            Some(meta) if !meta.is_dir => {
                return Err(SyncError::NotADirectory(format!("remote:{}", root)).into())
            }
            Some(_) => {}
        }

        debug!("开始扫描: {}:{}", storage.name(), root);
        Ok(ScannedRoot {
            root: root.to_string(),
            items: self.descendants(storage, root),
        })
    }

    /// 扫描本地根目录
    ///
    /// 先解析符号链接；根目录不可访问时跳过整个映射（返回 `None`，不算错误）。
    pub async fn scan_local(&self, storage: &dyn Storage, root: &str) -> Option<ScannedRoot> {
        if self.cancel.is_cancelled() {
            return None;
        }

        match storage.stat(root).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!("本地目录不存在，跳过: {}", root);
                return None;
            }
            Err(e) => {
                warn!("本地目录不可访问，跳过: {} ({:#})", root, e);
                return None;
            }
        }

        let resolved = match storage.canonicalize(root).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("无法解析本地目录，跳过: {} ({:#})", root, e);
                return None;
            }
        };

        if resolved != root {
            debug!("本地目录 {} 解析为 {}", root, resolved);
        }

        debug!("开始扫描: {}:{}", storage.name(), resolved);
        let items = self.descendants(storage, &resolved);
        Some(ScannedRoot {
            root: resolved,
            items,
        })
    }

    /// 依次预扫描多个远程根目录（用于备份的整批计数）
    ///
    /// 某个根目录出错不会丢弃已经发现的条目，错误单独记录。
    pub async fn collect_remote(&self, storage: &dyn Storage, roots: &[String]) -> Inventory {
        let mut inventory = Inventory::default();

        for root in roots {
            let scanned = match self.scan_remote(storage, root).await {
                Ok(scanned) => scanned,
                Err(e) => {
                    inventory.errors.push(e);
                    continue;
                }
            };

            let mut items = scanned.items;
            while let Some(item) = items.next().await {
                match item {
                    Ok(item) => inventory.items.push(item),
                    Err(e) => inventory.errors.push(e),
                }
            }
        }

        debug!(
            "预扫描完成: {} 个条目, {} 个错误",
            inventory.items.len(),
            inventory.errors.len()
        );

        inventory
    }

    /// 根目录之下的所有条目（不含根本身），取消后停止产生新条目
    fn descendants(&self, storage: &dyn Storage, root: &str) -> DiscoveryStream {
        let root_path = root.to_string();
        storage
            .walk(root)
            .filter_map(move |entry| {
                let item = match entry {
                    Ok(entry) if entry.path == root_path => None,
                    Ok(entry) => Some(Ok(DiscoveredItem {
                        path: entry.path,
                        is_dir: entry.is_dir,
                    })),
                    Err(e) => Some(Err(e)),
                };
                futures::future::ready(item)
            })
            .take_until(self.cancel.clone().cancelled_owned())
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use crate::testutils::{path_str, write_tree};
    use futures::TryStreamExt;

    fn scanner() -> FileScanner {
        FileScanner::new(CancellationToken::new())
    }

    #[tokio::test]
    async fn test_scan_remote_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let missing = path_str(&dir.path().join("missing"));
        let err = scanner()
            .scan_remote(&LocalStorage::new(), &missing)
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::RootNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_scan_remote_not_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path(), &[("file.txt", "x")]);
        let file = path_str(&dir.path().join("file.txt"));
        let err = scanner()
            .scan_remote(&LocalStorage::new(), &file)
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::NotADirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_scan_excludes_root() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path(), &[("a/b.txt", "b"), ("c.txt", "c")]);
        let root = path_str(dir.path());

        let scanned = scanner().scan_remote(&LocalStorage::new(), &root).await.unwrap();
        let items: Vec<DiscoveredItem> = scanned.items.try_collect().await.unwrap();

        let paths: Vec<&str> = items.iter().map(|i| i.path.as_str()).collect();
        assert!(!paths.contains(&root.as_str()));
        assert_eq!(items.len(), 3);
        assert!(items[0].is_dir);
        assert!(items[0].path.ends_with("/a"));
        assert!(items[1].path.ends_with("/a/b.txt"));
        assert!(items[2].path.ends_with("/c.txt"));
    }

    #[tokio::test]
    async fn test_scan_local_missing_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let missing = path_str(&dir.path().join("missing"));
        assert!(scanner()
            .scan_local(&LocalStorage::new(), &missing)
            .await
            .is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_scan_local_resolves_symlinked_root() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path(), &[("real/one.txt", "1")]);
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link")).unwrap();

        let link = path_str(&dir.path().join("link"));
        let scanned = scanner()
            .scan_local(&LocalStorage::new(), &link)
            .await
            .unwrap();
        assert!(scanned.root.ends_with("/real"));

        let items: Vec<DiscoveredItem> = scanned.items.try_collect().await.unwrap();
        assert_eq!(items.len(), 1);
        assert!(items[0].path.starts_with(&scanned.root));
    }

    #[tokio::test]
    async fn test_collect_remote_keeps_items_after_error() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path(), &[("one/a.txt", "a"), ("two/b.txt", "b")]);
        let roots = vec![
            path_str(&dir.path().join("one")),
            path_str(&dir.path().join("missing")),
            path_str(&dir.path().join("two")),
        ];

        let inventory = scanner()
            .collect_remote(&LocalStorage::new(), &roots)
            .await;

        assert!(!inventory.is_clean());
        assert_eq!(inventory.errors.len(), 1);
        assert_eq!(inventory.items.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_scan_fails() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = FileScanner::new(token)
            .scan_remote(&LocalStorage::new(), &path_str(dir.path()))
            .await
            .err()
            .unwrap();
        assert!(SyncError::is_cancelled(&err));
    }
}
