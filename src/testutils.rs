use crate::storage::{ByteStream, FileMeta, LocalStorage, Storage, WalkStream};
use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;

pub fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// 在 `root` 下按相对路径创建文件（自动创建父目录）
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (relative, content) in files {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
    }
}

/// 列出目录下所有文件的相对路径和内容，按路径排序
pub fn read_tree(root: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<(String, Vec<u8>)> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e.path().strip_prefix(root).unwrap();
            (path_str(relative), std::fs::read(e.path()).unwrap())
        })
        .collect();
    files.sort();
    files
}

/// 在本地存储之上注入故障的存储，路径包含标记时出错
pub struct FaultyStorage {
    inner: LocalStorage,
    read_marker: Option<String>,
    walk_marker: Option<String>,
}

impl FaultyStorage {
    /// 读取路径包含 `marker` 的文件时，产生第一块后报错
    pub fn failing_reads(marker: &str) -> Self {
        Self {
            inner: LocalStorage::new(),
            read_marker: Some(marker.to_string()),
            walk_marker: None,
        }
    }

    /// 遍历到路径包含 `marker` 的条目时，用一个错误代替该条目
    pub fn failing_walk(marker: &str) -> Self {
        Self {
            inner: LocalStorage::new(),
            read_marker: None,
            walk_marker: Some(marker.to_string()),
        }
    }
}

#[async_trait]
impl Storage for FaultyStorage {
    async fn stat(&self, path: &str) -> Result<Option<FileMeta>> {
        self.inner.stat(path).await
    }

    async fn stat_follow(&self, path: &str) -> Result<Option<FileMeta>> {
        self.inner.stat_follow(path).await
    }

    async fn canonicalize(&self, path: &str) -> Result<String> {
        self.inner.canonicalize(path).await
    }

    fn walk(&self, root: &str) -> WalkStream {
        let marker = self.walk_marker.clone();
        self.inner
            .walk(root)
            .map(move |entry| match (&marker, entry) {
                (Some(m), Ok(entry)) if entry.path.contains(m.as_str()) => {
                    Err(anyhow::anyhow!("injected walk failure at {}", entry.path))
                }
                (_, entry) => entry,
            })
            .boxed()
    }

    async fn open_read(&self, path: &str) -> Result<ByteStream> {
        let stream = self.inner.open_read(path).await?;
        match &self.read_marker {
            Some(m) if path.contains(m.as_str()) => {
                let failure = futures::stream::once(async {
                    Err::<bytes::Bytes, _>(anyhow::anyhow!("injected read failure"))
                });
                Ok(stream.take(1).chain(failure).boxed())
            }
            _ => Ok(stream),
        }
    }

    async fn write_stream(&self, path: &str, stream: ByteStream) -> Result<u64> {
        self.inner.write_stream(path, stream).await
    }

    async fn set_permissions(&self, path: &str, mode: u32) -> Result<()> {
        self.inner.set_permissions(path, mode).await
    }

    async fn create_dir(&self, path: &str) -> Result<()> {
        self.inner.create_dir(path).await
    }

    fn name(&self) -> &str {
        "faulty"
    }
}
