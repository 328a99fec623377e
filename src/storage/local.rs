use super::{ByteStream, FileMeta, Storage, WalkEntry, WalkStream, WALK_CHANNEL_CAPACITY};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::ReaderStream;
use walkdir::WalkDir;

/// 本地文件系统，路径按原样使用（不拼接基础目录）
pub struct LocalStorage {
    name: String,
}

impl LocalStorage {
    pub fn new() -> Self {
        Self {
            name: "local".to_string(),
        }
    }

    /// 规范化路径分隔符（统一使用 /）
    fn normalize_path(path: &Path) -> String {
        path.to_string_lossy().replace('\\', "/")
    }

    fn meta_of(
        path: &str,
        metadata: std::io::Result<std::fs::Metadata>,
    ) -> Result<Option<FileMeta>> {
        match metadata {
            Ok(metadata) => Ok(Some(FileMeta {
                is_dir: metadata.is_dir(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("无法获取 'local:{}' 的状态", path)),
        }
    }
}

impl Default for LocalStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn stat(&self, path: &str) -> Result<Option<FileMeta>> {
        Self::meta_of(path, fs::symlink_metadata(path).await)
    }

    async fn stat_follow(&self, path: &str) -> Result<Option<FileMeta>> {
        Self::meta_of(path, fs::metadata(path).await)
    }

    async fn canonicalize(&self, path: &str) -> Result<String> {
        let resolved = fs::canonicalize(path)
            .await
            .with_context(|| format!("无法解析 'local:{}' 的符号链接", path))?;
        Ok(Self::normalize_path(&resolved))
    }

    fn walk(&self, root: &str) -> WalkStream {
        let (tx, rx) = mpsc::channel(WALK_CHANNEL_CAPACITY);
        let root = root.to_string();

        // 使用 spawn_blocking 避免阻塞 async runtime
        tokio::task::spawn_blocking(move || {
            let walker = WalkDir::new(&root)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter();

            for entry in walker {
                let item = entry
                    .map(|entry| {
                        // 指向目录的符号链接按目录处理，但不进入
                        let is_dir = entry.file_type().is_dir()
                            || (entry.path_is_symlink() && entry.path().is_dir());
                        WalkEntry {
                            path: Self::normalize_path(entry.path()),
                            is_dir,
                        }
                    })
                    .map_err(|e| anyhow::anyhow!("遍历 'local:{}' 出错: {}", root, e));

                // 接收端已关闭，停止遍历
                if tx.blocking_send(item).is_err() {
                    break;
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    async fn open_read(&self, path: &str) -> Result<ByteStream> {
        let file = fs::File::open(path)
            .await
            .with_context(|| format!("无法打开文件 'local:{}'", path))?;

        let path = path.to_string();
        let stream = ReaderStream::with_capacity(file, super::COPY_CHUNK_SIZE).map_err(move |e| {
            anyhow::Error::new(e).context(format!("读取 'local:{}' 失败", path))
        });

        Ok(stream.boxed())
    }

    async fn write_stream(&self, path: &str, mut stream: ByteStream) -> Result<u64> {
        let mut file = fs::File::create(path)
            .await
            .with_context(|| format!("无法创建文件 'local:{}'", path))?;

        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .with_context(|| format!("写入 'local:{}' 失败", path))?;
            written += chunk.len() as u64;
        }

        file.flush()
            .await
            .with_context(|| format!("写入 'local:{}' 失败", path))?;

        Ok(written)
    }

    #[cfg(unix)]
    async fn set_permissions(&self, path: &str, mode: u32) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .await
            .with_context(|| format!("无法设置 'local:{}' 的权限", path))
    }

    #[cfg(not(unix))]
    async fn set_permissions(&self, _path: &str, _mode: u32) -> Result<()> {
        Ok(())
    }

    async fn create_dir(&self, path: &str) -> Result<()> {
        match fs::create_dir(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false) {
                    Ok(())
                } else {
                    Err(e).with_context(|| format!("'local:{}' 已存在且不是目录", path))
                }
            }
            Err(e) => Err(e).with_context(|| format!("无法创建目录 'local:{}'", path)),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
