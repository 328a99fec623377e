pub mod local;
pub mod sftp;

use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

pub use local::LocalStorage;
pub use sftp::SftpStorage;

// ============ 公共常量 ============

/// 流式复制时每块的大小（字节）
pub const COPY_CHUNK_SIZE: usize = 256 * 1024;
/// 新建目录的权限
pub const DIR_MODE: u32 = 0o755;
/// 上传完成后远程文件的权限
pub const UPLOAD_FILE_MODE: u32 = 0o644;
/// 阻塞线程与异步流之间的通道容量
pub(crate) const WALK_CHANNEL_CAPACITY: usize = 256;

/// 文件元数据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub is_dir: bool,
}

/// 遍历产生的条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub path: String,
    pub is_dir: bool,
}

/// 惰性目录遍历流
pub type WalkStream = Pin<Box<dyn Stream<Item = Result<WalkEntry>> + Send>>;

/// 文件内容字节流
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// 文件系统能力接口，本地和远程各有一个实现
#[async_trait]
pub trait Storage: Send + Sync {
    /// 获取文件元数据（不跟随符号链接），不存在时返回 `None`
    async fn stat(&self, path: &str) -> Result<Option<FileMeta>>;

    /// 同 `stat`，但跟随符号链接，用于判断目标目录是否已存在
    async fn stat_follow(&self, path: &str) -> Result<Option<FileMeta>>;

    /// 解析路径中的符号链接
    async fn canonicalize(&self, path: &str) -> Result<String>;

    /// 深度优先遍历 `root`，先产生根本身，同级按名称排序。
    /// 单个条目出错时产生 `Err` 并继续遍历其余条目。
    fn walk(&self, root: &str) -> WalkStream;

    /// 打开文件读取
    async fn open_read(&self, path: &str) -> Result<ByteStream>;

    /// 创建（截断）文件并写入整个流，返回写入的字节数。
    /// 出错时目标文件可能只写入了一部分。
    async fn write_stream(&self, path: &str, stream: ByteStream) -> Result<u64>;

    /// 设置文件权限
    async fn set_permissions(&self, path: &str, mode: u32) -> Result<()>;

    /// 创建单层目录，目录已存在视为成功
    async fn create_dir(&self, path: &str) -> Result<()>;

    /// 逐层创建目录
    async fn create_dir_all(&self, path: &str) -> Result<()> {
        for dir in dir_hierarchy(path) {
            match self.stat_follow(&dir).await? {
                Some(meta) if meta.is_dir => continue,
                Some(_) => bail!("'{}:{}' 已存在且不是目录", self.name(), dir),
                None => self.create_dir(&dir).await?,
            }
        }
        Ok(())
    }

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 列出从最外层到 `path` 本身的每一级目录
///
/// `"/a/b/c"` 得到 `["/a", "/a/b", "/a/b/c"]`，相对路径同理。
pub fn dir_hierarchy(path: &str) -> Vec<String> {
    let absolute = path.starts_with('/');
    let mut current = String::new();
    let mut dirs = Vec::new();

    for part in path.split('/').filter(|p| !p.is_empty() && *p != ".") {
        if absolute || !current.is_empty() {
            current.push('/');
        }
        current.push_str(part);
        dirs.push(current.clone());
    }

    dirs
}

/// 路径的父目录，没有父目录时返回 `None`
pub fn parent_dir(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&trimmed[..idx]),
        None => None,
    }
}
