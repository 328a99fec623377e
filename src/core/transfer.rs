//! 单个条目的传输

use super::outcome::{DiscoveredItem, TransferResult};
use crate::error::SyncError;
use crate::storage::{parent_dir, Storage};
use anyhow::{Context, Result};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 传输选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferOptions {
    /// 传输文件前逐层创建目标的父目录
    pub create_parents: bool,
    /// 复制完成后设置的目标文件权限
    pub file_mode: Option<u32>,
}

/// 计算目标路径：目标根 + "/" + 去掉源根前缀和一个前导 "/" 的相对路径
///
/// 除此之外不做任何规范化，嵌套结构一一对应。
pub fn dest_path(source_root: &str, dest_root: &str, source_path: &str) -> String {
    let relative = source_path.strip_prefix(source_root).unwrap_or(source_path);
    let relative = relative.strip_prefix('/').unwrap_or(relative);
    format!("{}/{}", dest_root, relative)
}

/// 把源存储上的条目复制到目标存储
pub struct TransferWorker {
    source: Arc<dyn Storage>,
    dest: Arc<dyn Storage>,
    options: TransferOptions,
    cancel: CancellationToken,
}

impl TransferWorker {
    pub fn new(
        source: Arc<dyn Storage>,
        dest: Arc<dyn Storage>,
        options: TransferOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            dest,
            options,
            cancel,
        }
    }

    /// 传输一个条目，结果总是引用源路径
    pub async fn transfer(&self, item: &DiscoveredItem, dest_path: &str) -> TransferResult {
        if self.cancel.is_cancelled() {
            return TransferResult::failed(&item.path, SyncError::Cancelled.into());
        }

        let result = if item.is_dir {
            self.transfer_dir(dest_path).await
        } else {
            self.transfer_file(&item.path, dest_path).await
        };

        match result {
            Ok(()) => TransferResult::ok(&item.path),
            Err(e) => TransferResult::failed(&item.path, e),
        }
    }

    async fn transfer_dir(&self, dest_path: &str) -> Result<()> {
        if self.options.create_parents {
            self.dest.create_dir_all(dest_path).await
        } else {
            self.dest.create_dir(dest_path).await
        }
    }

    async fn transfer_file(&self, source_path: &str, dest_path: &str) -> Result<()> {
        if self.options.create_parents {
            if let Some(parent) = parent_dir(dest_path) {
                self.dest.create_dir_all(parent).await.with_context(|| {
                    format!("无法创建目录层级 '{}:{}'", self.dest.name(), parent)
                })?;
            }
        }

        debug!(
            "复制: {}:{} -> {}:{}",
            self.source.name(),
            source_path,
            self.dest.name(),
            dest_path
        );

        let cancel = self.cancel.clone();
        let stream = self
            .source
            .open_read(source_path)
            .await?
            .map(move |chunk| {
                if cancel.is_cancelled() {
                    Err(SyncError::Cancelled.into())
                } else {
                    chunk
                }
            })
            .boxed();

        let bytes = self.dest.write_stream(dest_path, stream).await.with_context(|| {
            format!(
                "无法复制 '{}:{}' 到 '{}:{}'",
                self.source.name(),
                source_path,
                self.dest.name(),
                dest_path
            )
        })?;

        if let Some(mode) = self.options.file_mode {
            self.dest.set_permissions(dest_path, mode).await?;
        }

        debug!("  写入完成: {} ({} 字节)", dest_path, bytes);
        Ok(())
    }
}
