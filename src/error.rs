//! 错误类型

use thiserror::Error;

/// 同步过程中可分类的错误
///
/// 逐文件的错误通常是带上下文的 `anyhow::Error`，需要区分类别时
/// 通过 `downcast_ref::<SyncError>()` 判断。
#[derive(Error, Debug)]
pub enum SyncError {
    /// 配置内容不合法（缺少字段、空路径等）
    #[error("配置错误: {0}")]
    Config(String),

    /// 配置文件无法读取
    #[error("无法读取配置文件 '{path}': {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// YAML 解析失败
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TCP / SSH 连接失败
    #[error("无法连接到 {host}: {message}")]
    Connection { host: String, message: String },

    /// 主机密钥校验失败
    #[error("主机密钥校验失败 ({host}): {message}")]
    HostKey { host: String, message: String },

    /// 所有认证方式均失败
    #[error("SSH 认证失败 ({user}@{host})")]
    Auth { user: String, host: String },

    /// 根目录不存在
    #[error("无法获取 '{0}' 的状态: 路径不存在")]
    RootNotFound(String),

    /// 根路径不是目录
    #[error("'{0}' 不是一个目录")]
    NotADirectory(String),

    /// 批次被取消
    #[error("操作已取消")]
    Cancelled,

    /// 批次中至少有一个条目失败
    #[error("{mode}失败: {failed}/{total} 个条目出错")]
    BatchFailed {
        mode: String,
        failed: u64,
        total: u64,
    },
}

impl SyncError {
    pub fn config(message: impl Into<String>) -> Self {
        SyncError::Config(message.into())
    }

    /// 判断一个 anyhow 错误是否为取消
    pub fn is_cancelled(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<SyncError>(), Some(SyncError::Cancelled))
    }
}
