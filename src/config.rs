//! 应用配置模块

use crate::error::SyncError;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// 本地与远程目录的一对一映射
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FolderMapping {
    pub local: String,
    pub remote: String,
}

/// 备份配置：把若干远程目录归档到一个本地目录
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackupConfig {
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub from: Vec<String>,
}

/// SSH 连接配置
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// 私钥文件，agent 和密码都失败时使用
    #[serde(default)]
    pub identity: Option<PathBuf>,
    #[serde(default = "default_known_hosts")]
    pub known_hosts: PathBuf,
}

fn default_port() -> u16 {
    22
}

fn default_username() -> String {
    current_user()
}

fn default_known_hosts() -> PathBuf {
    home_dir().join(".ssh").join("known_hosts")
}

/// 当前系统用户名
pub fn current_user() -> String {
    if cfg!(target_os = "windows") {
        std::env::var("USERNAME").unwrap_or_default()
    } else {
        std::env::var("USER").unwrap_or_default()
    }
}

/// 当前用户的主目录
pub fn home_dir() -> PathBuf {
    let var = if cfg!(target_os = "windows") {
        "USERPROFILE"
    } else {
        "HOME"
    };
    std::env::var(var).map(PathBuf::from).unwrap_or_default()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            username: default_username(),
            password: None,
            hostname: String::new(),
            port: default_port(),
            identity: None,
            known_hosts: default_known_hosts(),
        }
    }
}

/// 完整的 YAML 配置，启动时读取一次，之后只读
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub download: Vec<FolderMapping>,
    #[serde(default)]
    pub upload: Vec<FolderMapping>,
}

impl Config {
    /// 从 YAML 文件加载配置
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let content = fs::read_to_string(path).map_err(|source| SyncError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// 从 YAML 字符串解析配置
    pub fn from_yaml(yaml: &str) -> Result<Self, SyncError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// 校验本次运行要用到的部分
    pub fn validate(&self, modes: &Modes) -> Result<(), SyncError> {
        if self.connection.hostname.trim().is_empty() {
            return Err(SyncError::config("connection.hostname 不能为空"));
        }
        if self.connection.port == 0 {
            return Err(SyncError::config("connection.port 不能为 0"));
        }

        if modes.backup {
            if self.backup.to.trim().is_empty() {
                return Err(SyncError::config("backup.to 不能为空"));
            }
            if self.backup.from.is_empty() {
                return Err(SyncError::config("backup.from 至少需要一个远程目录"));
            }
            if let Some(idx) = self.backup.from.iter().position(|p| p.trim().is_empty()) {
                return Err(SyncError::config(format!("backup.from[{}] 不能为空", idx)));
            }
        }

        if modes.download {
            validate_mappings("download", &self.download)?;
        }
        if modes.upload {
            validate_mappings("upload", &self.upload)?;
        }

        Ok(())
    }
}

fn validate_mappings(section: &str, mappings: &[FolderMapping]) -> Result<(), SyncError> {
    for (idx, mapping) in mappings.iter().enumerate() {
        if mapping.local.trim().is_empty() {
            return Err(SyncError::config(format!("{}[{}].local 不能为空", section, idx)));
        }
        if mapping.remote.trim().is_empty() {
            return Err(SyncError::config(format!("{}[{}].remote 不能为空", section, idx)));
        }
    }
    Ok(())
}

/// 本次运行启用的模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Modes {
    pub backup: bool,
    pub download: bool,
    pub upload: bool,
}
