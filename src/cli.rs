//! 命令行参数

use crate::config::Modes;
use crate::progress::Verbosity;
use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// 按 YAML 配置在本地与 SFTP 服务器之间备份、下载和上传目录
#[derive(Debug, Clone, Parser)]
#[command(name = "sftpsync", version)]
pub struct Cli {
    /// YAML 配置文件
    #[arg(long, value_name = "FILE")]
    pub config: PathBuf,

    /// 执行备份
    #[arg(long, action = ArgAction::Set, default_value_t = true, value_name = "BOOL")]
    pub backup: bool,

    /// 执行下载
    #[arg(long, action = ArgAction::Set, default_value_t = false, value_name = "BOOL")]
    pub download: bool,

    /// 执行上传
    #[arg(long, action = ArgAction::Set, default_value_t = false, value_name = "BOOL")]
    pub upload: bool,

    /// 输出级别: 0 静默, 1 进度条, 2 详细, 3 调试
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=3))]
    pub debug: u8,

    /// 同时把日志写入该文件
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    pub fn modes(&self) -> Modes {
        Modes {
            backup: self.backup,
            download: self.download,
            upload: self.upload,
        }
    }

    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_level(self.debug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["sftpsync", "--config", "site.yml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("site.yml"));
        assert_eq!(
            cli.modes(),
            Modes {
                backup: true,
                download: false,
                upload: false,
            }
        );
        assert_eq!(cli.verbosity(), Verbosity::Progress);
        assert!(cli.log_file.is_none());
    }

    #[test]
    fn test_explicit_modes() {
        let cli = Cli::try_parse_from([
            "sftpsync",
            "--config",
            "site.yml",
            "--backup",
            "false",
            "--upload",
            "true",
            "--debug",
            "3",
        ])
        .unwrap();
        assert!(!cli.backup);
        assert!(cli.upload);
        assert!(!cli.download);
        assert_eq!(cli.verbosity(), Verbosity::Firehose);
    }

    #[test]
    fn test_config_is_required() {
        assert!(Cli::try_parse_from(["sftpsync"]).is_err());
    }

    #[test]
    fn test_debug_out_of_range() {
        assert!(Cli::try_parse_from(["sftpsync", "--config", "c.yml", "--debug", "4"]).is_err());
    }
}
