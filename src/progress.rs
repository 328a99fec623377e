//! 进度显示

use crate::core::{BatchOutcome, TransferResult};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::{error, info};

/// 批次进度的接收方
///
/// 由排空循环在调用方任务中调用，发现计数只影响显示。
pub trait ProgressSink: Send + Sync {
    fn discovered(&self, n: u64);
    fn item(&self, result: &TransferResult);
    fn finish(&self, outcome: &BatchOutcome);
}

/// 不显示任何进度
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn discovered(&self, _n: u64) {}
    fn item(&self, _result: &TransferResult) {}
    fn finish(&self, _outcome: &BatchOutcome) {}
}

/// 输出详细程度，对应 `--debug 0..=3`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Silent,
    Progress,
    Verbose,
    Firehose,
}

impl Verbosity {
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => Verbosity::Silent,
            1 => Verbosity::Progress,
            2 => Verbosity::Verbose,
            _ => Verbosity::Firehose,
        }
    }

    /// 对应的默认日志级别
    pub fn log_level(self) -> &'static str {
        match self {
            Verbosity::Silent => "error",
            Verbosity::Progress => "warn",
            Verbosity::Verbose => "info",
            Verbosity::Firehose => "debug",
        }
    }

    fn shows_bar(self) -> bool {
        self == Verbosity::Progress
    }
}

/// 同步模式，决定进度条前缀和结束提示
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Backup,
    Download,
    Upload,
}

impl SyncMode {
    /// 用于错误信息的名称
    pub fn label(self) -> &'static str {
        match self {
            SyncMode::Backup => "备份",
            SyncMode::Download => "下载",
            SyncMode::Upload => "上传",
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            SyncMode::Backup => "Backing-up",
            SyncMode::Download => "Downloading",
            SyncMode::Upload => "Uploading",
        }
    }

    fn complete_message(self) -> &'static str {
        match self {
            SyncMode::Backup => "Backup complete",
            SyncMode::Download => "Download complete",
            SyncMode::Upload => "Upload finished",
        }
    }
}

/// 基于 indicatif 的进度显示
///
/// 进度条长度随发现计数增长，只在 `Progress` 级别绘制；
/// 失败在任何级别都以 error 记录。
pub struct ProgressReporter {
    mode: SyncMode,
    verbosity: Verbosity,
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new(mode: SyncMode, verbosity: Verbosity) -> Self {
        // 长度从 0 开始，随发现计数增长
        let bar = if verbosity.shows_bar() {
            let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
            let style = ProgressStyle::with_template(
                "{prefix:>12.cyan.bold} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {wide_msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
            bar.set_style(style);
            bar
        } else {
            ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::hidden())
        };
        bar.set_prefix(mode.prefix());

        Self {
            mode,
            verbosity,
            bar,
        }
    }

    /// 当前进度条位置（已处理的结果数）
    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    /// 当前进度条长度（累计发现数）
    pub fn length(&self) -> u64 {
        self.bar.length().unwrap_or(0)
    }
}

impl ProgressSink for ProgressReporter {
    fn discovered(&self, n: u64) {
        self.bar.inc_length(n);
    }

    fn item(&self, result: &TransferResult) {
        self.bar.inc(1);

        match &result.error {
            Some(e) if result.is_structural() => {
                self.bar.suspend(|| error!("{}: {:#}", self.mode.prefix(), e));
            }
            Some(e) => {
                self.bar
                    .suspend(|| error!("{} {}: {:#}", self.mode.prefix(), result.path, e));
            }
            None => {
                if self.verbosity >= Verbosity::Verbose {
                    info!("{} {}", self.mode.prefix(), result.path);
                } else {
                    self.bar.set_message(result.path.clone());
                }
            }
        }
    }

    fn finish(&self, outcome: &BatchOutcome) {
        if outcome.had_errors {
            let line = format!(
                "{} failed: {}/{} 个条目出错",
                self.mode.prefix(),
                outcome.failed,
                outcome.total
            );
            self.bar.abandon_with_message(line.clone());
            if !self.verbosity.shows_bar() {
                error!("{}", line);
            }
        } else {
            self.bar.finish_with_message(self.mode.complete_message());
            if self.verbosity >= Verbosity::Verbose {
                info!(
                    "{}: {} 个条目, 耗时 {:.2?}",
                    self.mode.complete_message(),
                    outcome.total,
                    outcome.duration
                );
            }
        }
    }
}
