//! 枚举条目、单项结果与批次汇总

use crate::error::SyncError;
use std::time::Duration;

/// 枚举过程中发现的一个条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredItem {
    pub path: String,
    pub is_dir: bool,
}

/// 一次传输尝试的结果
///
/// `error` 为空表示成功。`path` 为空且带错误表示结构性失败
/// （例如根目录不存在），不对应具体文件。
#[derive(Debug)]
pub struct TransferResult {
    pub path: String,
    pub error: Option<anyhow::Error>,
}

impl TransferResult {
    pub fn ok(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            error: None,
        }
    }

    pub fn failed(path: impl Into<String>, error: anyhow::Error) -> Self {
        Self {
            path: path.into(),
            error: Some(error),
        }
    }

    /// 不属于任何单个文件的失败
    pub fn structural(error: anyhow::Error) -> Self {
        Self {
            path: String::new(),
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_structural(&self) -> bool {
        self.path.is_empty() && self.error.is_some()
    }
}

/// 失败条目记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedItem {
    /// 为空表示结构性失败
    pub path: String,
    pub message: String,
}

/// 一个批次的汇总，只在结果流完全排空后生成
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// 发现计数（仅用于进度显示）
    pub discovered: u64,
    /// 收到的结果总数
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub had_errors: bool,
    pub failures: Vec<FailedItem>,
    pub duration: Duration,
}

impl BatchOutcome {
    /// 记录一个结果
    pub fn record(&mut self, result: &TransferResult) {
        self.total += 1;
        match &result.error {
            None => self.succeeded += 1,
            Some(e) => {
                self.failed += 1;
                self.had_errors = true;
                self.failures.push(FailedItem {
                    path: result.path.clone(),
                    message: format!("{:#}", e),
                });
            }
        }
    }

    /// 结构性失败的数量
    pub fn structural_failures(&self) -> usize {
        self.failures.iter().filter(|f| f.path.is_empty()).count()
    }

    /// 有任何错误时整个批次视为失败
    pub fn into_result(self, mode: &str) -> Result<Self, SyncError> {
        if self.had_errors {
            Err(SyncError::BatchFailed {
                mode: mode.to_string(),
                failed: self.failed,
                total: self.total,
            })
        } else {
            Ok(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts() {
        let mut outcome = BatchOutcome::default();
        outcome.record(&TransferResult::ok("/a"));
        outcome.record(&TransferResult::failed("/b", anyhow::anyhow!("boom")));
        outcome.record(&TransferResult::structural(anyhow::anyhow!("root missing")));

        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failed, 2);
        assert!(outcome.had_errors);
        assert_eq!(outcome.structural_failures(), 1);
        assert_eq!(outcome.failures[0].path, "/b");
    }

    #[test]
    fn test_into_result() {
        let clean = BatchOutcome::default();
        assert!(clean.into_result("上传").is_ok());

        let mut dirty = BatchOutcome::default();
        dirty.record(&TransferResult::failed("/x", anyhow::anyhow!("denied")));
        let err = dirty.into_result("上传").unwrap_err();
        assert!(matches!(err, SyncError::BatchFailed { failed: 1, total: 1, .. }));
    }
}
