//! 各同步模式的执行入口

pub mod backup;
pub mod download;
pub mod upload;

use crate::storage::Storage;
use std::sync::Arc;

pub use backup::run_backup;
pub use download::run_download;
pub use upload::run_upload;

/// 一次运行使用的两端存储
#[derive(Clone)]
pub struct Endpoints {
    pub remote: Arc<dyn Storage>,
    pub local: Arc<dyn Storage>,
}

impl Endpoints {
    pub fn new(remote: Arc<dyn Storage>, local: Arc<dyn Storage>) -> Self {
        Self { remote, local }
    }
}
