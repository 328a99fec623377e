pub mod engine;
pub mod outcome;
pub mod scanner;
pub mod transfer;

pub use engine::{
    CountPolicy, Discovery, PipelineHandle, PipelineState, RootKind, Route, SyncConfig, SyncEngine,
};
pub use outcome::{BatchOutcome, DiscoveredItem, FailedItem, TransferResult};
pub use scanner::{DiscoveryStream, FileScanner, Inventory, ScannedRoot};
pub use transfer::{dest_path, TransferOptions, TransferWorker};
