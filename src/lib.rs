//! 网格存储客户端的同步与传输控制核心
//!
//! 比较本地目录树和远端集合树，逐个路径决定上传/下载/删除/跳过，
//! 再把操作依次交给执行器；运行过程可以暂停、取消，并通过回调观察。

pub mod account;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use account::AccountContext;
pub use config::SyncConfig;
pub use self::core::{
    CallbackTelemetry, Decision, DecisionKind, DecisionSummary, DiffEntry, ReconciliationPolicy,
    RunResult, RunState, SynchronizeProcessor, SynchronizeRequest, TransferControlBlock,
    TransferState, TransferStatus, TransferStatusCallbackListener, TransferType,
};
pub use error::{Result, SyncError};
pub use logging::{init_logging, LogConfig};
pub use storage::{LocalStorage, MemoryStorage, Storage};
