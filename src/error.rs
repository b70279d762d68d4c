//! 错误类型

use crate::core::status::TransferStatus;
use thiserror::Error;

/// 同步核心的 Result 别名
pub type Result<T> = std::result::Result<T, SyncError>;

/// 同步/传输控制过程中的错误
#[derive(Error, Debug)]
pub enum SyncError {
    /// 参数或配置非法（空根路径、非法时间戳等），不重试
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 差异生成失败，整个运行失败，发生在任何传输之前
    #[error("Diff production error: {0}")]
    DiffProduction(String),

    /// 单个文件传输失败，记录后继续
    #[error("Transfer failed for {path}: {detail}")]
    Transfer { path: String, detail: String },

    /// 会话不可用（认证丢失、连接断开），立即终止运行
    #[error("Connection lost: {0}")]
    ConnectionFatal(String),

    /// 监听器回调失败（仅在严格模式下向上传播）
    ///
    /// `status` 是失败时正在分发的状态；传输可能已经完成，调用方仍需按它记账。
    #[error("Listener error: {detail}")]
    Listener {
        detail: String,
        status: Option<Box<TransferStatus>>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// 是否会终止整个运行
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::ConnectionFatal(_) | SyncError::Listener { .. })
    }

    /// 出错前已经分发（并且已经发生）的状态
    pub fn reported_status(&self) -> Option<&TransferStatus> {
        match self {
            SyncError::Listener {
                status: Some(status),
                ..
            } => Some(status),
            _ => None,
        }
    }

    /// 从存储层的 anyhow 错误中识别出同步错误（例如连接中断）
    pub fn from_storage(path: &str, err: &anyhow::Error) -> Self {
        match err.downcast_ref::<SyncError>() {
            Some(SyncError::ConnectionFatal(msg)) => SyncError::ConnectionFatal(msg.clone()),
            _ => SyncError::Transfer {
                path: path.to_string(),
                detail: err.to_string(),
            },
        }
    }
}
