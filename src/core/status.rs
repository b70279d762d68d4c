//! 传输状态快照

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 传输方向
///
/// 删除操作按被修改的一端归类：删除本地文件记为 `Get`，删除远端对象记为 `Put`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferType {
    /// 上传（本地 -> 远端）
    Put,
    /// 下载（远端 -> 本地）
    Get,
    /// 远端副本复制
    Replicate,
}

impl std::fmt::Display for TransferType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferType::Put => write!(f, "put"),
            TransferType::Get => write!(f, "get"),
            TransferType::Replicate => write!(f, "replicate"),
        }
    }
}

/// 传输状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Initiated,
    InProgress,
    Success,
    Failure,
    Paused,
    Cancelled,
    Restart,
}

impl TransferState {
    /// 是否是单个文件的终止状态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Success | TransferState::Failure | TransferState::Cancelled
        )
    }
}

impl std::fmt::Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferState::Initiated => write!(f, "initiated"),
            TransferState::InProgress => write!(f, "in_progress"),
            TransferState::Success => write!(f, "success"),
            TransferState::Failure => write!(f, "failure"),
            TransferState::Paused => write!(f, "paused"),
            TransferState::Cancelled => write!(f, "cancelled"),
            TransferState::Restart => write!(f, "restart"),
        }
    }
}

/// 一次传输事件的不可变快照
///
/// 构造完成后没有任何修改方法；`error_detail` 只能通过 [`TransferStatus::failure`]
/// 设置，因此当且仅当状态为 `Failure` 时存在。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStatus {
    transfer_type: TransferType,
    state: TransferState,
    source_path: String,
    target_path: String,
    total_files_expected: usize,
    total_files_processed: usize,
    total_bytes_to_transfer: u64,
    total_bytes_transferred: u64,
    error_detail: Option<String>,
    timestamp: DateTime<Utc>,
}

impl TransferStatus {
    pub fn new(
        transfer_type: TransferType,
        state: TransferState,
        source_path: impl Into<String>,
        target_path: impl Into<String>,
    ) -> Self {
        Self {
            transfer_type,
            state,
            source_path: source_path.into(),
            target_path: target_path.into(),
            total_files_expected: 0,
            total_files_processed: 0,
            total_bytes_to_transfer: 0,
            total_bytes_transferred: 0,
            error_detail: None,
            timestamp: Utc::now(),
        }
    }

    /// 失败状态，附带错误说明
    pub fn failure(
        transfer_type: TransferType,
        source_path: impl Into<String>,
        target_path: impl Into<String>,
        error_detail: impl Into<String>,
    ) -> Self {
        Self {
            error_detail: Some(error_detail.into()),
            ..Self::new(transfer_type, TransferState::Failure, source_path, target_path)
        }
    }

    pub fn with_file_counts(mut self, expected: usize, processed: usize) -> Self {
        self.total_files_expected = expected;
        self.total_files_processed = processed;
        self
    }

    pub fn with_byte_counts(mut self, to_transfer: u64, transferred: u64) -> Self {
        self.total_bytes_to_transfer = to_transfer;
        self.total_bytes_transferred = transferred;
        self
    }

    pub fn transfer_type(&self) -> TransferType {
        self.transfer_type
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    pub fn target_path(&self) -> &str {
        &self.target_path
    }

    pub fn total_files_expected(&self) -> usize {
        self.total_files_expected
    }

    pub fn total_files_processed(&self) -> usize {
        self.total_files_processed
    }

    pub fn total_bytes_to_transfer(&self) -> u64 {
        self.total_bytes_to_transfer
    }

    pub fn total_bytes_transferred(&self) -> u64 {
        self.total_bytes_transferred
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
