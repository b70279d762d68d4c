//! 传输执行器

use super::control::TransferControlBlock;
use super::diff::ObjectType;
use super::listener::ListenerSet;
use super::policy::{Decision, DecisionKind};
use super::status::{TransferState, TransferStatus, TransferType};
use crate::account::AccountContext;
use crate::error::{Result, SyncError};
use crate::storage::{join_path, Storage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// 需要执行的操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Upload,
    Download,
    DeleteLocal,
    DeleteRemote,
}

impl OperationKind {
    /// 跳过类决策没有对应操作
    pub fn from_decision(kind: DecisionKind) -> Option<Self> {
        match kind {
            DecisionKind::Upload => Some(OperationKind::Upload),
            DecisionKind::Download => Some(OperationKind::Download),
            DecisionKind::DeleteLocal => Some(OperationKind::DeleteLocal),
            DecisionKind::DeleteRemote => Some(OperationKind::DeleteRemote),
            DecisionKind::SkipUnchanged | DecisionKind::SkipConflict => None,
        }
    }

    /// 状态回调里上报的方向：按被修改的一端归类
    pub fn transfer_type(&self) -> TransferType {
        match self {
            OperationKind::Upload | OperationKind::DeleteRemote => TransferType::Put,
            OperationKind::Download | OperationKind::DeleteLocal => TransferType::Get,
        }
    }
}

/// 提交给执行器的单个操作
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferOperation {
    pub kind: OperationKind,
    /// 相对于同步根目录的路径
    pub relative_path: String,
    pub local_path: String,
    pub remote_path: String,
    pub object_type: ObjectType,
    /// 源端大小（删除时为 0）
    pub length: u64,
    /// 源端修改时间，写入后同步到目标端
    pub modified_time: Option<i64>,
}

impl TransferOperation {
    /// 由决策生成操作；跳过类决策返回 None
    pub fn from_decision(decision: &Decision, local_root: &str, remote_root: &str) -> Option<Self> {
        let kind = OperationKind::from_decision(decision.kind)?;
        let entry = &decision.entry;
        let source = match kind {
            OperationKind::Upload => entry.local.as_ref(),
            OperationKind::Download => entry.remote.as_ref(),
            OperationKind::DeleteLocal | OperationKind::DeleteRemote => None,
        };

        Some(Self {
            kind,
            relative_path: entry.path.clone(),
            local_path: join_path(local_root, &entry.path),
            remote_path: join_path(remote_root, &entry.path),
            object_type: entry.object_type(),
            length: source.map_or(0, |s| s.length),
            modified_time: source.and_then(|s| s.modified_time),
        })
    }

    /// (源路径, 目标路径)；删除操作两者都是被删除的路径
    pub fn endpoints(&self) -> (&str, &str) {
        match self.kind {
            OperationKind::Upload => (&self.local_path, &self.remote_path),
            OperationKind::Download => (&self.remote_path, &self.local_path),
            OperationKind::DeleteLocal => (&self.local_path, &self.local_path),
            OperationKind::DeleteRemote => (&self.remote_path, &self.remote_path),
        }
    }
}

/// 传输执行器
///
/// `submit` 执行一个操作直到终止状态，并通过监听器发出恰好一次终止回调。
/// 单个文件失败以 `Failure` 状态返回；只有执行器自身无法继续（如连接断开）时才返回 `Err`。
#[async_trait]
pub trait TransferExecutor: Send + Sync {
    async fn submit(
        &self,
        op: &TransferOperation,
        control: &TransferControlBlock,
        listeners: &ListenerSet,
        account: &AccountContext,
    ) -> Result<TransferStatus>;
}

/// 在两个 [`Storage`] 之间整文件传输的执行器
///
/// 每个对象先整体读入内存再写到另一端，峰值内存约等于最大单个文件的大小。
/// 不支持分段、流式或断点续传；超大文件需要换用按块读写的执行器。
pub struct StorageTransferExecutor {
    local: Arc<dyn Storage>,
    remote: Arc<dyn Storage>,
    max_retries: u32,
    retry_base_delay_ms: u64,
}

impl StorageTransferExecutor {
    pub fn new(local: Arc<dyn Storage>, remote: Arc<dyn Storage>) -> Self {
        Self {
            local,
            remote,
            max_retries: 3,
            retry_base_delay_ms: 500,
        }
    }

    pub fn with_retries(mut self, max_retries: u32, retry_base_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay_ms = retry_base_delay_ms;
        self
    }

    fn status(
        op: &TransferOperation,
        state: TransferState,
        control: &TransferControlBlock,
        transferred: u64,
    ) -> TransferStatus {
        let (source, target) = op.endpoints();
        let processed = control.files_transferred_so_far()
            + usize::from(state == TransferState::Success);
        TransferStatus::new(op.kind.transfer_type(), state, source, target)
            .with_file_counts(control.total_files_to_transfer().unwrap_or(0), processed)
            .with_byte_counts(op.length, transferred)
    }

    fn failure_status(op: &TransferOperation, control: &TransferControlBlock, detail: &str) -> TransferStatus {
        let (source, target) = op.endpoints();
        TransferStatus::failure(op.kind.transfer_type(), source, target, detail)
            .with_file_counts(
                control.total_files_to_transfer().unwrap_or(0),
                control.files_transferred_so_far(),
            )
            .with_byte_counts(op.length, 0)
    }

    /// 复制一个对象，返回写入的字节数
    ///
    /// 整个对象缓存在一个 `Vec<u8>` 中
    async fn copy(
        from: &dyn Storage,
        to: &dyn Storage,
        op: &TransferOperation,
    ) -> anyhow::Result<u64> {
        let path = op.relative_path.as_str();
        if op.object_type == ObjectType::Collection {
            to.create_dir(path).await?;
            return Ok(0);
        }

        let data = from.read(path).await?;
        let bytes = data.len() as u64;
        debug!("  读取完成: {} {}字节", path, bytes);

        to.write(path, data).await?;
        // 保持两端修改时间一致，下一次比较才会判定为未变化
        if let Some(modified_time) = op.modified_time {
            to.set_modified_time(path, modified_time).await?;
        }
        debug!("  写入完成: {}", path);
        Ok(bytes)
    }

    /// 执行一次（不重试）
    async fn execute(&self, op: &TransferOperation) -> anyhow::Result<u64> {
        let (local, remote) = (self.local.as_ref(), self.remote.as_ref());
        match op.kind {
            OperationKind::Upload => Self::copy(local, remote, op).await,
            OperationKind::Download => Self::copy(remote, local, op).await,
            OperationKind::DeleteLocal => local.delete(&op.relative_path).await.map(|_| 0),
            OperationKind::DeleteRemote => remote.delete(&op.relative_path).await.map(|_| 0),
        }
    }
}

#[async_trait]
impl TransferExecutor for StorageTransferExecutor {
    async fn submit(
        &self,
        op: &TransferOperation,
        control: &TransferControlBlock,
        listeners: &ListenerSet,
        _account: &AccountContext,
    ) -> Result<TransferStatus> {
        let (source, target) = op.endpoints();
        debug!("{:?}: {} -> {} ({}字节)", op.kind, source, target, op.length);

        let mut last_error = String::new();

        for attempt in 0..=self.max_retries {
            if control.is_cancelled() {
                let status = Self::status(op, TransferState::Cancelled, control, 0);
                listeners.notify(&status)?;
                return Ok(status);
            }

            match self.execute(op).await {
                Ok(bytes) => {
                    let status = Self::status(op, TransferState::Success, control, bytes);
                    listeners.notify(&status)?;
                    return Ok(status);
                }
                Err(e) => {
                    let err = SyncError::from_storage(&op.relative_path, &e);
                    if err.is_fatal() {
                        error!("连接不可用，停止传输 {}: {}", op.relative_path, err);
                        let status = Self::failure_status(op, control, &err.to_string());
                        if let Err(listener_err) = listeners.notify(&status) {
                            warn!("{}", listener_err);
                        }
                        return Err(err);
                    }

                    last_error = e.to_string();
                    if attempt < self.max_retries {
                        // 指数退避
                        let delay = self.retry_base_delay_ms.saturating_mul(2_u64.saturating_pow(attempt));
                        warn!(
                            "操作失败，{}ms 后重试 ({}/{}): {}",
                            delay,
                            attempt + 1,
                            self.max_retries,
                            last_error
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    } else {
                        error!("操作最终失败 (已重试{}次): {}", self.max_retries, last_error);
                    }
                }
            }
        }

        let status = Self::failure_status(op, control, &format!("{}: {}", op.relative_path, last_error));
        listeners.notify(&status)?;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::diff::{DiffEntry, SideInfo};
    use crate::core::listener::CallbackTelemetry;
    use crate::storage::{Fault, MemoryStorage};

    const LOCAL: &str = "/home/user/data";
    const REMOTE: &str = "/tempZone/home/rods/data";

    fn decision(kind: DecisionKind, entry: DiffEntry) -> Decision {
        Decision {
            kind,
            entry,
            rationale: String::new(),
        }
    }

    fn setup() -> (Arc<MemoryStorage>, Arc<MemoryStorage>, StorageTransferExecutor) {
        let local = Arc::new(MemoryStorage::new(LOCAL));
        let remote = Arc::new(MemoryStorage::new(REMOTE));
        let executor = StorageTransferExecutor::new(local.clone(), remote.clone()).with_retries(2, 1);
        (local, remote, executor)
    }

    fn listeners_with(telemetry: &Arc<CallbackTelemetry>) -> ListenerSet {
        let mut listeners = ListenerSet::new(false);
        listeners.add(telemetry.clone());
        listeners
    }

    #[test]
    fn test_operation_from_decision() {
        let upload = decision(
            DecisionKind::Upload,
            DiffEntry::local_only("dir/a.txt", SideInfo::data_object(Some(7), 3)),
        );
        let op = TransferOperation::from_decision(&upload, LOCAL, REMOTE).unwrap();
        assert_eq!(op.kind, OperationKind::Upload);
        assert_eq!(op.local_path, "/home/user/data/dir/a.txt");
        assert_eq!(op.remote_path, "/tempZone/home/rods/data/dir/a.txt");
        assert_eq!(op.length, 3);
        assert_eq!(op.modified_time, Some(7));
        assert_eq!(op.endpoints(), (op.local_path.as_str(), op.remote_path.as_str()));

        let skip = decision(
            DecisionKind::SkipConflict,
            DiffEntry::local_only("a", SideInfo::data_object(None, 1)),
        );
        assert!(TransferOperation::from_decision(&skip, LOCAL, REMOTE).is_none());

        assert_eq!(OperationKind::DeleteLocal.transfer_type(), TransferType::Get);
        assert_eq!(OperationKind::DeleteRemote.transfer_type(), TransferType::Put);
    }

    #[tokio::test]
    async fn test_upload_preserves_mtime_and_reports_once() {
        let (local, remote, executor) = setup();
        local.put_object("a.txt", b"hello", Some(123)).await;
        let control = TransferControlBlock::new();
        control.set_total_files_to_transfer(1);
        let telemetry = Arc::new(CallbackTelemetry::new());

        let op = TransferOperation::from_decision(
            &decision(
                DecisionKind::Upload,
                DiffEntry::local_only("a.txt", SideInfo::data_object(Some(123), 5)),
            ),
            LOCAL,
            REMOTE,
        )
        .unwrap();

        let status = executor
            .submit(&op, &control, &listeners_with(&telemetry), &AccountContext::anonymous())
            .await
            .unwrap();

        assert_eq!(status.state(), TransferState::Success);
        assert_eq!(status.transfer_type(), TransferType::Put);
        assert_eq!(status.total_bytes_transferred(), 5);
        assert_eq!(status.total_files_expected(), 1);
        assert_eq!(status.total_files_processed(), 1);
        assert_eq!(telemetry.counts().callbacks, 1);
        assert_eq!(telemetry.put_count(), 1);

        let meta = remote.stat("a.txt").await.unwrap().unwrap();
        assert_eq!(meta.modified_time, Some(123));
        assert_eq!(remote.read("a.txt").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_download_collection_and_delete() {
        let (local, remote, executor) = setup();
        remote.put_object("dir/x", b"x", Some(1)).await;
        local.put_object("stale.txt", b"old", Some(1)).await;
        let control = TransferControlBlock::new();
        let listeners = ListenerSet::default();
        let account = AccountContext::anonymous();

        let mkdir = TransferOperation::from_decision(
            &decision(
                DecisionKind::Download,
                DiffEntry::remote_only("dir", SideInfo::collection(Some(1))),
            ),
            LOCAL,
            REMOTE,
        )
        .unwrap();
        let status = executor.submit(&mkdir, &control, &listeners, &account).await.unwrap();
        assert_eq!(status.state(), TransferState::Success);
        assert!(local.stat("dir").await.unwrap().unwrap().is_dir);

        let delete = TransferOperation::from_decision(
            &decision(
                DecisionKind::DeleteLocal,
                DiffEntry::local_only("stale.txt", SideInfo::data_object(Some(1), 3)),
            ),
            LOCAL,
            REMOTE,
        )
        .unwrap();
        let status = executor.submit(&delete, &control, &listeners, &account).await.unwrap();
        assert_eq!(status.transfer_type(), TransferType::Get);
        assert_eq!(status.source_path(), "/home/user/data/stale.txt");
        assert!(!local.exists("stale.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let (local, remote, executor) = setup();
        local.put_object("flaky", b"data", Some(5)).await;
        local.inject_fault("flaky", Fault::Transient(2));
        let telemetry = Arc::new(CallbackTelemetry::new());

        let op = TransferOperation::from_decision(
            &decision(
                DecisionKind::Upload,
                DiffEntry::local_only("flaky", SideInfo::data_object(Some(5), 4)),
            ),
            LOCAL,
            REMOTE,
        )
        .unwrap();

        let status = executor
            .submit(
                &op,
                &TransferControlBlock::new(),
                &listeners_with(&telemetry),
                &AccountContext::anonymous(),
            )
            .await
            .unwrap();

        assert_eq!(status.state(), TransferState::Success);
        assert_eq!(telemetry.counts().callbacks, 1);
        assert!(remote.exists("flaky").await.unwrap());
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let (local, _remote, executor) = setup();
        local.put_object("broken", b"data", Some(5)).await;
        local.inject_fault("broken", Fault::Permanent);
        let telemetry = Arc::new(CallbackTelemetry::new());

        let op = TransferOperation::from_decision(
            &decision(
                DecisionKind::Upload,
                DiffEntry::local_only("broken", SideInfo::data_object(Some(5), 4)),
            ),
            LOCAL,
            REMOTE,
        )
        .unwrap();

        let status = executor
            .submit(
                &op,
                &TransferControlBlock::new(),
                &listeners_with(&telemetry),
                &AccountContext::anonymous(),
            )
            .await
            .unwrap();

        assert_eq!(status.state(), TransferState::Failure);
        assert!(status.error_detail().unwrap().contains("broken"));
        assert_eq!(telemetry.failure_count(), 1);
        assert_eq!(telemetry.counts().callbacks, 1);
    }

    #[tokio::test]
    async fn test_connection_loss_is_not_retried() {
        let (local, remote, executor) = setup();
        local.put_object("a", b"data", Some(5)).await;
        remote.disconnect();
        let telemetry = Arc::new(CallbackTelemetry::new());

        let op = TransferOperation::from_decision(
            &decision(
                DecisionKind::Upload,
                DiffEntry::local_only("a", SideInfo::data_object(Some(5), 4)),
            ),
            LOCAL,
            REMOTE,
        )
        .unwrap();

        let err = executor
            .submit(
                &op,
                &TransferControlBlock::new(),
                &listeners_with(&telemetry),
                &AccountContext::anonymous(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::ConnectionFatal(_)));
        assert_eq!(telemetry.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (local, remote, executor) = setup();
        local.put_object("a", b"data", Some(5)).await;
        let control = TransferControlBlock::new();
        control.set_cancelled(true);

        let op = TransferOperation::from_decision(
            &decision(
                DecisionKind::Upload,
                DiffEntry::local_only("a", SideInfo::data_object(Some(5), 4)),
            ),
            LOCAL,
            REMOTE,
        )
        .unwrap();

        let status = executor
            .submit(&op, &control, &ListenerSet::default(), &AccountContext::anonymous())
            .await
            .unwrap();

        assert_eq!(status.state(), TransferState::Cancelled);
        assert_eq!(status.error_detail(), None);
        assert!(!remote.exists("a").await.unwrap());
    }
}
