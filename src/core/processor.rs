//! 同步处理器 - 比较、决策、逐个提交传输

use super::control::{TransferControlBlock, TransferFilter};
use super::diff::{StorageTreeDiff, TreeDiffProducer};
use super::executor::{StorageTransferExecutor, TransferExecutor, TransferOperation};
use super::listener::{ListenerSet, TransferStatusCallbackListener};
use super::policy::{Decision, DecisionSummary, ReconciliationPolicy, Watermarks};
use super::status::{TransferState, TransferStatus};
use crate::account::AccountContext;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 一次同步的参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynchronizeRequest {
    pub local_root: String,
    pub remote_root: String,
    /// 本地水位线（秒），0 表示关闭
    pub since_local: i64,
    /// 远端水位线（秒），0 表示关闭
    pub since_remote: i64,
    pub delete_on_sync: bool,
}

impl SynchronizeRequest {
    pub fn new(local_root: impl Into<String>, remote_root: impl Into<String>) -> Self {
        Self {
            local_root: local_root.into(),
            remote_root: remote_root.into(),
            since_local: 0,
            since_remote: 0,
            delete_on_sync: false,
        }
    }

    pub fn with_watermarks(mut self, since_local: i64, since_remote: i64) -> Self {
        self.since_local = since_local;
        self.since_remote = since_remote;
        self
    }

    pub fn with_delete_on_sync(mut self, delete_on_sync: bool) -> Self {
        self.delete_on_sync = delete_on_sync;
        self
    }

    /// 检查参数
    pub fn validate(&self) -> Result<()> {
        if self.local_root.trim().is_empty() {
            return Err(SyncError::Configuration("local root is empty".into()));
        }
        if self.remote_root.trim().is_empty() {
            return Err(SyncError::Configuration("remote root is empty".into()));
        }

        let now = Utc::now().timestamp();
        for (name, value) in [("sinceLocal", self.since_local), ("sinceRemote", self.since_remote)] {
            if value < 0 {
                return Err(SyncError::Configuration(format!(
                    "{} must not be negative: {}",
                    name, value
                )));
            }
            if value > now {
                return Err(SyncError::Configuration(format!(
                    "{} is in the future: {} > {}",
                    name, value, now
                )));
            }
        }
        Ok(())
    }
}

/// 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Initiated,
    Running,
    /// 运行中的暂停子状态
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Cancelled | RunState::Failed)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Initiated => write!(f, "initiated"),
            RunState::Running => write!(f, "running"),
            RunState::Paused => write!(f, "paused"),
            RunState::Completed => write!(f, "completed"),
            RunState::Cancelled => write!(f, "cancelled"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

/// 单个文件的失败记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFailure {
    pub path: String,
    pub error: String,
}

/// 同步结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub run_id: Uuid,
    pub state: RunState,
    pub summary: DecisionSummary,
    /// 已处理条目的决策，按处理顺序
    pub decisions: Vec<Decision>,
    /// 提交给执行器的操作数
    pub submitted: usize,
    pub files_transferred: usize,
    pub bytes_transferred: u64,
    pub failures: Vec<FileFailure>,
    /// 导致运行失败的错误
    pub fatal_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl RunResult {
    fn new(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            state: RunState::Initiated,
            summary: DecisionSummary::default(),
            decisions: Vec::new(),
            submitted: 0,
            files_transferred: 0,
            bytes_transferred: 0,
            failures: Vec::new(),
            fatal_error: None,
            started_at,
            ended_at: started_at,
        }
    }

    /// 运行耗时（毫秒）
    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds()
    }

    /// 需要传输或删除的决策
    pub fn operations(&self) -> impl Iterator<Item = &Decision> {
        self.decisions.iter().filter(|d| !d.kind.is_skip())
    }
}

/// 同步处理器
///
/// 一次运行：生成完整差异，逐条决策，把需要执行的操作依次交给执行器。
/// 每条目开始前检查取消和暂停；暂停只阻止新操作开始。
pub struct SynchronizeProcessor {
    diff_producer: Arc<dyn TreeDiffProducer>,
    executor: Arc<dyn TransferExecutor>,
    account: AccountContext,
    config: SyncConfig,
    listeners: Vec<Arc<dyn TransferStatusCallbackListener>>,
    state: Mutex<RunState>,
}

impl SynchronizeProcessor {
    pub fn new(
        diff_producer: Arc<dyn TreeDiffProducer>,
        executor: Arc<dyn TransferExecutor>,
        account: AccountContext,
    ) -> Self {
        Self {
            diff_producer,
            executor,
            account,
            config: SyncConfig::default(),
            listeners: Vec::new(),
            state: Mutex::new(RunState::Initiated),
        }
    }

    /// 基于两个存储创建处理器（差异和执行器都使用配置中的参数）
    pub fn from_storages(
        local: Arc<dyn Storage>,
        remote: Arc<dyn Storage>,
        account: AccountContext,
        config: SyncConfig,
    ) -> Self {
        let diff = StorageTreeDiff::new(local.clone(), remote.clone())
            .with_checksums(config.include_checksums);
        let executor = StorageTransferExecutor::new(local, remote)
            .with_retries(config.max_retries, config.retry_base_delay_ms);
        Self::new(Arc::new(diff), Arc::new(executor), account).with_config(config)
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// 注册监听器，需在运行开始前调用
    pub fn add_listener(&mut self, listener: Arc<dyn TransferStatusCallbackListener>) {
        self.listeners.push(listener);
    }

    /// 当前（或最近一次）运行的状态
    pub fn state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: RunState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// 按配置创建控制块（错误上限、排除规则）
    pub fn new_control_block(&self) -> Arc<TransferControlBlock> {
        Arc::new(TransferControlBlock::with_options(
            self.config.max_errors_before_cancel,
            TransferFilter::new(&self.config.exclude_patterns),
        ))
    }

    fn listener_set(&self) -> ListenerSet {
        let mut set = ListenerSet::new(self.config.listener_errors_fatal);
        for listener in &self.listeners {
            set.add(listener.clone());
        }
        set
    }

    /// 使用新的控制块执行一次同步
    pub async fn synchronize(&self, request: &SynchronizeRequest) -> Result<RunResult> {
        self.synchronize_with_control(request, self.new_control_block())
            .await
    }

    /// 使用调用方提供的控制块执行一次同步
    ///
    /// 参数非法、差异生成失败时返回 `Err`；连接中断等致命错误以 `Failed` 状态返回结果，
    /// 保留已经收集的失败记录。
    pub async fn synchronize_with_control(
        &self,
        request: &SynchronizeRequest,
        control: Arc<TransferControlBlock>,
    ) -> Result<RunResult> {
        request.validate()?;

        let mut result = RunResult::new(Uuid::new_v4(), Utc::now());
        self.set_state(RunState::Initiated);
        info!(
            "开始同步: {} <-> {} (run {})",
            request.local_root, request.remote_root, result.run_id
        );

        let entries = match self
            .diff_producer
            .diff(&request.local_root, &request.remote_root, &self.account)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                error!("比较目录失败: {}", e);
                self.set_state(RunState::Failed);
                return Err(e);
            }
        };

        let policy = ReconciliationPolicy::new(
            Watermarks::new(request.since_local, request.since_remote),
            request.delete_on_sync,
        )
        .with_time_tolerance(self.config.time_tolerance_seconds);

        // 先决策全部条目，得到需要传输的总数
        let filter = control.filter();
        let mut planned = Vec::with_capacity(entries.len());
        for entry in &entries {
            if filter.is_excluded(&entry.path) {
                debug!("排除: {}", entry.path);
                result.summary.filtered_count += 1;
                continue;
            }
            planned.push(policy.classify(entry));
        }

        let to_transfer = planned.iter().filter(|d| !d.kind.is_skip()).count();
        if !control.set_total_files_to_transfer(to_transfer) {
            debug!("控制块已设置文件总数，保留原值");
        }
        info!(
            "共 {} 项差异，{} 项需要处理，{} 项被排除",
            entries.len(),
            to_transfer,
            result.summary.filtered_count
        );

        let listeners = self.listener_set();
        let poll = self.config.pause_poll_interval();
        let mut state = RunState::Completed;
        self.set_state(RunState::Running);

        for decision in planned {
            if control.is_cancelled() {
                info!("同步已取消，已提交 {} 项", result.submitted);
                state = RunState::Cancelled;
                break;
            }

            if control.is_paused() {
                self.set_state(RunState::Paused);
                info!("同步已暂停");
                if !control.wait_while_paused(poll).await {
                    info!("暂停期间被取消，已提交 {} 项", result.submitted);
                    state = RunState::Cancelled;
                    break;
                }
                self.set_state(RunState::Running);
                info!("同步已恢复");
            }

            debug!("{} {}: {}", decision.kind, decision.entry.path, decision.rationale);
            result.summary.record(&decision);
            let op = TransferOperation::from_decision(&decision, &request.local_root, &request.remote_root);
            result.decisions.push(decision);

            let Some(op) = op else {
                continue;
            };
            result.submitted += 1;

            match self.executor.submit(&op, &control, &listeners, &self.account).await {
                Ok(status) => {
                    if record_status(&status, &op, &control, &mut result) == TransferState::Cancelled {
                        info!("传输被取消: {}", op.relative_path);
                        state = RunState::Cancelled;
                        break;
                    }
                }
                Err(e) if e.is_fatal() => {
                    // 严格监听器失败时传输本身可能已经完成，先按已分发的状态记账
                    if let Some(status) = e.reported_status() {
                        record_status(status, &op, &control, &mut result);
                    }
                    error!("同步中止 ({}): {}", op.relative_path, e);
                    result.fatal_error = Some(e.to_string());
                    state = RunState::Failed;
                    break;
                }
                Err(e) => {
                    warn!("文件同步失败 {}: {}", op.relative_path, e);
                    result.failures.push(FileFailure {
                        path: op.relative_path.clone(),
                        error: e.to_string(),
                    });
                    control.increment_error_count();
                }
            }
        }

        // 最后一个文件的回调里触发的取消在循环内观察不到
        if state == RunState::Completed && control.is_cancelled() {
            info!("最后一项处理完成后收到取消请求");
            state = RunState::Cancelled;
        }

        result.state = state;
        result.ended_at = Utc::now();
        self.set_state(state);

        info!(
            "同步结束 [{}]: 上传 {}, 下载 {}, 删除 {}, 未变化 {}, 冲突 {}, 失败 {}, 耗时 {}ms",
            state,
            result.summary.upload_count,
            result.summary.download_count,
            result.summary.delete_count(),
            result.summary.skip_unchanged_count,
            result.summary.conflict_count,
            result.failures.len(),
            result.duration_ms()
        );

        Ok(result)
    }
}

/// 按执行器给出的终止状态更新计数器和失败记录，返回该状态
fn record_status(
    status: &TransferStatus,
    op: &TransferOperation,
    control: &TransferControlBlock,
    result: &mut RunResult,
) -> TransferState {
    match status.state() {
        TransferState::Success => {
            control.increment_files_transferred();
            control.add_bytes_transferred(status.total_bytes_transferred());
            result.files_transferred += 1;
            result.bytes_transferred += status.total_bytes_transferred();
        }
        TransferState::Cancelled => {}
        TransferState::Failure => {
            let detail = status.error_detail().unwrap_or("unknown error");
            warn!("文件同步失败 {}: {}", op.relative_path, detail);
            result.failures.push(FileFailure {
                path: op.relative_path.clone(),
                error: detail.to_string(),
            });
            control.increment_error_count();
        }
        other => {
            warn!("执行器返回了非终止状态 {}: {}", other, op.relative_path);
            result.failures.push(FileFailure {
                path: op.relative_path.clone(),
                error: format!("executor returned non-terminal state {}", other),
            });
            control.increment_error_count();
        }
    }
    status.state()
}
