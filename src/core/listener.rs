//! 传输状态回调

use super::control::TransferControlBlock;
use super::status::{TransferState, TransferStatus, TransferType};
use crate::error::{Result, SyncError};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// 监听器回调错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// 传输状态回调监听器
///
/// 回调按传输循环发出事件的顺序逐个送达。实现方可以读写关联的控制块
/// （例如达到阈值后暂停），返回的错误默认只记录日志，不影响传输。
pub trait TransferStatusCallbackListener: Send + Sync {
    fn status_callback(&self, status: &TransferStatus) -> std::result::Result<(), ListenerError>;
}

impl<F> TransferStatusCallbackListener for F
where
    F: Fn(&TransferStatus) -> std::result::Result<(), ListenerError> + Send + Sync,
{
    fn status_callback(&self, status: &TransferStatus) -> std::result::Result<(), ListenerError> {
        self(status)
    }
}

/// 一组监听器
///
/// 每个状态都会送达所有监听器；单个监听器失败不会阻止其他监听器收到事件。
#[derive(Clone, Default)]
pub struct ListenerSet {
    listeners: Vec<Arc<dyn TransferStatusCallbackListener>>,
    /// 监听器失败是否向调用方报错
    strict: bool,
}

impl ListenerSet {
    pub fn new(strict: bool) -> Self {
        Self {
            listeners: Vec::new(),
            strict,
        }
    }

    pub fn add(&mut self, listener: Arc<dyn TransferStatusCallbackListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// 分发一个状态
    pub fn notify(&self, status: &TransferStatus) -> Result<()> {
        let mut failures = Vec::new();

        for (idx, listener) in self.listeners.iter().enumerate() {
            if let Err(e) = listener.status_callback(status) {
                warn!(
                    "监听器 #{} 处理回调失败 ({} {}): {}",
                    idx,
                    status.transfer_type(),
                    status.source_path(),
                    e
                );
                failures.push(format!("listener #{}: {}", idx, e));
            }
        }

        if self.strict && !failures.is_empty() {
            return Err(SyncError::Listener {
                detail: failures.join("; "),
                status: Some(Box::new(status.clone())),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.listeners.len())
            .field("strict", &self.strict)
            .finish()
    }
}

/// 把每个状态写入 tracing 日志
#[derive(Debug, Default)]
pub struct TracingListener;

impl TransferStatusCallbackListener for TracingListener {
    fn status_callback(&self, status: &TransferStatus) -> std::result::Result<(), ListenerError> {
        match status.error_detail() {
            Some(detail) => warn!(
                "{} {} -> {} 失败: {}",
                status.transfer_type(),
                status.source_path(),
                status.target_path(),
                detail
            ),
            None => debug!(
                "{} {} -> {} [{}] 文件 {}/{}",
                status.transfer_type(),
                status.source_path(),
                status.target_path(),
                status.state(),
                status.total_files_processed(),
                status.total_files_expected()
            ),
        }
        Ok(())
    }
}

/// 回调计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallbackCounts {
    /// 收到的回调总数，每次回调只计一次
    pub callbacks: usize,
    pub put: usize,
    pub get: usize,
    pub replicate: usize,
    pub failure: usize,
    pub cancel_encountered: bool,
    pub pause_encountered: bool,
}

/// 统计回调次数的监听器，可在第 N 次回调时自动暂停或取消
///
/// 失败的回调同时计入方向计数和失败计数，但阈值按收到的回调次数判断。
/// 阈值为 0 表示关闭。两个阈值各自独立触发，且各只触发一次。
#[derive(Debug, Default)]
pub struct CallbackTelemetry {
    counts: Mutex<CallbackCounts>,
    pause_after: usize,
    cancel_after: usize,
    control: Option<Arc<TransferControlBlock>>,
}

impl CallbackTelemetry {
    /// 只统计，不干预传输
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_control(
        control: Arc<TransferControlBlock>,
        pause_after: usize,
        cancel_after: usize,
    ) -> Self {
        Self {
            counts: Mutex::new(CallbackCounts::default()),
            pause_after,
            cancel_after,
            control: Some(control),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CallbackCounts> {
        self.counts.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn counts(&self) -> CallbackCounts {
        *self.lock()
    }

    pub fn put_count(&self) -> usize {
        self.lock().put
    }

    pub fn get_count(&self) -> usize {
        self.lock().get
    }

    pub fn replicate_count(&self) -> usize {
        self.lock().replicate
    }

    pub fn failure_count(&self) -> usize {
        self.lock().failure
    }

    pub fn is_cancel_encountered(&self) -> bool {
        self.lock().cancel_encountered
    }

    pub fn is_pause_encountered(&self) -> bool {
        self.lock().pause_encountered
    }

    pub fn pause_after(&self) -> usize {
        self.pause_after
    }

    pub fn cancel_after(&self) -> usize {
        self.cancel_after
    }

    pub fn control_block(&self) -> Option<&Arc<TransferControlBlock>> {
        self.control.as_ref()
    }
}

impl TransferStatusCallbackListener for CallbackTelemetry {
    fn status_callback(&self, status: &TransferStatus) -> std::result::Result<(), ListenerError> {
        let total = {
            let mut counts = self.lock();
            counts.callbacks += 1;

            match status.transfer_type() {
                TransferType::Get => counts.get += 1,
                TransferType::Put => counts.put += 1,
                TransferType::Replicate => counts.replicate += 1,
            }

            match status.state() {
                TransferState::Failure => counts.failure += 1,
                TransferState::Cancelled => counts.cancel_encountered = true,
                TransferState::Paused => counts.pause_encountered = true,
                _ => {}
            }

            counts.callbacks
        };

        if let Some(control) = &self.control {
            if self.pause_after > 0 && total == self.pause_after {
                debug!("第 {} 次回调，自动暂停", total);
                control.set_paused(true);
            }
            if self.cancel_after > 0 && total == self.cancel_after {
                debug!("第 {} 次回调，自动取消", total);
                control.set_cancelled(true);
            }
        }

        Ok(())
    }
}
