//! 传输控制块 - 监督方与传输循环之间唯一的共享可变状态

use regex::Regex;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

const PAUSED: u8 = 0b01;
const CANCELLED: u8 = 0b10;
const TOTAL_UNSET: usize = usize::MAX;

/// 暂停/取消标志的一致快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlFlags {
    pub paused: bool,
    pub cancelled: bool,
}

/// 传输控制块
///
/// 暂停和取消标志打包在同一个原子字节里，一次读取即可得到两者的一致视图。
/// `files_transferred_so_far` 只应由执行传输的循环递增。
#[derive(Debug)]
pub struct TransferControlBlock {
    flags: AtomicU8,
    total_files_to_transfer: AtomicUsize,
    files_transferred_so_far: AtomicUsize,
    bytes_transferred_so_far: AtomicU64,
    error_count: AtomicUsize,
    /// 累计失败达到该值后自动取消，0 表示不限制
    max_errors_before_cancel: usize,
    filter: TransferFilter,
    resumed: Notify,
}

impl TransferControlBlock {
    pub fn new() -> Self {
        Self::with_options(0, TransferFilter::default())
    }

    pub fn with_options(max_errors_before_cancel: usize, filter: TransferFilter) -> Self {
        Self {
            flags: AtomicU8::new(0),
            total_files_to_transfer: AtomicUsize::new(TOTAL_UNSET),
            files_transferred_so_far: AtomicUsize::new(0),
            bytes_transferred_so_far: AtomicU64::new(0),
            error_count: AtomicUsize::new(0),
            max_errors_before_cancel,
            filter,
            resumed: Notify::new(),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.flags.load(Ordering::SeqCst) & PAUSED != 0
    }

    pub fn set_paused(&self, paused: bool) {
        if paused {
            self.flags.fetch_or(PAUSED, Ordering::SeqCst);
            debug!("传输已暂停");
        } else {
            self.flags.fetch_and(!PAUSED, Ordering::SeqCst);
            debug!("传输已恢复");
            self.resumed.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flags.load(Ordering::SeqCst) & CANCELLED != 0
    }

    /// 设置取消标志；一旦取消，本次运行内不能再撤销
    pub fn set_cancelled(&self, cancelled: bool) {
        if cancelled {
            let previous = self.flags.fetch_or(CANCELLED, Ordering::SeqCst);
            if previous & CANCELLED == 0 {
                info!("传输已取消");
            }
            // 唤醒暂停中的等待者，让其尽快观察到取消
            self.resumed.notify_waiters();
        } else if self.is_cancelled() {
            warn!("忽略撤销取消的请求：取消在本次运行内不可逆");
        }
    }

    /// 一次原子读取两个标志
    pub fn snapshot(&self) -> ControlFlags {
        let flags = self.flags.load(Ordering::SeqCst);
        ControlFlags {
            paused: flags & PAUSED != 0,
            cancelled: flags & CANCELLED != 0,
        }
    }

    /// 设置预计传输的文件总数，只有第一次设置生效
    pub fn set_total_files_to_transfer(&self, total: usize) -> bool {
        self.total_files_to_transfer
            .compare_exchange(TOTAL_UNSET, total, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn total_files_to_transfer(&self) -> Option<usize> {
        match self.total_files_to_transfer.load(Ordering::SeqCst) {
            TOTAL_UNSET => None,
            total => Some(total),
        }
    }

    /// 已完成文件数加一，返回新值
    pub fn increment_files_transferred(&self) -> usize {
        self.files_transferred_so_far.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn files_transferred_so_far(&self) -> usize {
        self.files_transferred_so_far.load(Ordering::SeqCst)
    }

    pub fn add_bytes_transferred(&self, bytes: u64) -> u64 {
        self.bytes_transferred_so_far.fetch_add(bytes, Ordering::SeqCst) + bytes
    }

    pub fn bytes_transferred_so_far(&self) -> u64 {
        self.bytes_transferred_so_far.load(Ordering::SeqCst)
    }

    /// 失败数加一；达到阈值时自动取消
    pub fn increment_error_count(&self) -> usize {
        let count = self.error_count.fetch_add(1, Ordering::SeqCst) + 1;
        if self.max_errors_before_cancel > 0 && count >= self.max_errors_before_cancel {
            if !self.is_cancelled() {
                warn!(
                    "失败文件数达到上限 ({}/{})，取消传输",
                    count, self.max_errors_before_cancel
                );
            }
            self.set_cancelled(true);
        }
        count
    }

    pub fn error_count(&self) -> usize {
        self.error_count.load(Ordering::SeqCst)
    }

    pub fn max_errors_before_cancel(&self) -> usize {
        self.max_errors_before_cancel
    }

    pub fn filter(&self) -> &TransferFilter {
        &self.filter
    }

    /// 暂停期间等待恢复或取消
    ///
    /// 优先由 `set_paused(false)`/`set_cancelled(true)` 唤醒，`poll` 为兜底的最长等待间隔。
    /// 返回 `true` 表示可以继续，`false` 表示已取消。
    pub async fn wait_while_paused(&self, poll: Duration) -> bool {
        loop {
            // 先注册通知再检查标志，避免错过两次检查之间的唤醒
            let notified = self.resumed.notified();
            let flags = self.snapshot();
            if flags.cancelled {
                return false;
            }
            if !flags.paused {
                return true;
            }
            let _ = tokio::time::timeout(poll, notified).await;
        }
    }
}

impl Default for TransferControlBlock {
    fn default() -> Self {
        Self::new()
    }
}

/// 路径过滤器（glob 排除规则）
#[derive(Debug, Clone, Default)]
pub struct TransferFilter {
    excludes: Vec<Regex>,
}

impl TransferFilter {
    /// 编译排除规则；无法编译的规则会被记录并忽略
    pub fn new(patterns: &[String]) -> Self {
        let excludes = patterns
            .iter()
            .filter_map(|pattern| match Self::compile(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("忽略无效的排除规则 {}: {}", pattern, e);
                    None
                }
            })
            .collect();
        Self { excludes }
    }

    /// 将 glob 转成正则：`**` 跨目录，`*` 不跨目录，`?` 匹配单个字符
    fn compile(pattern: &str) -> Result<Regex, regex::Error> {
        let pattern = pattern.trim_start_matches('/');
        let mut re = String::from("(?i)(^|.*/)");
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' if chars.peek() == Some(&'*') => {
                    chars.next();
                    // "**/" 也匹配零层目录
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        re.push_str("(.*/)?");
                    } else {
                        re.push_str(".*");
                    }
                }
                '*' => re.push_str("[^/]*"),
                '?' => re.push_str("[^/]"),
                c => re.push_str(&regex::escape(&c.to_string())),
            }
        }
        // 匹配目录时同时排除其下所有内容
        re.push_str("(/.*)?$");
        Regex::new(&re)
    }

    pub fn is_empty(&self) -> bool {
        self.excludes.is_empty()
    }

    /// 路径是否被排除
    pub fn is_excluded(&self, path: &str) -> bool {
        let path = path.trim_start_matches('/');
        self.excludes.iter().any(|re| re.is_match(path))
    }
}
