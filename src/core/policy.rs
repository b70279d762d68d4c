//! 差异调和策略 - 把一个差异条目归类为一种同步操作

use super::diff::{DiffEntry, SideInfo};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// 同步决策类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Upload,
    Download,
    DeleteLocal,
    DeleteRemote,
    /// 两端一致
    SkipUnchanged,
    /// 无法判断方向，需要人工处理
    SkipConflict,
}

impl DecisionKind {
    pub fn is_skip(&self) -> bool {
        matches!(self, DecisionKind::SkipUnchanged | DecisionKind::SkipConflict)
    }
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionKind::Upload => write!(f, "upload"),
            DecisionKind::Download => write!(f, "download"),
            DecisionKind::DeleteLocal => write!(f, "delete_local"),
            DecisionKind::DeleteRemote => write!(f, "delete_remote"),
            DecisionKind::SkipUnchanged => write!(f, "skip_unchanged"),
            DecisionKind::SkipConflict => write!(f, "skip_conflict"),
        }
    }
}

/// 同步决策，附带来源条目和原因（用于日志/审计）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub kind: DecisionKind,
    pub entry: DiffEntry,
    pub rationale: String,
}

impl Decision {
    fn new(kind: DecisionKind, entry: &DiffEntry, rationale: impl Into<String>) -> Self {
        Self {
            kind,
            entry: entry.clone(),
            rationale: rationale.into(),
        }
    }
}

/// 同步水位线：早于水位线的修改不参与判断，0 表示关闭
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Watermarks {
    pub since_local: i64,
    pub since_remote: i64,
}

impl Watermarks {
    pub fn new(since_local: i64, since_remote: i64) -> Self {
        Self {
            since_local,
            since_remote,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }
}

/// 差异调和策略
///
/// 纯函数：同样的条目和水位线总是得到同样的决策。
#[derive(Debug, Clone, Default)]
pub struct ReconciliationPolicy {
    watermarks: Watermarks,
    delete_on_sync: bool,
    /// 时间容差（秒）
    time_tolerance_seconds: i64,
}

impl ReconciliationPolicy {
    pub fn new(watermarks: Watermarks, delete_on_sync: bool) -> Self {
        Self {
            watermarks,
            delete_on_sync,
            time_tolerance_seconds: 0,
        }
    }

    pub fn with_time_tolerance(mut self, seconds: i64) -> Self {
        self.time_tolerance_seconds = seconds.max(0);
        self
    }

    pub fn watermarks(&self) -> Watermarks {
        self.watermarks
    }

    pub fn delete_on_sync(&self) -> bool {
        self.delete_on_sync
    }

    /// 修改时间晚于水位线（水位线为 0 时总是成立）
    fn after_watermark(time: i64, since: i64) -> bool {
        since == 0 || time > since
    }

    /// 比较两个修改时间，容差内视为相同
    fn compare_times(&self, local: i64, remote: i64) -> Ordering {
        // abs_diff 不会溢出，时间戳可以是任意 i64
        if local.abs_diff(remote) <= self.time_tolerance_seconds.unsigned_abs() {
            Ordering::Equal
        } else {
            local.cmp(&remote)
        }
    }

    /// 对一个差异条目做出决策
    pub fn classify(&self, entry: &DiffEntry) -> Decision {
        match (&entry.local, &entry.remote) {
            (Some(local), None) => self.classify_one_sided(entry, local, true),
            (None, Some(remote)) => self.classify_one_sided(entry, remote, false),
            (Some(local), Some(remote)) => self.classify_both(entry, local, remote),
            (None, None) => Decision::new(
                DecisionKind::SkipUnchanged,
                entry,
                "absent on both sides",
            ),
        }
    }

    /// 只有一端存在：默认传输；只有在开启删除同步且能确认另一端是被删除时才删除
    fn classify_one_sided(&self, entry: &DiffEntry, side: &SideInfo, is_local: bool) -> Decision {
        let (since, transfer, delete, here, there) = if is_local {
            (
                self.watermarks.since_local,
                DecisionKind::Upload,
                DecisionKind::DeleteLocal,
                "local",
                "remote",
            )
        } else {
            (
                self.watermarks.since_remote,
                DecisionKind::Download,
                DecisionKind::DeleteRemote,
                "remote",
                "local",
            )
        };

        if self.delete_on_sync && since != 0 {
            // 在上次同步之前就已存在于这一端，说明另一端是被删掉的
            if let Some(time) = side.modified_time {
                if time <= since {
                    return Decision::new(
                        delete,
                        entry,
                        format!(
                            "exists only on {} and unchanged since last sync ({} <= {}); removed on {}",
                            here, time, since, there
                        ),
                    );
                }
            }
        }

        Decision::new(transfer, entry, format!("exists only on {}", here))
    }

    fn classify_both(&self, entry: &DiffEntry, local: &SideInfo, remote: &SideInfo) -> Decision {
        let Watermarks {
            since_local,
            since_remote,
        } = self.watermarks;

        if local.is_collection() && remote.is_collection() {
            return Decision::new(DecisionKind::SkipUnchanged, entry, "collection exists on both sides");
        }
        if local.is_collection() != remote.is_collection() {
            return Decision::new(
                DecisionKind::SkipConflict,
                entry,
                "collection on one side, data object on the other",
            );
        }

        // 缺少时间信息的一端视为最旧，由有时间信息的一端覆盖
        let (l, r) = match (local.modified_time, remote.modified_time) {
            (Some(l), Some(r)) => (l, r),
            (Some(_), None) => {
                return Decision::new(DecisionKind::Upload, entry, "remote has no modification time")
            }
            (None, Some(_)) => {
                return Decision::new(DecisionKind::Download, entry, "local has no modification time")
            }
            (None, None) => return self.classify_by_content(entry, local, remote, false),
        };

        match self.compare_times(l, r) {
            Ordering::Greater if Self::after_watermark(l, since_local) => {
                return Decision::new(
                    DecisionKind::Upload,
                    entry,
                    format!("local is newer ({} > {})", l, r),
                );
            }
            Ordering::Less if Self::after_watermark(r, since_remote) => {
                return Decision::new(
                    DecisionKind::Download,
                    entry,
                    format!("remote is newer ({} > {})", r, l),
                );
            }
            _ => {}
        }

        let both_changed = since_local != 0 && since_remote != 0 && l > since_local && r > since_remote;
        self.classify_by_content(entry, local, remote, both_changed)
    }

    /// 时间无法给出方向时，按内容判断一致还是冲突
    fn classify_by_content(
        &self,
        entry: &DiffEntry,
        local: &SideInfo,
        remote: &SideInfo,
        both_changed: bool,
    ) -> Decision {
        if local.length != remote.length {
            return Decision::new(
                DecisionKind::SkipConflict,
                entry,
                format!(
                    "lengths differ ({} vs {}) without a clear newer side",
                    local.length, remote.length
                ),
            );
        }

        let checksums_equal = match (&local.checksum, &remote.checksum) {
            (Some(a), Some(b)) if a != b => {
                return Decision::new(
                    DecisionKind::SkipConflict,
                    entry,
                    "checksums differ without a clear newer side",
                );
            }
            (Some(_), Some(_)) => true,
            _ => false,
        };

        if both_changed && !checksums_equal {
            return Decision::new(
                DecisionKind::SkipConflict,
                entry,
                "both sides modified since last sync",
            );
        }

        Decision::new(
            DecisionKind::SkipUnchanged,
            entry,
            if checksums_equal {
                "checksums match"
            } else {
                "lengths and timestamps match"
            },
        )
    }
}

/// 决策统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionSummary {
    pub upload_count: usize,
    pub download_count: usize,
    pub delete_local_count: usize,
    pub delete_remote_count: usize,
    pub skip_unchanged_count: usize,
    pub conflict_count: usize,
    /// 被过滤规则排除的条目
    pub filtered_count: usize,
    /// 需要传输的字节数
    pub upload_bytes: u64,
    pub download_bytes: u64,
}

impl DecisionSummary {
    pub fn record(&mut self, decision: &Decision) {
        let entry = &decision.entry;
        match decision.kind {
            DecisionKind::Upload => {
                self.upload_count += 1;
                self.upload_bytes += entry.local.as_ref().map_or(0, |s| s.length);
            }
            DecisionKind::Download => {
                self.download_count += 1;
                self.download_bytes += entry.remote.as_ref().map_or(0, |s| s.length);
            }
            DecisionKind::DeleteLocal => self.delete_local_count += 1,
            DecisionKind::DeleteRemote => self.delete_remote_count += 1,
            DecisionKind::SkipUnchanged => self.skip_unchanged_count += 1,
            DecisionKind::SkipConflict => self.conflict_count += 1,
        }
    }

    /// 统计一组决策
    pub fn summarize(decisions: &[Decision]) -> Self {
        let mut summary = Self::default();
        for decision in decisions {
            summary.record(decision);
        }
        summary
    }

    /// 需要提交给执行器的操作数
    pub fn operation_count(&self) -> usize {
        self.upload_count + self.download_count + self.delete_local_count + self.delete_remote_count
    }

    pub fn delete_count(&self) -> usize {
        self.delete_local_count + self.delete_remote_count
    }

    pub fn total_transfer_bytes(&self) -> u64 {
        self.upload_bytes + self.download_bytes
    }
}
