//! 本地/远端树差异

use crate::account::AccountContext;
use crate::error::{Result, SyncError};
use crate::storage::{calculate_hash, FileInfo, Storage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// 对象类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    /// 目录/集合
    Collection,
    /// 文件/数据对象
    DataObject,
}

/// 某一端的元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideInfo {
    pub object_type: ObjectType,
    /// 修改时间（秒），None 表示没有时间信息
    pub modified_time: Option<i64>,
    pub length: u64,
    pub checksum: Option<String>,
}

impl SideInfo {
    pub fn data_object(modified_time: Option<i64>, length: u64) -> Self {
        Self {
            object_type: ObjectType::DataObject,
            modified_time,
            length,
            checksum: None,
        }
    }

    pub fn collection(modified_time: Option<i64>) -> Self {
        Self {
            object_type: ObjectType::Collection,
            modified_time,
            length: 0,
            checksum: None,
        }
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn is_collection(&self) -> bool {
        self.object_type == ObjectType::Collection
    }
}

impl From<&FileInfo> for SideInfo {
    fn from(file: &FileInfo) -> Self {
        Self {
            object_type: if file.is_dir {
                ObjectType::Collection
            } else {
                ObjectType::DataObject
            },
            modified_time: file.modified_time,
            length: if file.is_dir { 0 } else { file.size },
            checksum: file.checksum.clone(),
        }
    }
}

/// 单个路径的比较结果；至少有一端存在
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffEntry {
    /// 相对于同步根目录的路径
    pub path: String,
    pub local: Option<SideInfo>,
    pub remote: Option<SideInfo>,
}

impl DiffEntry {
    pub fn local_only(path: impl Into<String>, local: SideInfo) -> Self {
        Self {
            path: path.into(),
            local: Some(local),
            remote: None,
        }
    }

    pub fn remote_only(path: impl Into<String>, remote: SideInfo) -> Self {
        Self {
            path: path.into(),
            local: None,
            remote: Some(remote),
        }
    }

    pub fn both(path: impl Into<String>, local: SideInfo, remote: SideInfo) -> Self {
        Self {
            path: path.into(),
            local: Some(local),
            remote: Some(remote),
        }
    }

    /// 对象类型，两端都存在时以本地为准
    pub fn object_type(&self) -> ObjectType {
        self.local
            .as_ref()
            .or(self.remote.as_ref())
            .map(|s| s.object_type)
            .unwrap_or(ObjectType::DataObject)
    }
}

/// 差异生成器
///
/// 返回的条目顺序由实现决定，但对同样的输入必须稳定。
#[async_trait]
pub trait TreeDiffProducer: Send + Sync {
    async fn diff(
        &self,
        local_root: &str,
        remote_root: &str,
        account: &AccountContext,
    ) -> Result<Vec<DiffEntry>>;
}

/// 基于两个 [`Storage`] 列表的差异生成器
///
/// 合并两端的文件列表，按路径排序输出（父目录总是排在子项之前）。
/// 开启 checksum 时，只对两端都存在且大小相同的数据对象读取内容计算 hash。
pub struct StorageTreeDiff {
    local: Arc<dyn Storage>,
    remote: Arc<dyn Storage>,
    include_checksums: bool,
}

impl StorageTreeDiff {
    pub fn new(local: Arc<dyn Storage>, remote: Arc<dyn Storage>) -> Self {
        Self {
            local,
            remote,
            include_checksums: false,
        }
    }

    pub fn with_checksums(mut self, include_checksums: bool) -> Self {
        self.include_checksums = include_checksums;
        self
    }

    fn check_root(storage: &dyn Storage, requested: &str) -> Result<()> {
        let requested = requested.trim_end_matches('/');
        if storage.root() != requested {
            return Err(SyncError::DiffProduction(format!(
                "{} is rooted at {}, not {}",
                storage.name(),
                storage.root(),
                requested
            )));
        }
        Ok(())
    }

    async fn list(storage: &dyn Storage) -> Result<BTreeMap<String, FileInfo>> {
        let files = storage.list_files(None).await.map_err(|e| {
            SyncError::DiffProduction(format!("failed to list {}: {}", storage.name(), e))
        })?;
        Ok(files.into_iter().map(|f| (f.path.clone(), f)).collect())
    }

    async fn checksum(storage: &dyn Storage, path: &str) -> Result<String> {
        let data = storage.read(path).await.map_err(|e| {
            SyncError::DiffProduction(format!("failed to read {} from {}: {}", path, storage.name(), e))
        })?;
        Ok(calculate_hash(&data))
    }
}

#[async_trait]
impl TreeDiffProducer for StorageTreeDiff {
    async fn diff(
        &self,
        local_root: &str,
        remote_root: &str,
        _account: &AccountContext,
    ) -> Result<Vec<DiffEntry>> {
        Self::check_root(self.local.as_ref(), local_root)?;
        Self::check_root(self.remote.as_ref(), remote_root)?;

        info!("开始比较: {} <-> {}", self.local.name(), self.remote.name());

        let local_tree = Self::list(self.local.as_ref()).await?;
        let remote_tree = Self::list(self.remote.as_ref()).await?;

        let mut merged: BTreeMap<&str, (Option<&FileInfo>, Option<&FileInfo>)> = BTreeMap::new();
        for (path, info) in &local_tree {
            merged.entry(path.as_str()).or_default().0 = Some(info);
        }
        for (path, info) in &remote_tree {
            merged.entry(path.as_str()).or_default().1 = Some(info);
        }

        let mut entries = Vec::with_capacity(merged.len());
        let mut hashed = 0usize;

        for (path, (local, remote)) in merged {
            let mut local_side = local.map(SideInfo::from);
            let mut remote_side = remote.map(SideInfo::from);

            if self.include_checksums {
                if let (Some(l), Some(r)) = (local_side.as_mut(), remote_side.as_mut()) {
                    let both_objects = !l.is_collection() && !r.is_collection();
                    if both_objects && l.length == r.length {
                        if l.checksum.is_none() {
                            l.checksum = Some(Self::checksum(self.local.as_ref(), path).await?);
                        }
                        if r.checksum.is_none() {
                            r.checksum = Some(Self::checksum(self.remote.as_ref(), path).await?);
                        }
                        hashed += 1;
                    }
                }
            }

            entries.push(DiffEntry {
                path: path.to_string(),
                local: local_side,
                remote: remote_side,
            });
        }

        debug!(
            "比较完成: 本地 {} 项, 远端 {} 项, 合并 {} 项, 计算 hash {} 项",
            local_tree.len(),
            remote_tree.len(),
            entries.len(),
            hashed
        );

        Ok(entries)
    }
}
