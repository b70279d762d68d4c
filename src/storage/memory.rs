//! 内存存储
//!
//! 模拟远端集合树（collection tree），数据只存在于内存中，可在测试和演示中代替真实的网格存储。

use super::{FileInfo, FileMeta, Storage};
use crate::error::SyncError;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::RwLock;

/// 注入到某个路径上的故障
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// 接下来 n 次访问失败，之后恢复正常
    Transient(usize),
    /// 每次访问都失败
    Permanent,
    /// 访问该路径时会话断开
    Disconnect,
}

#[derive(Debug, Clone)]
enum MemEntry {
    Collection { modified_time: Option<i64> },
    Object { data: Vec<u8>, modified_time: Option<i64> },
}

/// 内存中的集合树
#[derive(Debug)]
pub struct MemoryStorage {
    root: String,
    name: String,
    entries: RwLock<BTreeMap<String, MemEntry>>,
    faults: Mutex<HashMap<String, Fault>>,
    disconnected: AtomicBool,
}

impl MemoryStorage {
    pub fn new(root: &str) -> Self {
        let root = root.trim_end_matches('/').to_string();
        Self {
            name: format!("memory:{}", root),
            root,
            entries: RwLock::new(BTreeMap::new()),
            faults: Mutex::new(HashMap::new()),
            disconnected: AtomicBool::new(false),
        }
    }

    /// 让某个路径的读写/删除失败
    pub fn inject_fault(&self, path: &str, fault: Fault) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.insert(Self::normalize(path), fault);
        }
    }

    /// 模拟会话断开：之后的所有操作都返回连接错误
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    fn check_connection(&self) -> Result<()> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(anyhow::Error::new(SyncError::ConnectionFatal(format!(
                "session to {} is no longer valid",
                self.root
            ))));
        }
        Ok(())
    }

    /// 检查连接和注入的故障
    fn check(&self, path: &str) -> Result<()> {
        self.check_connection()?;

        let path = Self::normalize(path);
        let Ok(mut faults) = self.faults.lock() else {
            return Ok(());
        };
        match faults.get(&path).copied() {
            Some(Fault::Disconnect) => {
                faults.remove(&path);
                self.disconnected.store(true, Ordering::SeqCst);
                Err(anyhow::Error::new(SyncError::ConnectionFatal(format!(
                    "session to {} dropped while accessing {}",
                    self.root, path
                ))))
            }
            Some(Fault::Permanent) => Err(anyhow::anyhow!("Injected failure at {}", path)),
            Some(Fault::Transient(remaining)) => {
                if remaining <= 1 {
                    faults.remove(&path);
                } else {
                    faults.insert(path.clone(), Fault::Transient(remaining - 1));
                }
                Err(anyhow::anyhow!("Injected transient failure at {}", path))
            }
            None => Ok(()),
        }
    }

    fn normalize(path: &str) -> String {
        path.trim_matches('/').to_string()
    }

    /// 路径的所有父集合（不含自身）
    fn parents(path: &str) -> Vec<String> {
        let mut parents = Vec::new();
        let mut current = path;
        while let Some(pos) = current.rfind('/') {
            current = &current[..pos];
            parents.push(current.to_string());
        }
        parents
    }

    /// 直接放入一个数据对象（用于准备测试数据）
    pub async fn put_object(&self, path: &str, data: &[u8], modified_time: Option<i64>) {
        let path = Self::normalize(path);
        let mut entries = self.entries.write().await;
        for parent in Self::parents(&path) {
            entries
                .entry(parent)
                .or_insert(MemEntry::Collection { modified_time });
        }
        entries.insert(
            path,
            MemEntry::Object {
                data: data.to_vec(),
                modified_time,
            },
        );
    }

    /// 对象数量（不含集合）
    pub async fn object_count(&self) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| matches!(e, MemEntry::Object { .. }))
            .count()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn list_files(&self, prefix: Option<&str>) -> Result<Vec<FileInfo>> {
        self.check_connection()?;
        let prefix = prefix.map(Self::normalize).unwrap_or_default();
        let entries = self.entries.read().await;

        Ok(entries
            .iter()
            .filter(|(path, _)| {
                prefix.is_empty() || *path == &prefix || path.starts_with(&format!("{}/", prefix))
            })
            .map(|(path, entry)| match entry {
                MemEntry::Collection { modified_time } => FileInfo {
                    path: path.clone(),
                    size: 0,
                    modified_time: *modified_time,
                    is_dir: true,
                    checksum: None,
                },
                MemEntry::Object {
                    data,
                    modified_time,
                } => FileInfo {
                    path: path.clone(),
                    size: data.len() as u64,
                    modified_time: *modified_time,
                    is_dir: false,
                    checksum: None,
                },
            })
            .collect())
    }

    async fn stat(&self, path: &str) -> Result<Option<FileMeta>> {
        self.check_connection()?;
        let entries = self.entries.read().await;
        Ok(entries.get(&Self::normalize(path)).map(|entry| match entry {
            MemEntry::Collection { modified_time } => FileMeta {
                size: 0,
                modified_time: *modified_time,
                is_dir: true,
            },
            MemEntry::Object {
                data,
                modified_time,
            } => FileMeta {
                size: data.len() as u64,
                modified_time: *modified_time,
                is_dir: false,
            },
        }))
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.check(path)?;
        let entries = self.entries.read().await;
        match entries.get(&Self::normalize(path)) {
            Some(MemEntry::Object { data, .. }) => Ok(data.clone()),
            Some(MemEntry::Collection { .. }) => {
                Err(anyhow::anyhow!("Cannot read a collection: {}", path))
            }
            None => Err(anyhow::anyhow!("Object not found: {}", path)),
        }
    }

    async fn write(&self, path: &str, data: Vec<u8>) -> Result<()> {
        self.check(path)?;
        let now = Some(chrono::Utc::now().timestamp());
        let path = Self::normalize(path);
        let mut entries = self.entries.write().await;

        if let Some(MemEntry::Collection { .. }) = entries.get(&path) {
            return Err(anyhow::anyhow!("A collection exists at {}", path));
        }
        for parent in Self::parents(&path) {
            entries
                .entry(parent)
                .or_insert(MemEntry::Collection { modified_time: now });
        }
        entries.insert(
            path,
            MemEntry::Object {
                data,
                modified_time: now,
            },
        );
        Ok(())
    }

    async fn set_modified_time(&self, path: &str, modified_time: i64) -> Result<()> {
        self.check_connection()?;
        let mut entries = self.entries.write().await;
        match entries.get_mut(&Self::normalize(path)) {
            Some(MemEntry::Object {
                modified_time: t, ..
            })
            | Some(MemEntry::Collection { modified_time: t }) => {
                *t = Some(modified_time);
                Ok(())
            }
            None => Err(anyhow::anyhow!("Object not found: {}", path)),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.check(path)?;
        let path = Self::normalize(path);
        let child_prefix = format!("{}/", path);
        let mut entries = self.entries.write().await;
        entries.retain(|p, _| p != &path && !p.starts_with(&child_prefix));
        Ok(())
    }

    async fn create_dir(&self, path: &str) -> Result<()> {
        self.check(path)?;
        let now = Some(chrono::Utc::now().timestamp());
        let path = Self::normalize(path);
        if path.is_empty() {
            return Ok(());
        }

        let mut entries = self.entries.write().await;
        if let Some(MemEntry::Object { .. }) = entries.get(&path) {
            return Err(anyhow::anyhow!("A data object exists at {}", path));
        }
        for parent in Self::parents(&path) {
            entries
                .entry(parent)
                .or_insert(MemEntry::Collection { modified_time: now });
        }
        entries
            .entry(path)
            .or_insert(MemEntry::Collection { modified_time: now });
        Ok(())
    }

    fn root(&self) -> &str {
        &self.root
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_creates_parent_collections() {
        let storage = MemoryStorage::new("/tempZone/home/rods/");
        storage.put_object("a/b/c.txt", b"data", Some(100)).await;

        assert_eq!(storage.root(), "/tempZone/home/rods");
        let files = storage.list_files(None).await.unwrap();
        let paths: Vec<_> = files.iter().map(|f| (f.path.as_str(), f.is_dir)).collect();
        assert_eq!(paths, vec![("a", true), ("a/b", true), ("a/b/c.txt", false)]);
        assert_eq!(storage.object_count().await, 1);
    }

    #[tokio::test]
    async fn test_delete_removes_subtree() {
        let storage = MemoryStorage::new("/zone");
        storage.put_object("a/one", b"1", Some(1)).await;
        storage.put_object("a/two", b"2", Some(1)).await;
        storage.put_object("ab", b"3", Some(1)).await;

        storage.delete("a").await.unwrap();

        let files = storage.list_files(None).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "ab");
    }

    #[tokio::test]
    async fn test_write_then_set_mtime() {
        let storage = MemoryStorage::new("/zone");
        storage.write("x.bin", vec![1, 2, 3]).await.unwrap();
        storage.set_modified_time("x.bin", 42).await.unwrap();

        let meta = storage.stat("x.bin").await.unwrap().unwrap();
        assert_eq!(meta.size, 3);
        assert_eq!(meta.modified_time, Some(42));
        assert_eq!(storage.read("x.bin").await.unwrap(), vec![1, 2, 3]);
        assert!(storage.read("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let storage = MemoryStorage::new("/zone");
        storage.put_object("flaky", b"1", Some(1)).await;
        storage.put_object("broken", b"2", Some(1)).await;
        storage.inject_fault("flaky", Fault::Transient(2));
        storage.inject_fault("broken", Fault::Permanent);

        assert!(storage.read("flaky").await.is_err());
        assert!(storage.read("flaky").await.is_err());
        assert!(storage.read("flaky").await.is_ok());
        for _ in 0..3 {
            assert!(storage.read("broken").await.is_err());
        }
    }

    #[tokio::test]
    async fn test_disconnect_is_connection_fatal() {
        let storage = MemoryStorage::new("/zone");
        storage.put_object("a", b"1", Some(1)).await;
        storage.disconnect();

        let err = storage.read("a").await.unwrap_err();
        assert!(SyncError::from_storage("a", &err).is_fatal());
        assert!(storage.list_files(None).await.is_err());
    }
}
