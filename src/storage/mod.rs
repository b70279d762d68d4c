pub mod local;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use local::LocalStorage;
pub use memory::{Fault, MemoryStorage};

/// 文件信息（相对于存储根目录）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    /// 修改时间（秒），None 表示存储端没有提供
    pub modified_time: Option<i64>,
    pub is_dir: bool,
    pub checksum: Option<String>,
}

/// 文件元数据（用于快速检查）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub size: u64,
    pub modified_time: Option<i64>,
    pub is_dir: bool,
}

/// 存储抽象接口
///
/// 所有路径都是相对于 [`Storage::root`] 的相对路径，使用 `/` 分隔。
#[async_trait]
pub trait Storage: Send + Sync {
    /// 递归列出所有文件和目录
    async fn list_files(&self, prefix: Option<&str>) -> Result<Vec<FileInfo>>;

    /// 获取文件元数据
    async fn stat(&self, path: &str) -> Result<Option<FileMeta>>;

    /// 读取整个文件
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// 写入整个文件（自动创建父目录）
    async fn write(&self, path: &str, data: Vec<u8>) -> Result<()>;

    /// 设置修改时间，传输后保持两端时间一致
    async fn set_modified_time(&self, path: &str, modified_time: i64) -> Result<()>;

    /// 删除文件或目录
    async fn delete(&self, path: &str) -> Result<()>;

    /// 检查文件是否存在
    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.stat(path).await?.is_some())
    }

    /// 创建目录
    async fn create_dir(&self, path: &str) -> Result<()>;

    /// 根路径（绝对路径）
    fn root(&self) -> &str;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 拼接根路径和相对路径
pub fn join_path(root: &str, relative: &str) -> String {
    let root = root.trim_end_matches('/');
    let relative = relative.trim_start_matches('/');
    if relative.is_empty() {
        root.to_string()
    } else {
        format!("{}/{}", root, relative)
    }
}

/// 计算文件内容的 hash（BLAKE3，取前 32 个十六进制字符）
pub fn calculate_hash(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    hash.to_hex()[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/tempZone/home/rods", "a/b.txt"), "/tempZone/home/rods/a/b.txt");
        assert_eq!(join_path("/data/", "/b.txt"), "/data/b.txt");
        assert_eq!(join_path("/data", ""), "/data");
    }

    #[test]
    fn test_calculate_hash() {
        let h1 = calculate_hash(b"hello");
        let h2 = calculate_hash(b"hello");
        let h3 = calculate_hash(b"hello!");

        assert_eq!(h1.len(), 32);
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
    }
}
