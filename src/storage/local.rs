use super::{FileInfo, FileMeta, Storage};
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use tokio::fs;
use uuid::Uuid;
use walkdir::WalkDir;

/// 写入过程中的临时文件后缀，列目录时跳过
const TEMP_SUFFIX: &str = ".gridsync.tmp";

/// 本地文件系统存储
pub struct LocalStorage {
    base_path: PathBuf,
    root: String,
    name: String,
}

impl LocalStorage {
    /// 打开已存在的本地目录，根目录不存在时报错（同步不会替用户创建根目录）
    pub fn new(path: &str) -> Result<Self> {
        let base_path = PathBuf::from(path);
        if !base_path.is_dir() {
            return Err(anyhow::anyhow!("Local root is not a directory: {}", path));
        }
        let root = Self::normalize_path(path.trim_end_matches(['/', '\\']));
        let name = format!("local:{}", path);
        Ok(Self {
            base_path,
            root,
            name,
        })
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = path.trim_start_matches('/').trim_start_matches('\\');
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }

    /// 规范化路径分隔符（统一使用 /）
    fn normalize_path(path: &str) -> String {
        path.replace('\\', "/")
    }

    fn modified_secs(metadata: &std::fs::Metadata) -> Option<i64> {
        metadata
            .modified()
            .ok()?
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs() as i64)
    }

    fn list_blocking(base: &Path, base_path: &Path) -> Vec<FileInfo> {
        WalkDir::new(base)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter_map(|entry| {
                let metadata = entry.metadata().ok()?;
                let relative_path = entry.path().strip_prefix(base_path).ok()?.to_str()?.to_string();

                // 跳过根目录本身和未完成的写入
                if relative_path.is_empty() || relative_path.ends_with(TEMP_SUFFIX) {
                    return None;
                }

                Some(FileInfo {
                    path: Self::normalize_path(&relative_path),
                    size: if metadata.is_dir() { 0 } else { metadata.len() },
                    modified_time: Self::modified_secs(&metadata),
                    is_dir: metadata.is_dir(),
                    checksum: None,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn list_files(&self, prefix: Option<&str>) -> Result<Vec<FileInfo>> {
        if !self.base_path.is_dir() {
            return Err(anyhow::anyhow!("Local root is gone: {}", self.root));
        }

        let base = prefix.map_or_else(|| self.base_path.clone(), |p| self.resolve_path(p));
        if !base.exists() {
            return Ok(Vec::new());
        }

        let base_path = self.base_path.clone();
        // 使用 spawn_blocking 避免阻塞 async runtime
        let mut files =
            tokio::task::spawn_blocking(move || Self::list_blocking(&base, &base_path)).await?;
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    async fn stat(&self, path: &str) -> Result<Option<FileMeta>> {
        match fs::metadata(self.resolve_path(path)).await {
            Ok(metadata) => Ok(Some(FileMeta {
                size: if metadata.is_dir() { 0 } else { metadata.len() },
                modified_time: Self::modified_secs(&metadata),
                is_dir: metadata.is_dir(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.resolve_path(path)).await?)
    }

    async fn write(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let full_path = self.resolve_path(path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // 先写临时文件再原子重命名；临时名带完整文件名和随机串，同目录并发写入互不覆盖
        let file_name = full_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid file path: {}", path))?;
        let temp_name = format!("{}.{}{}", file_name, Uuid::new_v4().simple(), TEMP_SUFFIX);
        let temp_path = full_path.with_file_name(temp_name);

        let written = match fs::write(&temp_path, data).await {
            Ok(()) => fs::rename(&temp_path, &full_path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        Ok(())
    }

    async fn set_modified_time(&self, path: &str, modified_time: i64) -> Result<()> {
        let full_path = self.resolve_path(path);
        let mtime = UNIX_EPOCH + Duration::from_secs(modified_time.max(0) as u64);

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let file = std::fs::OpenOptions::new().write(true).open(&full_path)?;
            file.set_modified(mtime)
        })
        .await??;

        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.resolve_path(path);

        match fs::metadata(&full_path).await {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&full_path).await?,
            Ok(_) => fs::remove_file(&full_path).await?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }

    async fn create_dir(&self, path: &str) -> Result<()> {
        fs::create_dir_all(self.resolve_path(path)).await?;
        Ok(())
    }

    fn root(&self) -> &str {
        &self.root
    }

    fn name(&self) -> &str {
        &self.name
    }
}
