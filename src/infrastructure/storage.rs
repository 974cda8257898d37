// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::settings::StorageSettings;
use crate::domain::models::task::TaskStatus;
use crate::domain::models::task_record::{TaskData, TaskIndex, TaskMeta, INDEX_VERSION};
use crate::domain::repositories::task_store::{StorageError, TaskStore};

const TASKS_DIR: &str = "tasks";
const BACKUP_DIR: &str = ".backup";
const INDEX_FILE: &str = "tasks.json";
const LOCK_FILE: &str = ".lock";
const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S%.6f";

/// 数据目录独占锁，drop 时释放
pub struct DataDirLock {
    file: std::fs::File,
}

impl Drop for DataDirLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// 基于本地 JSON 文件的任务存储实现
///
/// 目录结构：
/// - `<data_dir>/tasks/tasks.json`：任务索引
/// - `<data_dir>/tasks/<task_id>.json`：任务完整数据
/// - `<data_dir>/tasks/.backup/`：历史版本备份
///
/// 所有文件访问都经过内部读写锁串行化。
pub struct JsonTaskStore {
    tasks_dir: PathBuf,
    backup_dir: PathBuf,
    backup_retention: usize,
    lock: RwLock<()>,
}

impl JsonTaskStore {
    pub fn new(data_dir: impl AsRef<Path>, backup_retention: usize) -> Self {
        let tasks_dir = data_dir.as_ref().join(TASKS_DIR);
        let backup_dir = tasks_dir.join(BACKUP_DIR);
        Self {
            tasks_dir,
            backup_dir,
            backup_retention,
            lock: RwLock::new(()),
        }
    }

    pub fn from_settings(settings: &StorageSettings) -> Self {
        Self::new(&settings.data_dir, settings.backup_retention)
    }

    pub fn tasks_dir(&self) -> &Path {
        &self.tasks_dir
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// 获取数据目录的进程间独占锁
    ///
    /// 负责写入的进程（服务与抓取）在整个生命周期内持有该锁；
    /// 锁已被其他进程持有时返回 `StorageError::Locked`。
    pub fn lock_data_dir(&self) -> Result<DataDirLock, StorageError> {
        std::fs::create_dir_all(&self.tasks_dir)?;
        let path = self.tasks_dir.join(LOCK_FILE);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                debug!("Acquired data directory lock {}", path.display());
                Ok(DataDirLock { file })
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(StorageError::Locked(path.display().to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn task_path(&self, task_id: &str) -> PathBuf {
        self.tasks_dir.join(TaskMeta::data_file_for(task_id))
    }

    fn index_path(&self) -> PathBuf {
        self.tasks_dir.join(INDEX_FILE)
    }

    /// 原子写入：先写临时文件，备份旧版本，再重命名覆盖
    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let tmp_path = tmp_path_for(path);

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        if fs::try_exists(path).await? {
            if let Err(e) = self.backup_file(path).await {
                warn!("Failed to back up {}: {}", path.display(), e);
            }
        }

        if let Err(e) = fs::rename(&tmp_path, path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(e));
        }

        Ok(())
    }

    /// 将文件当前版本复制到备份目录并执行轮转
    async fn backup_file(&self, path: &Path) -> Result<(), StorageError> {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(());
        };

        let stamp = Utc::now().format(BACKUP_TIMESTAMP_FORMAT).to_string();
        let base = format!("{}.bak.{}", file_name, stamp);
        let mut target = self.backup_dir.join(&base);
        let mut attempt = 1;
        while fs::try_exists(&target).await? {
            target = self.backup_dir.join(format!("{}-{}", base, attempt));
            attempt += 1;
        }

        fs::copy(path, &target).await?;
        debug!("Backed up {} to {}", path.display(), target.display());

        self.rotate_backups(file_name).await
    }

    /// 仅保留最新的 `backup_retention` 个备份
    async fn rotate_backups(&self, file_name: &str) -> Result<(), StorageError> {
        let prefix = format!("{}.bak.", file_name);
        let mut backups: Vec<(SystemTime, String)> = Vec::new();

        let mut entries = fs::read_dir(&self.backup_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(&prefix) {
                continue;
            }
            let modified = entry
                .metadata()
                .await?
                .modified()
                .unwrap_or(SystemTime::UNIX_EPOCH);
            backups.push((modified, name));
        }

        if backups.len() <= self.backup_retention {
            return Ok(());
        }

        // 从新到旧
        backups.sort_by(|a, b| b.cmp(a));
        for (_, name) in backups.into_iter().skip(self.backup_retention) {
            let path = self.backup_dir.join(&name);
            if let Err(e) = fs::remove_file(&path).await {
                warn!("Failed to remove stale backup {}: {}", path.display(), e);
            }
        }

        Ok(())
    }

    async fn read_index_unlocked(&self) -> Result<TaskIndex, StorageError> {
        match fs::read(self.index_path()).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TaskIndex::default()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn write_index_unlocked(&self, index: &TaskIndex) -> Result<(), StorageError> {
        let mut stamped = index.clone();
        stamped.version = INDEX_VERSION.to_string();
        stamped.last_updated = Utc::now();

        let bytes = serde_json::to_vec_pretty(&stamped)?;
        self.write_atomic(&self.index_path(), &bytes).await
    }

    async fn delete_task_unlocked(&self, task_id: &str) -> Result<(), StorageError> {
        let path = self.task_path(task_id);
        if !fs::try_exists(&path).await? {
            return Ok(());
        }

        if let Err(e) = self.backup_file(&path).await {
            warn!(task_id = %task_id, "Failed to back up task before delete: {}", e);
        }

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

fn should_clean(meta: &TaskMeta, before: DateTime<Utc>) -> bool {
    meta.status == TaskStatus::Failed || meta.end_time.is_some_and(|end| end < before)
}

#[async_trait]
impl TaskStore for JsonTaskStore {
    async fn initialize(&self) -> Result<(), StorageError> {
        let _guard = self.lock.write().await;
        fs::create_dir_all(&self.backup_dir).await?;
        info!("Task store initialized at {}", self.tasks_dir.display());
        Ok(())
    }

    async fn save_task(&self, data: &TaskData) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(data)?;
        let _guard = self.lock.write().await;
        self.write_atomic(&self.task_path(&data.meta.task_id), &bytes)
            .await
    }

    async fn load_task(&self, task_id: &str) -> Result<TaskData, StorageError> {
        let _guard = self.lock.read().await;
        match fs::read(self.task_path(task_id)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(task_id.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn delete_task(&self, task_id: &str) -> Result<(), StorageError> {
        let _guard = self.lock.write().await;
        self.delete_task_unlocked(task_id).await
    }

    async fn save_index(&self, index: &TaskIndex) -> Result<(), StorageError> {
        let _guard = self.lock.write().await;
        self.write_index_unlocked(index).await
    }

    async fn load_index(&self) -> Result<TaskIndex, StorageError> {
        let _guard = self.lock.read().await;
        self.read_index_unlocked().await
    }

    async fn list_tasks(&self) -> Result<Vec<TaskMeta>, StorageError> {
        Ok(self.load_index().await?.tasks)
    }

    async fn clean_old_tasks(&self, before: DateTime<Utc>) -> Result<usize, StorageError> {
        let _guard = self.lock.write().await;
        let mut index = self.read_index_unlocked().await?;

        let (expired, kept): (Vec<TaskMeta>, Vec<TaskMeta>) = index
            .tasks
            .into_iter()
            .partition(|meta| should_clean(meta, before));

        for meta in &expired {
            if let Err(e) = self.delete_task_unlocked(&meta.task_id).await {
                warn!(task_id = %meta.task_id, "Failed to delete old task: {}", e);
            }
        }

        index.tasks = kept;
        self.write_index_unlocked(&index).await?;

        if !expired.is_empty() {
            info!("Cleaned {} old tasks from store", expired.len());
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
pub use in_memory::InMemoryTaskStore;


#[cfg(test)]
#[path = "storage_test.rs"]
mod tests;
