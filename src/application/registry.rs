// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use validator::Validate;

use crate::application::dto::create_task_request::CreateTaskRequestDto;
use crate::config::settings::ScrapeSettings;
use crate::domain::models::comment::{filter_comments, sort_comments, CommentEntry, CommentSort};
use crate::domain::models::task::{ScrapeTask, TaskStatus};
use crate::domain::models::task_record::{TaskData, TaskIndex, TaskMeta};
use crate::domain::repositories::task_store::{StorageError, TaskStore};
use crate::engines::traits::CommentSource;
use crate::utils::errors::ServiceError;
use crate::workers::scrape_worker::ScrapeExecutor;

/// 重启时被中断任务的错误信息
pub const RESTART_ERROR: &str = "task interrupted by restart";

/// 爬取执行参数
#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    /// 每页评论数
    pub page_size: u32,
    /// 每条评论最多抓取的子评论数
    pub max_replies: u32,
    /// 抓取子评论前的等待时间
    pub reply_delay: Duration,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            page_size: 20,
            max_replies: 3,
            reply_delay: Duration::from_millis(200),
        }
    }
}

impl From<&ScrapeSettings> for ScrapeOptions {
    fn from(settings: &ScrapeSettings) -> Self {
        Self {
            page_size: settings.page_size,
            max_replies: settings.max_replies,
            reply_delay: Duration::from_millis(settings.reply_delay_ms),
        }
    }
}

/// 执行器上报的任务结局
///
/// 失败与取消携带中断前已抓取的评论，随终态一起持久化。
#[derive(Debug)]
pub enum TaskOutcome {
    Completed(Vec<CommentEntry>),
    Failed {
        error: String,
        partial: Vec<CommentEntry>,
    },
    Cancelled {
        reason: String,
        partial: Vec<CommentEntry>,
    },
}

impl TaskOutcome {
    pub fn failed(error: impl Into<String>, partial: Vec<CommentEntry>) -> Self {
        Self::Failed {
            error: error.into(),
            partial,
        }
    }

    pub fn cancelled(reason: impl Into<String>, partial: Vec<CommentEntry>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
            partial,
        }
    }
}

/// 结果查询
#[derive(Debug, Clone, Default)]
pub struct ResultQuery {
    /// 排序方式：time_asc / time_desc / like_asc / like_desc，留空不排序
    pub sort: String,
    /// 关键词（大小写不敏感，匹配内容或作者名）
    pub keyword: String,
    /// 最多返回条数，0 表示不限制
    pub limit: usize,
}

/// 任务注册表
///
/// 持有全部已知任务的内存映射，是读写任务状态的唯一入口。
/// 映射锁从不跨越 `.await` 持有；评论正文的懒加载在锁外读取存储，
/// 回写时再次检查。
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, ScrapeTask>>,
    dirty: Mutex<HashSet<String>>,
    store: Arc<dyn TaskStore>,
    source: Arc<dyn CommentSource>,
    options: ScrapeOptions,
    shutdown: CancellationToken,
    executors: TaskTracker,
    accepting: AtomicBool,
    // 串行化索引的读-改-写
    index_lock: tokio::sync::Mutex<()>,
}

impl TaskRegistry {
    pub fn new(
        store: Arc<dyn TaskStore>,
        source: Arc<dyn CommentSource>,
        options: ScrapeOptions,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            dirty: Mutex::new(HashSet::new()),
            store,
            source,
            options,
            shutdown,
            executors: TaskTracker::new(),
            accepting: AtomicBool::new(true),
            index_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        self.store.clone()
    }

    /// 创建爬取任务并启动执行器
    ///
    /// # 参数
    ///
    /// * `request` - 创建请求
    ///
    /// # 返回值
    ///
    /// * `Ok(String)` - 新任务ID，执行器已在后台运行
    /// * `Err(ServiceError)` - 参数校验失败或服务正在关闭
    pub fn create_task(
        self: &Arc<Self>,
        request: CreateTaskRequestDto,
    ) -> Result<String, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        if !self.accepting.load(Ordering::SeqCst) || self.shutdown.is_cancelled() {
            return Err(ServiceError::ShuttingDown);
        }

        let params = request.to_params();
        let task = ScrapeTask::new(request.video_id.clone(), params.clone());
        let task_id = task.task_id.clone();

        self.tasks.write().insert(task_id.clone(), task);
        self.mark_dirty(&task_id);
        counter!("scrape_tasks_total").increment(1);

        info!(
            task_id = %task_id,
            video_id = %request.video_id,
            page_limit = params.page_limit,
            sort_mode = %params.sort_mode,
            auth = %params.auth.kind(),
            "Scrape task created"
        );

        let executor = ScrapeExecutor::new(
            self.clone(),
            self.source.clone(),
            self.options.clone(),
            self.shutdown.clone(),
        );
        self.executors
            .spawn(executor.run(task_id.clone(), request.video_id, params));

        Ok(task_id)
    }

    /// 获取任务快照
    ///
    /// 内存中不存在时从索引构造仅含元数据的记录；已终结且评论未加载时
    /// 从存储懒加载评论正文。
    pub async fn get_task(&self, task_id: &str) -> Result<ScrapeTask, ServiceError> {
        let task = match self.cached(task_id) {
            Some(task) => task,
            None => self.adopt_from_index(task_id).await?,
        };

        if task.needs_rehydration() {
            return self.rehydrate(task).await;
        }
        Ok(task)
    }

    /// 列出全部任务，按开始时间倒序，不含评论正文
    pub fn list_tasks(&self) -> Vec<ScrapeTask> {
        let mut snapshots: Vec<ScrapeTask> = self
            .tasks
            .read()
            .values()
            .map(ScrapeTask::summary)
            .collect();

        snapshots.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        snapshots
    }

    /// 获取已完成任务的评论结果
    ///
    /// # 返回值
    ///
    /// * `Ok((comments, total))` - 筛选、排序、截断后的评论，以及截断前的总数
    /// * `Err(ServiceError)` - 任务不存在、未完成、排序方式无效或加载失败
    pub async fn get_result(
        &self,
        task_id: &str,
        query: &ResultQuery,
    ) -> Result<(Vec<CommentEntry>, usize), ServiceError> {
        let sort = if query.sort.is_empty() {
            None
        } else {
            Some(
                query
                    .sort
                    .parse::<CommentSort>()
                    .map_err(ServiceError::Validation)?,
            )
        };

        let task = match self.cached(task_id) {
            Some(task) => task,
            None => self.adopt_from_index(task_id).await?,
        };

        if task.status != TaskStatus::Completed {
            return Err(ServiceError::TaskNotCompleted(task_id.to_string()));
        }

        let task = if task.needs_rehydration() {
            self.rehydrate(task).await?
        } else {
            task
        };

        let mut comments = filter_comments(task.comments.unwrap_or_default(), &query.keyword);
        let total = comments.len();

        if let Some(sort) = sort {
            sort_comments(&mut comments, sort);
        }
        if query.limit > 0 {
            comments.truncate(query.limit);
        }

        Ok((comments, total))
    }

    /// 标记任务为脏，等待后台刷盘
    pub fn mark_dirty(&self, task_id: &str) {
        self.dirty.lock().insert(task_id.to_string());
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.lock().len()
    }

    /// 启动时的崩溃恢复
    ///
    /// 索引中仍为 running 的任务标记为失败并重新持久化，之后把索引中的
    /// 全部任务以元数据形式载入内存。
    ///
    /// # 返回值
    ///
    /// 被恢复（标记为失败）的任务数量
    pub async fn restore(&self) -> Result<usize, ServiceError> {
        let _index_guard = self.index_lock.lock().await;
        let mut index = self.store.load_index().await?;
        let now = Utc::now();
        let mut recovered = 0;

        for meta in index
            .tasks
            .iter_mut()
            .filter(|meta| meta.status == TaskStatus::Running)
        {
            meta.mark_interrupted(RESTART_ERROR, now);
            recovered += 1;

            match self.store.load_task(&meta.task_id).await {
                Ok(mut data) => {
                    data.meta = meta.clone();
                    if let Err(e) = self.store.save_task(&data).await {
                        warn!(task_id = %meta.task_id, "Failed to persist recovered task: {}", e);
                    }
                }
                Err(StorageError::NotFound(_)) => {
                    debug!(task_id = %meta.task_id, "Recovered task has no data file");
                }
                Err(e) => {
                    warn!(task_id = %meta.task_id, "Failed to load interrupted task: {}", e);
                }
            }
        }

        if recovered > 0 {
            self.store.save_index(&index).await?;
            warn!("Marked {} interrupted tasks as failed", recovered);
        }

        self.adopt_index(&index);
        Ok(recovered)
    }

    /// 只读地载入索引中的全部任务元数据
    ///
    /// 不做崩溃恢复，也不写存储，供不持有数据目录的只读命令使用。
    pub async fn load_existing(&self) -> Result<usize, ServiceError> {
        let index = self.store.load_index().await?;
        self.adopt_index(&index);
        Ok(index.tasks.len())
    }

    fn adopt_index(&self, index: &TaskIndex) {
        let mut tasks = self.tasks.write();
        for meta in &index.tasks {
            tasks
                .entry(meta.task_id.clone())
                .or_insert_with(|| ScrapeTask::from_meta(meta));
        }
        info!("Loaded {} tasks from store", index.tasks.len());
    }

    /// 持久化全部脏任务
    ///
    /// 原子地取出脏集合，逐个保存任务数据，最后整批更新一次索引。
    /// 保存失败的任务重新标记为脏，下次刷盘时重试。
    ///
    /// # 返回值
    ///
    /// 成功保存的任务数量
    pub async fn flush_dirty(&self) -> usize {
        let drained: Vec<String> = std::mem::take(&mut *self.dirty.lock())
            .into_iter()
            .collect();
        if drained.is_empty() {
            return 0;
        }

        let mut saved = Vec::new();
        for task_id in drained {
            let Some(data) = self.snapshot_data(&task_id) else {
                continue;
            };
            let Some(data) = data else {
                // 评论已释放，数据文件是最新的，只需更新索引
                saved.push(task_id);
                continue;
            };

            match self.store.save_task(&data).await {
                Ok(()) => saved.push(task_id),
                Err(e) => {
                    error!(task_id = %task_id, "Failed to persist task: {}", e);
                    counter!("task_flush_failures_total").increment(1);
                    self.mark_dirty(&task_id);
                }
            }
        }

        if saved.is_empty() {
            return 0;
        }

        if let Err(e) = self.save_index().await {
            error!("Failed to update task index: {}", e);
            counter!("task_flush_failures_total").increment(1);
            for task_id in &saved {
                self.mark_dirty(task_id);
            }
            return 0;
        }

        debug!("Flushed {} dirty tasks", saved.len());
        saved.len()
    }

    /// 立即持久化单个任务及索引
    pub async fn persist_task(&self, task_id: &str) -> Result<(), ServiceError> {
        let data = self
            .snapshot_data(task_id)
            .ok_or_else(|| ServiceError::TaskNotFound(task_id.to_string()))?;

        if let Some(data) = data {
            self.store.save_task(&data).await?;
        }
        self.save_index().await
    }

    /// 用内存中的任务元数据更新存储索引
    ///
    /// 存储中存在但内存中没有的条目保持不变。
    pub async fn save_index(&self) -> Result<(), ServiceError> {
        let _index_guard = self.index_lock.lock().await;
        let mut index = self.store.load_index().await?;

        let metas: Vec<TaskMeta> = self.tasks.read().values().map(TaskMeta::from_task).collect();
        for meta in metas {
            index.upsert(meta);
        }

        self.store.save_index(&index).await?;
        Ok(())
    }

    /// 从内存与存储中移除结束时间早于 `cutoff` 的任务
    ///
    /// # 返回值
    ///
    /// 被移除的任务数量
    pub async fn evict_expired(&self, cutoff: DateTime<Utc>) -> Result<usize, ServiceError> {
        let _index_guard = self.index_lock.lock().await;

        let mut expired: HashSet<String> = {
            let mut tasks = self.tasks.write();
            let ids: Vec<String> = tasks
                .values()
                .filter(|task| task.ended_before(cutoff))
                .map(|task| task.task_id.clone())
                .collect();
            for id in &ids {
                tasks.remove(id);
            }
            ids.into_iter().collect()
        };

        {
            let mut dirty = self.dirty.lock();
            for id in &expired {
                dirty.remove(id);
            }
        }

        let mut index: TaskIndex = self.store.load_index().await?;
        expired.extend(
            index
                .tasks
                .iter()
                .filter(|meta| meta.end_time.is_some_and(|end| end < cutoff))
                .map(|meta| meta.task_id.clone()),
        );

        if expired.is_empty() {
            return Ok(0);
        }

        for id in &expired {
            if let Err(e) = self.store.delete_task(id).await {
                warn!(task_id = %id, "Failed to delete expired task: {}", e);
            }
        }

        index.tasks.retain(|meta| !expired.contains(&meta.task_id));
        self.store.save_index(&index).await?;

        counter!("tasks_evicted_total").increment(expired.len() as u64);
        info!("Evicted {} expired tasks", expired.len());
        Ok(expired.len())
    }

    /// 优雅关闭
    ///
    /// 停止接受新任务，取消执行器并在 `timeout` 内等待其退出，最后刷写脏任务。
    pub async fn shutdown(&self, timeout: Duration) -> usize {
        self.accepting.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
        self.executors.close();

        if tokio::time::timeout(timeout, self.executors.wait())
            .await
            .is_err()
        {
            warn!(
                "Timed out after {:?} waiting for {} scrape executors",
                timeout,
                self.executors.len()
            );
        }

        let flushed = self.flush_dirty().await;
        info!("Task registry shut down, flushed {} tasks", flushed);
        flushed
    }

    /// 等待所有已启动的执行器退出（不关闭注册表）
    pub async fn wait_idle(&self) {
        self.executors.close();
        self.executors.wait().await;
        self.executors.reopen();
    }

    pub(crate) fn set_video_title(&self, task_id: &str, title: &str) {
        if let Some(task) = self.tasks.write().get_mut(task_id) {
            task.video_title = title.to_string();
        }
        self.mark_dirty(task_id);
    }

    pub(crate) fn record_progress(&self, task_id: &str, page: u32, distinct_comments: usize) {
        if let Some(task) = self.tasks.write().get_mut(task_id) {
            task.record_page(page, distinct_comments);
        }
        self.mark_dirty(task_id);
    }

    /// 应用执行器的结局，立即持久化；完成的任务在保存成功后释放评论正文
    pub(crate) async fn finish(&self, task_id: &str, outcome: TaskOutcome) {
        let applied = {
            let mut tasks = self.tasks.write();
            let Some(task) = tasks.get_mut(task_id) else {
                warn!(task_id = %task_id, "Finished task is no longer registered");
                return;
            };

            let result = match outcome {
                TaskOutcome::Completed(comments) => task.complete(comments),
                TaskOutcome::Failed { error, partial } => task.fail(error).map(|()| {
                    task.comments = Some(partial);
                }),
                TaskOutcome::Cancelled { reason, partial } => task.cancel(reason).map(|()| {
                    task.comments = Some(partial);
                }),
            };
            result.map(|()| (task.status, task.end_time, task.start_time, task.progress.total_comments))
        };

        let (status, end_time, start_time, total) = match applied {
            Ok(state) => state,
            Err(e) => {
                warn!(task_id = %task_id, "Ignoring second terminal transition: {}", e);
                return;
            }
        };

        counter!("scrape_tasks_finished_total", "status" => status.to_string()).increment(1);
        if let Some(end) = end_time {
            let elapsed = (end - start_time).num_milliseconds().max(0) as f64 / 1000.0;
            histogram!("scrape_duration_seconds").record(elapsed);
        }
        info!(task_id = %task_id, status = %status, total_comments = total, "Scrape task finished");

        match self.persist_task(task_id).await {
            Ok(()) => {
                if status == TaskStatus::Completed {
                    if let Some(task) = self.tasks.write().get_mut(task_id) {
                        task.release_comments();
                    }
                }
            }
            Err(e) => {
                error!(task_id = %task_id, "Failed to persist finished task: {}", e);
                self.mark_dirty(task_id);
            }
        }
    }

    fn cached(&self, task_id: &str) -> Option<ScrapeTask> {
        self.tasks.read().get(task_id).cloned()
    }

    /// 外层 None 表示任务不存在，内层 None 表示评论已释放
    fn snapshot_data(&self, task_id: &str) -> Option<Option<TaskData>> {
        self.tasks.read().get(task_id).map(TaskData::from_task)
    }

    async fn adopt_from_index(&self, task_id: &str) -> Result<ScrapeTask, ServiceError> {
        let index = self.store.load_index().await?;
        let meta = index
            .find(task_id)
            .ok_or_else(|| ServiceError::TaskNotFound(task_id.to_string()))?;

        let task = ScrapeTask::from_meta(meta);
        let mut tasks = self.tasks.write();
        Ok(tasks
            .entry(task_id.to_string())
            .or_insert(task)
            .clone())
    }

    async fn rehydrate(&self, snapshot: ScrapeTask) -> Result<ScrapeTask, ServiceError> {
        let data = match self.store.load_task(&snapshot.task_id).await {
            Ok(data) => data,
            Err(e) if snapshot.status == TaskStatus::Completed => {
                return Err(ServiceError::Persistence(e));
            }
            Err(e) => {
                warn!(task_id = %snapshot.task_id, "Failed to load task comments: {}", e);
                return Ok(snapshot);
            }
        };

        let mut tasks = self.tasks.write();
        match tasks.get_mut(&snapshot.task_id) {
            Some(current) => {
                if current.needs_rehydration() {
                    current.rehydrate(data);
                }
                Ok(current.clone())
            }
            None => {
                let mut task = snapshot;
                task.rehydrate(data);
                Ok(task)
            }
        }
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
