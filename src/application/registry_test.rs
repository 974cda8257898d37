// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::*;
use crate::domain::models::comment::{CommentContent, CommentMember};
use crate::domain::models::task::ScrapeParams;
use crate::domain::models::task_record::TaskMeta;
use crate::engines::traits::{CommentPage, EngineError, PageRequest, VideoInfo};
use crate::infrastructure::storage::InMemoryTaskStore;
use async_trait::async_trait;
use chrono::Duration as ChronoDuration;

use crate::domain::models::task::AuthMode;

/// 所有视频都不存在的评论源
struct MissingVideoSource;

#[async_trait]
impl CommentSource for MissingVideoSource {
    async fn resolve_video(
        &self,
        _video_id: &str,
        _auth: &AuthMode,
    ) -> Result<VideoInfo, EngineError> {
        Err(EngineError::Api {
            code: -404,
            message: "啥都木有".to_string(),
        })
    }

    async fn fetch_page(
        &self,
        _request: &PageRequest,
        _auth: &AuthMode,
    ) -> Result<CommentPage, EngineError> {
        Ok(CommentPage::default())
    }

    async fn fetch_replies(
        &self,
        _oid: u64,
        _root: u64,
        _limit: u32,
        _auth: &AuthMode,
    ) -> Result<Vec<CommentEntry>, EngineError> {
        Ok(Vec::new())
    }

    fn name(&self) -> &'static str {
        "missing"
    }
}

fn setup() -> (Arc<TaskRegistry>, Arc<InMemoryTaskStore>) {
    let store = Arc::new(InMemoryTaskStore::new());
    let registry = Arc::new(TaskRegistry::new(
        store.clone(),
        Arc::new(MissingVideoSource),
        ScrapeOptions::default(),
        CancellationToken::new(),
    ));
    (registry, store)
}

fn comment(rpid: u64, message: &str, author: &str, like: u64, ctime: i64) -> CommentEntry {
    CommentEntry {
        rpid,
        like,
        ctime,
        content: CommentContent {
            message: message.to_string(),
        },
        member: CommentMember {
            name: author.to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn sample_comments() -> Vec<CommentEntry> {
    vec![
        comment(1, "好看", "alice", 5, 300),
        comment(2, "Rust 真香", "bob", 50, 100),
        comment(3, "rust 编译好慢", "carol", 20, 200),
        comment(4, "打卡", "RustFan", 1, 400),
    ]
}

fn completed_task(comments: Vec<CommentEntry>) -> ScrapeTask {
    let mut task = ScrapeTask::new(
        "BV1xx411c7mD".to_string(),
        ScrapeParams {
            page_limit: 5,
            ..Default::default()
        },
    );
    task.complete(comments).unwrap();
    task
}

fn insert(registry: &TaskRegistry, task: ScrapeTask) -> String {
    let task_id = task.task_id.clone();
    registry.tasks.write().insert(task_id.clone(), task);
    task_id
}

/// 把任务写入存储（数据文件与索引），模拟上一次运行留下的状态
async fn seed_store(store: &InMemoryTaskStore, tasks: &[ScrapeTask]) {
    let mut index = store.load_index().await.unwrap();
    for task in tasks {
        if let Some(data) = TaskData::from_task(task) {
            store.save_task(&data).await.unwrap();
        }
        index.upsert(TaskMeta::from_task(task));
    }
    store.save_index(&index).await.unwrap();
}

#[tokio::test]
async fn test_lazy_load_reads_store_once() {
    let (registry, store) = setup();
    let task = completed_task(sample_comments());
    let task_id = task.task_id.clone();
    seed_store(&store, &[task]).await;

    assert_eq!(registry.restore().await.unwrap(), 0);
    assert_eq!(store.load_count(), 0);

    let first = registry.get_task(&task_id).await.unwrap();
    let second = registry.get_task(&task_id).await.unwrap();

    assert_eq!(store.load_count(), 1);
    assert_eq!(first.comments.as_ref().map(Vec::len), Some(4));
    assert_eq!(second.comments, first.comments);
    assert_eq!(first.progress.page_limit, 5);
}

#[tokio::test]
async fn test_unknown_task_adopted_from_index() {
    let (registry, store) = setup();
    let task = completed_task(sample_comments());
    let task_id = task.task_id.clone();
    seed_store(&store, &[task]).await;

    let adopted = registry.get_task(&task_id).await.unwrap();
    assert_eq!(adopted.status, TaskStatus::Completed);
    assert_eq!(adopted.comments.as_ref().map(Vec::len), Some(4));
    assert_eq!(registry.list_tasks().len(), 1);
}

#[tokio::test]
async fn test_missing_task_is_not_found() {
    let (registry, _store) = setup();

    let result = registry.get_task("does-not-exist").await;
    assert!(matches!(result, Err(ServiceError::TaskNotFound(_))));

    let result = registry
        .get_result("does-not-exist", &ResultQuery::default())
        .await;
    assert!(matches!(result, Err(ServiceError::TaskNotFound(_))));
}

#[tokio::test]
async fn test_list_tasks_newest_first_without_comments() {
    let (registry, _store) = setup();
    let now = Utc::now();

    let mut ids = Vec::new();
    for hours_ago in [3, 2, 1] {
        let mut task = completed_task(sample_comments());
        task.start_time = now - ChronoDuration::hours(hours_ago);
        ids.push(insert(&registry, task));
    }

    let listed: Vec<String> = registry
        .list_tasks()
        .into_iter()
        .map(|task| {
            assert!(task.comments.is_none());
            task.task_id
        })
        .collect();

    assert_eq!(listed, vec![ids[2].clone(), ids[1].clone(), ids[0].clone()]);
}

#[tokio::test]
async fn test_get_result_filters_sorts_and_limits() {
    let (registry, _store) = setup();
    let task_id = insert(&registry, completed_task(sample_comments()));

    let (all, total) = registry
        .get_result(&task_id, &ResultQuery::default())
        .await
        .unwrap();
    assert_eq!(total, 4);
    assert_eq!(all.iter().map(|c| c.rpid).collect::<Vec<_>>(), vec![1, 2, 3, 4]);

    let query = ResultQuery {
        sort: "like_desc".to_string(),
        keyword: "RUST".to_string(),
        limit: 2,
    };
    let (comments, total) = registry.get_result(&task_id, &query).await.unwrap();
    assert_eq!(total, 3);
    assert_eq!(comments.iter().map(|c| c.rpid).collect::<Vec<_>>(), vec![2, 3]);

    let query = ResultQuery {
        sort: "time_asc".to_string(),
        ..Default::default()
    };
    let (comments, _) = registry.get_result(&task_id, &query).await.unwrap();
    assert_eq!(comments.iter().map(|c| c.rpid).collect::<Vec<_>>(), vec![2, 3, 1, 4]);
}

#[tokio::test]
async fn test_get_result_rejects_unknown_sort() {
    let (registry, _store) = setup();
    let task_id = insert(&registry, completed_task(sample_comments()));

    let query = ResultQuery {
        sort: "random".to_string(),
        ..Default::default()
    };
    let result = registry.get_result(&task_id, &query).await;
    assert!(matches!(result, Err(ServiceError::Validation(_))));
}

#[tokio::test]
async fn test_get_result_requires_completed_task() {
    let (registry, _store) = setup();
    let running = ScrapeTask::new("BV1".to_string(), ScrapeParams::default());
    let task_id = insert(&registry, running);

    let result = registry.get_result(&task_id, &ResultQuery::default()).await;
    assert!(matches!(result, Err(ServiceError::TaskNotCompleted(_))));
}

#[tokio::test]
async fn test_completed_task_with_missing_data_file_reports_persistence_error() {
    let (registry, store) = setup();
    let mut task = completed_task(sample_comments());
    task.release_comments();
    let task_id = task.task_id.clone();
    seed_store(&store, &[task]).await;
    registry.restore().await.unwrap();

    let result = registry.get_task(&task_id).await;
    assert!(matches!(
        result,
        Err(ServiceError::Persistence(StorageError::NotFound(_)))
    ));
}

#[tokio::test]
async fn test_restore_fails_interrupted_running_tasks() {
    let (registry, store) = setup();

    let mut running = ScrapeTask::new("BV1running".to_string(), ScrapeParams::default());
    running.comments = Some(sample_comments());
    running.record_page(2, 4);
    let running_id = running.task_id.clone();

    let finished = completed_task(sample_comments());
    let finished_id = finished.task_id.clone();
    seed_store(&store, &[running, finished]).await;

    let recovered = registry.restore().await.unwrap();
    assert_eq!(recovered, 1);

    let index = store.load_index().await.unwrap();
    let meta = index.find(&running_id).unwrap();
    assert_eq!(meta.status, TaskStatus::Failed);
    assert_eq!(meta.error.as_deref(), Some(RESTART_ERROR));
    assert!(meta.end_time.is_some());
    assert_eq!(index.find(&finished_id).unwrap().status, TaskStatus::Completed);

    let data = store.load_task(&running_id).await.unwrap();
    assert_eq!(data.meta.status, TaskStatus::Failed);
    assert_eq!(data.comments.len(), 4);

    let task = registry.get_task(&running_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some(RESTART_ERROR));
    assert_eq!(task.progress.current_page, 2);
    assert_eq!(registry.list_tasks().len(), 2);
}

#[tokio::test]
async fn test_flush_dirty_retries_after_write_failure() {
    let (registry, store) = setup();
    let running = ScrapeTask::new("BV1".to_string(), ScrapeParams::default());
    let task_id = insert(&registry, running);
    registry.mark_dirty(&task_id);

    store.set_fail_writes(true);
    assert_eq!(registry.flush_dirty().await, 0);
    assert_eq!(registry.dirty_count(), 1);
    assert!(!store.contains_task(&task_id));

    store.set_fail_writes(false);
    assert_eq!(registry.flush_dirty().await, 1);
    assert_eq!(registry.dirty_count(), 0);
    assert!(store.contains_task(&task_id));
    assert!(store.load_index().await.unwrap().find(&task_id).is_some());

    assert_eq!(registry.flush_dirty().await, 0);
}

#[tokio::test]
async fn test_flush_skips_body_of_released_task() {
    let (registry, store) = setup();
    let task = completed_task(sample_comments());
    let task_id = task.task_id.clone();
    seed_store(&store, &[task.clone()]).await;

    let mut released = task;
    released.release_comments();
    released.video_title = "新标题".to_string();
    insert(&registry, released);
    registry.mark_dirty(&task_id);

    assert_eq!(registry.flush_dirty().await, 1);

    let data = store.load_task(&task_id).await.unwrap();
    assert_eq!(data.comments.len(), 4);
    let index = store.load_index().await.unwrap();
    assert_eq!(index.find(&task_id).unwrap().video_title, "新标题");
}

#[tokio::test]
async fn test_finish_keeps_comments_when_persist_fails() {
    let (registry, store) = setup();
    let running = ScrapeTask::new("BV1".to_string(), ScrapeParams::default());
    let task_id = insert(&registry, running);

    store.set_fail_writes(true);
    registry
        .finish(&task_id, TaskOutcome::Completed(sample_comments()))
        .await;

    let task = registry.cached(&task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.comments.as_ref().map(Vec::len), Some(4));
    assert_eq!(registry.dirty_count(), 1);

    store.set_fail_writes(false);
    assert_eq!(registry.flush_dirty().await, 1);
    assert_eq!(store.load_task(&task_id).await.unwrap().comments.len(), 4);
}

#[tokio::test]
async fn test_finish_ignores_second_terminal_transition() {
    let (registry, store) = setup();
    let running = ScrapeTask::new("BV1".to_string(), ScrapeParams::default());
    let task_id = insert(&registry, running);

    registry
        .finish(&task_id, TaskOutcome::failed("boom", Vec::new()))
        .await;
    registry
        .finish(&task_id, TaskOutcome::Completed(sample_comments()))
        .await;

    let task = registry.get_task(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some("boom"));
    assert_eq!(
        store.load_task(&task_id).await.unwrap().meta.status,
        TaskStatus::Failed
    );
}

#[tokio::test]
async fn test_evict_expired_removes_memory_store_and_index_entries() {
    let (registry, store) = setup();
    let now = Utc::now();

    let mut old = completed_task(sample_comments());
    old.end_time = Some(now - ChronoDuration::hours(3));
    let mut index_only = completed_task(sample_comments());
    index_only.end_time = Some(now - ChronoDuration::hours(5));
    let recent = completed_task(sample_comments());
    let running = ScrapeTask::new("BV1".to_string(), ScrapeParams::default());

    seed_store(
        &store,
        &[old.clone(), index_only.clone(), recent.clone(), running.clone()],
    )
    .await;
    let old_id = insert(&registry, old);
    let recent_id = insert(&registry, recent);
    let running_id = insert(&registry, running);
    registry.mark_dirty(&old_id);

    let evicted = registry
        .evict_expired(now - ChronoDuration::hours(1))
        .await
        .unwrap();
    assert_eq!(evicted, 2);

    assert!(registry.cached(&old_id).is_none());
    assert!(registry.cached(&recent_id).is_some());
    assert!(registry.cached(&running_id).is_some());
    assert_eq!(registry.dirty_count(), 0);

    assert!(!store.contains_task(&old_id));
    assert!(!store.contains_task(&index_only.task_id));
    assert!(store.contains_task(&recent_id));

    let index = store.load_index().await.unwrap();
    assert_eq!(index.tasks.len(), 2);
    assert!(index.find(&old_id).is_none());
    assert!(index.find(&index_only.task_id).is_none());

    let again = registry
        .evict_expired(now - ChronoDuration::hours(1))
        .await
        .unwrap();
    assert_eq!(again, 0);
}

#[tokio::test]
async fn test_create_task_validates_request() {
    let (registry, _store) = setup();

    let result = registry.create_task(CreateTaskRequestDto {
        video_id: "BV1".to_string(),
        page_limit: 0,
        ..Default::default()
    });
    assert!(matches!(result, Err(ServiceError::Validation(_))));

    let result = registry.create_task(CreateTaskRequestDto {
        video_id: "BV1".to_string(),
        auth_mode: "cookie".to_string(),
        page_limit: 1,
        ..Default::default()
    });
    assert!(matches!(result, Err(ServiceError::Validation(_))));
    assert!(registry.list_tasks().is_empty());
}

#[tokio::test]
async fn test_created_task_starts_running_and_then_fails_on_missing_video() {
    let (registry, store) = setup();

    let task_id = registry
        .create_task(CreateTaskRequestDto {
            video_id: "BV1missing".to_string(),
            page_limit: 3,
            ..Default::default()
        })
        .unwrap();
    assert!(uuid::Uuid::parse_str(&task_id).is_ok());

    registry.wait_idle().await;

    let task = registry.get_task(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.progress.page_limit, 3);
    assert!(store.contains_task(&task_id));
}

#[tokio::test]
async fn test_shutdown_rejects_new_tasks_and_flushes() {
    let (registry, store) = setup();
    let running = ScrapeTask::new("BV1".to_string(), ScrapeParams::default());
    let task_id = insert(&registry, running);
    registry.mark_dirty(&task_id);

    let flushed = registry.shutdown(Duration::from_secs(1)).await;
    assert_eq!(flushed, 1);
    assert!(store.contains_task(&task_id));
    assert!(registry.shutdown_token().is_cancelled());

    let result = registry.create_task(CreateTaskRequestDto {
        video_id: "BV1".to_string(),
        page_limit: 1,
        ..Default::default()
    });
    assert!(matches!(result, Err(ServiceError::ShuttingDown)));
}
