// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::*;
use commentrs::application::dto::create_task_request::CreateTaskRequestDto;
use commentrs::application::registry::RESTART_ERROR;
use commentrs::domain::models::task::TaskStatus;
use commentrs::domain::repositories::task_store::{StorageError, TaskStore};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::MockServer;

/// 进程在抓取途中退出后，新实例把遗留的运行中任务标记为失败
#[tokio::test]
async fn test_restart_marks_running_task_failed() {
    let server = MockServer::start().await;
    mount_video(&server).await;
    mount_first_page(
        &server,
        page_body(vec![comment(1, "a", 1, 1), comment(2, "b", 2, 2)], 2),
    )
    .await;
    let dir = TempDir::new().unwrap();

    let crashed = open_app(dir.path(), &server).await;
    let task_id = crashed
        .registry
        .create_task(CreateTaskRequestDto {
            delay_ms: 600_000,
            ..request(5)
        })
        .unwrap();
    wait_for_page(&crashed.registry, &task_id, 1).await;
    assert!(crashed.registry.flush_dirty().await >= 1);

    let index = crashed.store.load_index().await.unwrap();
    assert_eq!(index.find(&task_id).unwrap().status, TaskStatus::Running);

    // 不经过关闭流程，直接在同一目录上启动新实例
    let restarted = open_app(dir.path(), &server).await;
    assert_eq!(restarted.registry.restore().await.unwrap(), 1);

    let task = restarted.registry.get_task(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some(RESTART_ERROR));
    assert!(task.end_time.is_some());
    assert_eq!(task.progress.current_page, 1);
    assert_eq!(task.progress.total_comments, 2);

    let data = restarted.store.load_task(&task_id).await.unwrap();
    assert_eq!(data.meta.status, TaskStatus::Failed);
    assert_eq!(data.meta.error.as_deref(), Some(RESTART_ERROR));

    // 第二次启动没有需要恢复的任务
    let again = open_app(dir.path(), &server).await;
    assert_eq!(again.registry.restore().await.unwrap(), 0);

    crashed.registry.shutdown(Duration::from_secs(5)).await;
}

/// 抓取进行中时，另一个只读实例读取同一目录不会改动运行中的任务
#[tokio::test]
async fn test_read_only_load_leaves_live_task_running() {
    let server = MockServer::start().await;
    mount_video(&server).await;
    mount_first_page(
        &server,
        page_body(vec![comment(1, "a", 1, 1), comment(2, "b", 2, 2)], 2),
    )
    .await;
    let dir = TempDir::new().unwrap();

    let owner = open_app(dir.path(), &server).await;
    let _dir_lock = owner.store.lock_data_dir().unwrap();
    assert_eq!(owner.registry.restore().await.unwrap(), 0);
    let task_id = owner
        .registry
        .create_task(CreateTaskRequestDto {
            delay_ms: 600_000,
            ..request(5)
        })
        .unwrap();
    wait_for_page(&owner.registry, &task_id, 1).await;
    assert!(owner.registry.flush_dirty().await >= 1);

    let reader = open_app(dir.path(), &server).await;
    assert_eq!(reader.registry.load_existing().await.unwrap(), 1);

    let listed = reader.registry.list_tasks();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, TaskStatus::Running);
    assert_eq!(listed[0].progress.total_comments, 2);

    let data = reader.store.load_task(&task_id).await.unwrap();
    assert_eq!(data.meta.status, TaskStatus::Running);
    assert!(data.meta.error.is_none());
    let index = reader.store.load_index().await.unwrap();
    assert_eq!(index.find(&task_id).unwrap().status, TaskStatus::Running);

    // 另一个写入进程无法取得数据目录锁
    assert!(matches!(
        reader.store.lock_data_dir(),
        Err(StorageError::Locked(_))
    ));

    let live = owner.registry.get_task(&task_id).await.unwrap();
    assert_eq!(live.status, TaskStatus::Running);

    owner.registry.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_data_dir_lock_released_on_drop() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let app = open_app(dir.path(), &server).await;

    let first = app.store.lock_data_dir().unwrap();
    assert!(matches!(
        app.store.lock_data_dir(),
        Err(StorageError::Locked(_))
    ));
    drop(first);

    assert!(app.store.lock_data_dir().is_ok());
    // 锁文件不影响索引与清理
    assert_eq!(app.registry.restore().await.unwrap(), 0);
    assert_eq!(app.store.list_tasks().await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_restore_on_empty_directory() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    let app = open_app(dir.path(), &server).await;
    assert_eq!(app.registry.restore().await.unwrap(), 0);
    assert!(app.registry.list_tasks().is_empty());
    assert!(app.store.tasks_dir().is_dir());
}
