// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::*;
use commentrs::application::dto::create_task_request::CreateTaskRequestDto;
use commentrs::application::registry::ResultQuery;
use commentrs::domain::models::task::TaskStatus;
use commentrs::domain::repositories::task_store::TaskStore;
use commentrs::utils::errors::ServiceError;
use tempfile::TempDir;
use wiremock::MockServer;

async fn mount_two_pages(server: &MockServer) {
    mount_video(server).await;
    mount_first_page(
        server,
        page_body(
            vec![comment(1, "第一条", 10, 300), comment(2, "Rust 好", 30, 100)],
            2,
        ),
    )
    .await;
    mount_next_page(
        server,
        2,
        page_body(
            vec![comment(2, "Rust 好", 31, 100), comment(3, "rust 慢", 20, 200)],
            0,
        ),
    )
    .await;
}

/// 完整流程：抓取、落盘，然后由新的注册表实例懒加载结果
#[tokio::test]
async fn test_scrape_persist_and_reload() {
    let server = MockServer::start().await;
    mount_two_pages(&server).await;
    let dir = TempDir::new().unwrap();

    let app = open_app(dir.path(), &server).await;
    app.registry.restore().await.unwrap();

    let task_id = app.registry.create_task(request(5)).unwrap();
    app.registry.wait_idle().await;

    let task = app.registry.get_task(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.video_title, "集成测试视频");
    assert_eq!(task.progress.total_comments, 3);
    assert_eq!(task.progress.current_page, 2);

    assert!(app.store.tasks_dir().join(format!("{}.json", task_id)).exists());
    assert!(app.store.tasks_dir().join("tasks.json").exists());

    let index = app.store.load_index().await.unwrap();
    let meta = index.find(&task_id).unwrap();
    assert_eq!(meta.status, TaskStatus::Completed);
    assert_eq!(meta.comment_count, 3);

    // 新实例只从磁盘读取
    let reopened = open_app(dir.path(), &server).await;
    assert_eq!(reopened.registry.restore().await.unwrap(), 0);

    let listed = reopened.registry.list_tasks();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].task_id, task_id);
    assert_eq!(listed[0].progress.total_comments, 3);
    assert!(listed[0].comments.is_none());

    let query = ResultQuery {
        sort: "like_desc".to_string(),
        keyword: "rust".to_string(),
        limit: 1,
    };
    let (comments, total) = reopened
        .registry
        .get_result(&task_id, &query)
        .await
        .unwrap();
    assert_eq!(total, 2);
    assert_eq!(comments.len(), 1);
    // 重复出现的评论以后一次为准
    assert_eq!(comments[0].rpid, 2);
    assert_eq!(comments[0].like, 31);
}

#[tokio::test]
async fn test_credentials_never_reach_disk() {
    let server = MockServer::start().await;
    mount_two_pages(&server).await;
    let dir = TempDir::new().unwrap();

    let app = open_app(dir.path(), &server).await;
    let task_id = app
        .registry
        .create_task(CreateTaskRequestDto {
            auth_mode: "cookie".to_string(),
            cookie: Some("super-secret-sessdata".to_string()),
            ..request(5)
        })
        .unwrap();
    app.registry.wait_idle().await;
    app.registry.flush_dirty().await;

    let data = std::fs::read_to_string(app.store.tasks_dir().join(format!("{}.json", task_id)))
        .unwrap();
    assert!(!data.contains("super-secret-sessdata"));
    assert!(data.contains("cookie"));

    let index = std::fs::read_to_string(app.store.tasks_dir().join("tasks.json")).unwrap();
    assert!(!index.contains("super-secret-sessdata"));
}

#[tokio::test]
async fn test_api_failure_is_persisted_as_failed() {
    let server = MockServer::start().await;
    mount_video(&server).await;
    mount_first_page(
        &server,
        serde_json::json!({"code": -412, "message": "请求被拦截"}),
    )
    .await;
    let dir = TempDir::new().unwrap();

    let app = open_app(dir.path(), &server).await;
    let task_id = app.registry.create_task(request(5)).unwrap();
    app.registry.wait_idle().await;

    let data = app.store.load_task(&task_id).await.unwrap();
    assert_eq!(data.meta.status, TaskStatus::Failed);
    let error = data.meta.error.unwrap();
    assert!(error.contains("page 1"), "unexpected error: {}", error);

    let result = app
        .registry
        .get_result(&task_id, &ResultQuery::default())
        .await;
    assert!(matches!(result, Err(ServiceError::TaskNotCompleted(_))));
}

#[tokio::test]
async fn test_repeated_flushes_rotate_backups() {
    let server = MockServer::start().await;
    mount_two_pages(&server).await;
    let dir = TempDir::new().unwrap();

    let app = open_app(dir.path(), &server).await;
    let task_id = app.registry.create_task(request(5)).unwrap();
    app.registry.wait_idle().await;

    for _ in 0..6 {
        app.registry.mark_dirty(&task_id);
        app.registry.flush_dirty().await;
    }

    let index_backups = std::fs::read_dir(app.store.backup_dir())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with("tasks.json.bak.")
        })
        .count();
    assert_eq!(index_backups, 3);
}
