// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::*;
use commentrs::application::dto::create_task_request::CreateTaskRequestDto;
use commentrs::config::settings::WorkerSettings;
use commentrs::domain::models::task::TaskStatus;
use commentrs::utils::errors::ServiceError;
use commentrs::workers::manager::WorkerManager;
use commentrs::workers::scrape_worker::CANCELLED_ERROR;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use wiremock::MockServer;

fn worker_settings() -> WorkerSettings {
    WorkerSettings {
        flush_interval_secs: 30,
        cleanup_interval_secs: 1800,
        retention_secs: 3600,
        shutdown_timeout_secs: 5,
    }
}

/// 优雅关闭取消运行中的任务，并在退出前持久化
#[tokio::test]
async fn test_graceful_shutdown_cancels_and_persists() {
    let server = MockServer::start().await;
    mount_video(&server).await;
    mount_first_page(
        &server,
        page_body(vec![comment(1, "a", 1, 1), comment(2, "b", 2, 2)], 2),
    )
    .await;
    let dir = TempDir::new().unwrap();

    let app = open_app(dir.path(), &server).await;
    let settings = worker_settings();
    let mut manager = WorkerManager::new(app.registry.clone()).with_default_workers(&settings);
    manager.start();

    let task_id = app
        .registry
        .create_task(CreateTaskRequestDto {
            delay_ms: 600_000,
            ..request(5)
        })
        .unwrap();
    wait_for_page(&app.registry, &task_id, 1).await;

    let started = Instant::now();
    manager.shutdown(settings.shutdown_timeout()).await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(manager.running(), 0);

    let result = app.registry.create_task(request(1));
    assert!(matches!(result, Err(ServiceError::ShuttingDown)));

    let reopened = open_app(dir.path(), &server).await;
    assert_eq!(reopened.registry.restore().await.unwrap(), 0);

    let task = reopened.registry.get_task(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(task.error.as_deref(), Some(CANCELLED_ERROR));
    assert_eq!(task.comments.as_ref().map(Vec::len), Some(2));
}
