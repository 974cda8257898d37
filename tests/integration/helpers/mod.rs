// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use commentrs::application::dto::create_task_request::CreateTaskRequestDto;
use commentrs::application::registry::{ScrapeOptions, TaskRegistry};
use commentrs::config::settings::ApiSettings;
use commentrs::domain::repositories::task_store::TaskStore;
use commentrs::engines::bilibili_client::BilibiliClient;
use commentrs::infrastructure::storage::JsonTaskStore;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const VIDEO_ID: &str = "BV1xx411c7mD";
pub const OID: u64 = 170001;

/// 一个注册表实例及其存储
pub struct TestApp {
    pub registry: Arc<TaskRegistry>,
    pub store: Arc<JsonTaskStore>,
}

/// 在 `data_dir` 上打开存储并构建注册表（不执行恢复）
pub async fn open_app(data_dir: &Path, server: &MockServer) -> TestApp {
    let store = Arc::new(JsonTaskStore::new(data_dir, 3));
    store.initialize().await.unwrap();

    let client = BilibiliClient::new(&ApiSettings {
        base_url: server.uri(),
        user_agent: "commentrs-test".to_string(),
        timeout_secs: 5,
        wbi_key_ttl_secs: 60,
    })
    .unwrap();

    let registry = Arc::new(TaskRegistry::new(
        store.clone(),
        Arc::new(client),
        ScrapeOptions {
            page_size: 2,
            max_replies: 3,
            reply_delay: Duration::ZERO,
        },
        CancellationToken::new(),
    ));

    TestApp { registry, store }
}

pub fn request(page_limit: u32) -> CreateTaskRequestDto {
    CreateTaskRequestDto {
        video_id: VIDEO_ID.to_string(),
        page_limit,
        ..Default::default()
    }
}

pub fn comment(rpid: u64, message: &str, like: u64, ctime: i64) -> Value {
    json!({
        "rpid": rpid,
        "oid": OID,
        "rcount": 0,
        "like": like,
        "ctime": ctime,
        "content": {"message": message},
        "member": {"mid": rpid.to_string(), "uname": format!("user{}", rpid)},
        "replies": null
    })
}

pub fn page_body(replies: Vec<Value>, next: u64) -> Value {
    json!({
        "code": 0,
        "message": "0",
        "data": {
            "replies": replies,
            "cursor": {"all_count": 3, "next": next, "is_end": next == 0}
        }
    })
}

pub async fn mount_video(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/x/web-interface/view"))
        .and(query_param("bvid", VIDEO_ID))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": {"aid": OID, "title": "集成测试视频"}
        })))
        .mount(server)
        .await;
}

/// 第一页（无 next 参数）
pub async fn mount_first_page(server: &MockServer, body: Value) {
    Mock::given(method("GET"))
        .and(path("/x/v2/reply/main"))
        .and(query_param("oid", OID.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .with_priority(10)
        .mount(server)
        .await;
}

/// 以 `next` 参数区分的后续页
pub async fn mount_next_page(server: &MockServer, next: u64, body: Value) {
    Mock::given(method("GET"))
        .and(path("/x/v2/reply/main"))
        .and(query_param("next", next.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .with_priority(1)
        .mount(server)
        .await;
}

/// 轮询直到任务至少抓取到第 `page` 页
pub async fn wait_for_page(registry: &TaskRegistry, task_id: &str, page: u32) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let task = registry.get_task(task_id).await.unwrap();
            if task.progress.current_page >= page {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("scrape did not reach the expected page in time");
}
