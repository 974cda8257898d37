// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use commentrs::application::dto::create_task_request::CreateTaskRequestDto;
use commentrs::application::registry::{ResultQuery, ScrapeOptions, TaskRegistry};
use commentrs::config::settings::Settings;
use commentrs::domain::models::task_record::TaskMeta;
use commentrs::domain::repositories::task_store::TaskStore;
use commentrs::engines::bilibili_client::BilibiliClient;
use commentrs::infrastructure::metrics::init_metrics;
use commentrs::infrastructure::storage::JsonTaskStore;
use commentrs::utils::telemetry;
use commentrs::utils::time::cutoff_before;
use commentrs::workers::manager::WorkerManager;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "commentrs", version, about = "视频评论爬取任务管理")]
struct Cli {
    /// 以 JSON 格式输出日志
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 运行后台工作器直到收到 Ctrl-C
    Serve,
    /// 爬取一个视频的评论并等待完成
    Scrape {
        video_id: String,
        #[arg(long, default_value_t = 10)]
        page_limit: u32,
        /// time 或 hot
        #[arg(long, default_value = "time")]
        sort: String,
        /// none / cookie / app
        #[arg(long, default_value = "none")]
        auth: String,
        #[arg(long, env = "BILIBILI_SESSDATA")]
        cookie: Option<String>,
        #[arg(long)]
        app_key: Option<String>,
        #[arg(long)]
        app_secret: Option<String>,
        #[arg(long)]
        include_replies: bool,
        #[arg(long, default_value_t = 1000)]
        delay_ms: u64,
    },
    /// 列出已知任务
    List,
    /// 输出已完成任务的评论
    #[command(name = "result")]
    Results {
        task_id: String,
        /// time_asc / time_desc / like_asc / like_desc
        #[arg(long, default_value = "")]
        sort: String,
        #[arg(long, default_value = "")]
        keyword: String,
        #[arg(long, default_value_t = 0)]
        limit: usize,
    },
    /// 删除失败的任务以及早于给定时长结束的任务
    Prune {
        #[arg(long, default_value_t = 7 * 24 * 3600)]
        older_than_secs: u64,
    },
}

/// 主函数
///
/// 应用程序入口点，负责初始化所有组件并执行子命令
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    telemetry::init_telemetry(cli.json_logs);
    info!("Starting commentrs...");

    let settings = Settings::new().context("failed to load configuration")?;
    info!("Configuration loaded");

    init_metrics(&settings.metrics);

    let store = Arc::new(JsonTaskStore::from_settings(&settings.storage));
    store
        .initialize()
        .await
        .context("failed to initialize task store")?;

    let shutdown_timeout = settings.workers.shutdown_timeout();

    match cli.command {
        Command::Serve => {
            let _dir_lock = store.lock_data_dir().context("failed to lock data directory")?;
            let registry = build_registry(&settings, store, Recovery::Run).await?;
            let mut manager =
                WorkerManager::new(registry.clone()).with_default_workers(&settings.workers);
            manager.start();
            info!("Workers started, press Ctrl-C to stop");

            wait_for_signal().await;
            manager.shutdown(shutdown_timeout).await;
        }
        Command::Scrape {
            video_id,
            page_limit,
            sort,
            auth,
            cookie,
            app_key,
            app_secret,
            include_replies,
            delay_ms,
        } => {
            let _dir_lock = store.lock_data_dir().context("failed to lock data directory")?;
            let registry = build_registry(&settings, store, Recovery::Run).await?;
            let mut manager =
                WorkerManager::new(registry.clone()).with_default_workers(&settings.workers);
            manager.start();

            let task_id = registry.create_task(CreateTaskRequestDto {
                video_id,
                auth_mode: auth,
                cookie,
                app_key,
                app_secret,
                sort_mode: sort,
                include_replies,
                page_limit,
                delay_ms,
            })?;
            info!(task_id = %task_id, "Task submitted");

            tokio::select! {
                _ = registry.wait_idle() => {}
                _ = wait_for_signal() => {}
            }
            manager.shutdown(shutdown_timeout).await;

            let task = registry.get_task(&task_id).await?;
            println!("{}", serde_json::to_string_pretty(&TaskMeta::from_task(&task))?);
        }
        Command::List => {
            let registry = build_registry(&settings, store, Recovery::Skip).await?;
            for task in registry.list_tasks() {
                println!("{}", serde_json::to_string(&TaskMeta::from_task(&task))?);
            }
        }
        Command::Results {
            task_id,
            sort,
            keyword,
            limit,
        } => {
            let registry = build_registry(&settings, store, Recovery::Skip).await?;
            let query = ResultQuery {
                sort,
                keyword,
                limit,
            };
            let (comments, total) = registry.get_result(&task_id, &query).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "task_id": task_id,
                    "total": total,
                    "comments": comments,
                }))?
            );
        }
        Command::Prune { older_than_secs } => {
            let before = cutoff_before(Utc::now(), Duration::from_secs(older_than_secs))
                .with_context(|| format!("--older-than-secs {} is out of range", older_than_secs))?;
            let _dir_lock = store.lock_data_dir().context("failed to lock data directory")?;
            let removed = store.clean_old_tasks(before).await?;
            println!("{}", json!({ "removed": removed }));
        }
    }

    Ok(())
}

/// 启动时是否执行崩溃恢复
///
/// 只有持有数据目录锁的进程才能恢复，只读命令跳过。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recovery {
    Run,
    Skip,
}

/// 构建注册表并载入已有任务
async fn build_registry(
    settings: &Settings,
    store: Arc<JsonTaskStore>,
    recovery: Recovery,
) -> anyhow::Result<Arc<TaskRegistry>> {
    let client = Arc::new(BilibiliClient::new(&settings.api)?);
    let registry = Arc::new(TaskRegistry::new(
        store,
        client,
        ScrapeOptions::from(&settings.scrape),
        CancellationToken::new(),
    ));

    match recovery {
        Recovery::Run => {
            let recovered = registry.restore().await?;
            if recovered > 0 {
                info!("Recovered {} interrupted tasks", recovered);
            }
        }
        Recovery::Skip => {
            registry.load_existing().await?;
        }
    }
    Ok(registry)
}

async fn wait_for_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(err) => error!("Unable to listen for shutdown signal: {}", err),
    }
}
