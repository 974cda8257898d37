// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::registry::TaskRegistry;
use crate::config::settings::WorkerSettings;
use crate::workers::cleanup_worker::CleanupWorker;
use crate::workers::persistence_worker::PersistenceWorker;
use crate::workers::worker::Worker;

/// 工作管理器
///
/// 持有后台工作器的句柄与进程级取消令牌，负责优雅关闭。
pub struct WorkerManager {
    registry: Arc<TaskRegistry>,
    shutdown: CancellationToken,
    workers: Vec<Arc<dyn Worker>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerManager {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        let shutdown = registry.shutdown_token();
        Self {
            registry,
            shutdown,
            workers: Vec::new(),
            handles: Vec::new(),
        }
    }

    /// 按配置注册刷盘与清理工作器
    pub fn with_default_workers(mut self, settings: &WorkerSettings) -> Self {
        self.register(Arc::new(PersistenceWorker::new(
            self.registry.clone(),
            settings.flush_interval(),
        )));
        self.register(Arc::new(CleanupWorker::new(
            self.registry.clone(),
            settings.cleanup_interval(),
            settings.retention(),
        )));
        self
    }

    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        self.workers.push(worker);
    }

    /// 启动所有已注册的工作器
    pub fn start(&mut self) {
        for worker in &self.workers {
            let worker = worker.clone();
            let token = self.shutdown.clone();
            info!("Starting {} worker", worker.name());
            self.handles
                .push(tokio::spawn(async move { worker.run(token).await }));
        }
    }

    pub fn running(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }

    /// 优雅关闭
    ///
    /// 停止接受新任务并取消执行器，等待执行器与后台工作器退出
    /// （各自以 `timeout` 为上限），最后刷写脏任务。
    ///
    /// # 返回值
    ///
    /// 最终刷写的任务数量
    pub async fn shutdown(&mut self, timeout: Duration) -> usize {
        info!("Shutting down workers...");
        let flushed = self.registry.shutdown(timeout).await;

        for handle in self.handles.drain(..) {
            let abort = handle.abort_handle();
            if tokio::time::timeout(timeout, handle).await.is_err() {
                warn!("Worker did not stop within {:?}, aborting", timeout);
                abort.abort();
            }
        }

        info!("Workers shut down successfully");
        flushed
    }
}
