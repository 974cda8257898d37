// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::application::registry::TaskRegistry;
use crate::workers::worker::Worker;

/// 脏任务刷盘工作器
///
/// 定期把注册表中被修改过的任务写入存储。写入失败的任务会被重新标记，
/// 在下一个周期重试。
pub struct PersistenceWorker {
    registry: Arc<TaskRegistry>,
    interval: Duration,
}

impl PersistenceWorker {
    pub fn new(registry: Arc<TaskRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }
}

#[async_trait]
impl Worker for PersistenceWorker {
    async fn run(&self, shutdown: CancellationToken) {
        info!("Persistence worker started, interval {:?}", self.interval);

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // 第一次 tick 立即返回
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let flushed = self.registry.flush_dirty().await;
                    if flushed > 0 {
                        debug!("Persisted {} dirty tasks", flushed);
                    }
                }
            }
        }

        info!("Persistence worker stopped");
    }

    fn name(&self) -> &str {
        "persistence"
    }
}

#[cfg(test)]
#[path = "persistence_worker_test.rs"]
mod tests;
