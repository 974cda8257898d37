// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::application::registry::TaskRegistry;
use crate::utils::time::cutoff_before;
use crate::workers::worker::Worker;

/// 过期任务清理工作器
///
/// 负责定期移除结束时间早于保留期的任务（内存、数据文件与索引）
pub struct CleanupWorker {
    registry: Arc<TaskRegistry>,
    interval: Duration,
    retention: Duration,
}

impl CleanupWorker {
    pub fn new(registry: Arc<TaskRegistry>, interval: Duration, retention: Duration) -> Self {
        Self {
            registry,
            interval,
            retention,
        }
    }

    /// 执行一次清理
    pub async fn sweep(&self) -> usize {
        let Some(cutoff) = cutoff_before(Utc::now(), self.retention) else {
            warn!("Retention {:?} is out of range, skipping cleanup", self.retention);
            return 0;
        };
        match self.registry.evict_expired(cutoff).await {
            Ok(count) => {
                if count > 0 {
                    info!("Cleaned up {} expired tasks", count);
                }
                count
            }
            Err(e) => {
                error!("Failed to cleanup expired tasks: {}", e);
                0
            }
        }
    }
}

#[async_trait]
impl Worker for CleanupWorker {
    async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Task cleanup worker started, interval {:?}, retention {}s",
            self.interval,
            self.retention.as_secs()
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }

        info!("Task cleanup worker stopped");
    }

    fn name(&self) -> &str {
        "cleanup"
    }
}

#[cfg(test)]
#[path = "cleanup_worker_test.rs"]
mod tests;
