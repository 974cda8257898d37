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

use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::application::registry::{ScrapeOptions, TaskOutcome, TaskRegistry};
use crate::domain::models::comment::{CommentEntry, CommentSet};
use crate::domain::models::task::{AuthMode, ScrapeParams};
use crate::engines::traits::{CommentSource, EngineError, PageRequest};

/// 关闭时被取消任务的错误信息
pub const CANCELLED_ERROR: &str = "task cancelled by shutdown";

/// 爬取执行器
///
/// 每个任务一个实例，驱动分页、去重并通过注册表上报进度与结局。
pub struct ScrapeExecutor {
    registry: Arc<TaskRegistry>,
    source: Arc<dyn CommentSource>,
    options: ScrapeOptions,
    cancel: CancellationToken,
}

impl ScrapeExecutor {
    pub fn new(
        registry: Arc<TaskRegistry>,
        source: Arc<dyn CommentSource>,
        options: ScrapeOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            source,
            options,
            cancel,
        }
    }

    /// 执行任务直至终态
    #[instrument(skip(self, params), fields(source = self.source.name()))]
    pub async fn run(self, task_id: String, video_id: String, params: ScrapeParams) {
        info!("Scrape executor started");
        let outcome = self.scrape(&task_id, &video_id, &params).await;
        self.registry.finish(&task_id, outcome).await;
    }

    async fn scrape(&self, task_id: &str, video_id: &str, params: &ScrapeParams) -> TaskOutcome {
        let video = match self.source.resolve_video(video_id, &params.auth).await {
            Ok(video) => video,
            Err(EngineError::Api { message, .. }) => {
                return TaskOutcome::failed(format!("video API error: {}", message), Vec::new());
            }
            Err(e) => {
                return TaskOutcome::failed(format!("failed to get video info: {}", e), Vec::new());
            }
        };
        self.registry.set_video_title(task_id, &video.title);

        let page_size = self.options.page_size;
        let mut comments = CommentSet::new();
        let mut cursor: Option<u64> = None;
        let mut offset: Option<String> = None;
        let mut page: u32 = 1;

        while page <= params.page_limit {
            if self.cancel.is_cancelled() {
                return TaskOutcome::cancelled(CANCELLED_ERROR, comments.into_vec());
            }

            let request = PageRequest {
                oid: video.oid,
                page_number: page,
                page_size,
                cursor,
                offset: offset.clone(),
                sort_mode: params.sort_mode,
            };

            let fetched = match self.source.fetch_page(&request, &params.auth).await {
                Ok(fetched) => fetched,
                Err(EngineError::Api { message, .. }) => {
                    return TaskOutcome::failed(
                        format!("comment API error on page {}: {}", page, message),
                        comments.into_vec(),
                    );
                }
                Err(e) => {
                    return TaskOutcome::failed(
                        format!("failed to get comments on page {}: {}", page, e),
                        comments.into_vec(),
                    );
                }
            };
            counter!("scrape_pages_total").increment(1);

            let exhausted = fetched.is_exhausted(page_size);
            cursor = (fetched.next_cursor != 0).then_some(fetched.next_cursor);
            offset = (!fetched.next_offset.is_empty()).then(|| fetched.next_offset.clone());

            for mut comment in fetched.items {
                if params.include_replies && comment.rcount > 0 {
                    self.attach_replies(&mut comment, video.oid, &params.auth).await;
                }
                comments.upsert(comment);
            }

            self.registry.record_progress(task_id, page, comments.len());
            debug!(page, total_comments = comments.len(), "Fetched comment page");

            if exhausted || page == params.page_limit {
                break;
            }
            page += 1;

            if params.delay_ms > 0 {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        return TaskOutcome::cancelled(CANCELLED_ERROR, comments.into_vec());
                    }
                    _ = sleep(Duration::from_millis(params.delay_ms)) => {}
                }
            }
        }

        TaskOutcome::Completed(comments.into_vec())
    }

    /// 尽力抓取子评论，失败只记录日志
    async fn attach_replies(&self, comment: &mut CommentEntry, oid: u64, auth: &AuthMode) {
        if !self.options.reply_delay.is_zero() {
            sleep(self.options.reply_delay).await;
        }

        match self
            .source
            .fetch_replies(oid, comment.rpid, self.options.max_replies, auth)
            .await
        {
            Ok(mut replies) if !replies.is_empty() => {
                replies.truncate(self.options.max_replies as usize);
                comment.replies = replies;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(rpid = comment.rpid, "Failed to fetch replies: {}", e);
            }
        }
    }
}

#[cfg(test)]
#[path = "scrape_worker_test.rs"]
mod tests;
