// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::comment::CommentEntry;
use super::task::{AuthKind, AuthMode, ScrapeParams, ScrapeTask, SortMode, TaskProgress, TaskStatus};

/// 索引文件格式版本
pub const INDEX_VERSION: &str = "1.0";

/// 任务索引条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMeta {
    pub task_id: String,
    pub video_id: String,
    #[serde(default)]
    pub video_title: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub comment_count: usize,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// 任务数据文件名（相对于任务目录）
    pub data_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 任务索引
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskIndex {
    pub version: String,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub tasks: Vec<TaskMeta>,
}

impl Default for TaskIndex {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION.to_string(),
            last_updated: Utc::now(),
            tasks: Vec::new(),
        }
    }
}

impl TaskIndex {
    pub fn find(&self, task_id: &str) -> Option<&TaskMeta> {
        self.tasks.iter().find(|meta| meta.task_id == task_id)
    }

    /// 插入或替换索引条目
    pub fn upsert(&mut self, meta: TaskMeta) {
        match self.tasks.iter_mut().find(|m| m.task_id == meta.task_id) {
            Some(existing) => *existing = meta,
            None => self.tasks.push(meta),
        }
    }
}

/// 持久化的爬取参数
///
/// 只保存认证方式，不保存 Cookie 或 APP 密钥等凭证。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StoredParams {
    #[serde(default)]
    pub auth_mode: AuthKind,
    #[serde(default)]
    pub page_limit: u32,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub sort_mode: SortMode,
    #[serde(default)]
    pub include_replies: bool,
}

impl From<&ScrapeParams> for StoredParams {
    fn from(params: &ScrapeParams) -> Self {
        Self {
            auth_mode: params.auth.kind(),
            page_limit: params.page_limit,
            delay_ms: params.delay_ms,
            sort_mode: params.sort_mode,
            include_replies: params.include_replies,
        }
    }
}

impl From<&StoredParams> for ScrapeParams {
    fn from(stored: &StoredParams) -> Self {
        Self {
            // 凭证从未落盘，恢复出的任务不会再发起请求
            auth: AuthMode::None,
            page_limit: stored.page_limit,
            delay_ms: stored.delay_ms,
            sort_mode: stored.sort_mode,
            include_replies: stored.include_replies,
        }
    }
}

/// 任务完整持久化数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskData {
    #[serde(flatten)]
    pub meta: TaskMeta,
    #[serde(default)]
    pub comments: Vec<CommentEntry>,
    #[serde(default)]
    pub progress: TaskProgress,
    #[serde(default)]
    pub params: StoredParams,
}

impl TaskMeta {
    pub fn data_file_for(task_id: &str) -> String {
        format!("{}.json", task_id)
    }

    pub fn from_task(task: &ScrapeTask) -> Self {
        Self {
            task_id: task.task_id.clone(),
            video_id: task.video_id.clone(),
            video_title: task.video_title.clone(),
            status: task.status,
            comment_count: task.progress.total_comments,
            start_time: task.start_time,
            end_time: task.end_time,
            data_file: Self::data_file_for(&task.task_id),
            error: task.error.clone(),
        }
    }

    /// 将运行中的条目标记为因重启而中断
    pub fn mark_interrupted(&mut self, reason: &str, at: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.error = Some(reason.to_string());
        self.end_time = Some(at);
    }
}

impl TaskData {
    /// 从内存任务构造持久化数据
    ///
    /// 已终结且评论正文未加载的任务返回 None，避免用空评论覆盖磁盘上的数据。
    pub fn from_task(task: &ScrapeTask) -> Option<Self> {
        if task.needs_rehydration() {
            return None;
        }

        Some(Self {
            meta: TaskMeta::from_task(task),
            comments: task.comments.clone().unwrap_or_default(),
            progress: task.progress,
            params: StoredParams::from(&task.params),
        })
    }
}

impl ScrapeTask {
    /// 由索引条目构造仅含元数据的任务（评论未加载）
    pub fn from_meta(meta: &TaskMeta) -> Self {
        Self {
            task_id: meta.task_id.clone(),
            video_id: meta.video_id.clone(),
            video_title: meta.video_title.clone(),
            status: meta.status,
            comments: None,
            progress: TaskProgress {
                current_page: 0,
                total_comments: meta.comment_count,
                page_limit: 0,
            },
            start_time: meta.start_time,
            end_time: meta.end_time,
            error: meta.error.clone(),
            params: ScrapeParams::default(),
        }
    }

    /// 用存储中的完整数据补全评论正文、进度与参数
    pub fn rehydrate(&mut self, data: TaskData) {
        self.progress = data.progress;
        self.progress.total_comments = data.comments.len();
        self.params = ScrapeParams::from(&data.params);
        self.comments = Some(data.comments);
    }
}

#[cfg(test)]
#[path = "task_record_test.rs"]
mod tests;
