// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use super::comment::CommentEntry;

/// 评论爬取任务
///
/// 由任务注册表独占持有的内存记录。`comments` 为 `None` 表示评论正文
/// 尚未加载（或已为节省内存而释放），此时 `progress.total_comments`
/// 仍然是已去重的评论总数。
#[derive(Debug, Clone)]
pub struct ScrapeTask {
    /// 任务唯一标识符，创建后不可变
    pub task_id: String,
    /// 视频标识（BV号等）
    pub video_id: String,
    /// 视频标题，在解析视频信息后填充
    pub video_title: String,
    /// 任务状态
    pub status: TaskStatus,
    /// 已去重的评论，未加载时为 None
    pub comments: Option<Vec<CommentEntry>>,
    /// 任务进度
    pub progress: TaskProgress,
    /// 开始时间
    pub start_time: DateTime<Utc>,
    /// 结束时间，仅在进入终态时设置
    pub end_time: Option<DateTime<Utc>>,
    /// 失败或取消原因
    pub error: Option<String>,
    /// 爬取参数，创建后不可变
    pub params: ScrapeParams,
}

/// 任务进度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TaskProgress {
    /// 当前页码
    pub current_page: u32,
    /// 已去重评论总数
    pub total_comments: usize,
    /// 页数上限
    pub page_limit: u32,
}

/// 爬取参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeParams {
    pub auth: AuthMode,
    pub page_limit: u32,
    /// 翻页间隔（毫秒）
    pub delay_ms: u64,
    pub sort_mode: SortMode,
    pub include_replies: bool,
}

impl Default for ScrapeParams {
    fn default() -> Self {
        Self {
            auth: AuthMode::None,
            page_limit: 0,
            delay_ms: 0,
            sort_mode: SortMode::Time,
            include_replies: false,
        }
    }
}

/// 认证方式及其凭证
#[derive(Clone, PartialEq, Eq, Default)]
pub enum AuthMode {
    #[default]
    None,
    /// Cookie 认证（SESSDATA）
    Cookie { sessdata: String },
    /// APP 认证
    App { app_key: String, app_secret: String },
}

impl AuthMode {
    pub fn kind(&self) -> AuthKind {
        match self {
            AuthMode::None => AuthKind::None,
            AuthMode::Cookie { .. } => AuthKind::Cookie,
            AuthMode::App { .. } => AuthKind::App,
        }
    }
}

// 凭证不进入日志
impl fmt::Debug for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::None => write!(f, "None"),
            AuthMode::Cookie { .. } => write!(f, "Cookie {{ sessdata: \"***\" }}"),
            AuthMode::App { app_key, .. } => {
                write!(f, "App {{ app_key: {:?}, app_secret: \"***\" }}", app_key)
            }
        }
    }
}

/// 认证方式（不含凭证），用于持久化
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    #[default]
    None,
    Cookie,
    App,
}

impl fmt::Display for AuthKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthKind::None => write!(f, "none"),
            AuthKind::Cookie => write!(f, "cookie"),
            AuthKind::App => write!(f, "app"),
        }
    }
}

impl FromStr for AuthKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "none" => Ok(AuthKind::None),
            "cookie" => Ok(AuthKind::Cookie),
            "app" => Ok(AuthKind::App),
            other => Err(format!("unknown auth mode: {}", other)),
        }
    }
}

/// 评论排序方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    /// 按时间
    #[default]
    Time,
    /// 按热度
    Hot,
}

impl fmt::Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SortMode::Time => write!(f, "time"),
            SortMode::Hot => write!(f, "hot"),
        }
    }
}

impl FromStr for SortMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "time" => Ok(SortMode::Time),
            "hot" => Ok(SortMode::Hot),
            other => Err(format!("unknown sort mode: {}", other)),
        }
    }
}

/// 任务状态枚举
///
/// 状态转换遵循以下流程：
/// Running → Completed/Failed/Cancelled
///
/// 终态不可再次转换。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// 运行中
    #[default]
    Running,
    /// 已完成
    Completed,
    /// 已失败
    Failed,
    /// 已取消
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(()),
        }
    }
}

/// 领域错误类型
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DomainError {
    /// 无效的状态转换，任务已处于终态
    #[error("Invalid state transition from {0}")]
    InvalidStateTransition(TaskStatus),
}

impl ScrapeTask {
    /// 创建一个新的运行中任务
    ///
    /// # 参数
    ///
    /// * `video_id` - 视频标识
    /// * `params` - 爬取参数
    ///
    /// # 返回值
    ///
    /// 返回进度清零、ID 新分配的任务
    pub fn new(video_id: String, params: ScrapeParams) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            video_id,
            video_title: String::new(),
            status: TaskStatus::Running,
            comments: Some(Vec::new()),
            progress: TaskProgress {
                current_page: 0,
                total_comments: 0,
                page_limit: params.page_limit,
            },
            start_time: Utc::now(),
            end_time: None,
            error: None,
            params,
        }
    }

    /// 记录翻页进度
    pub fn record_page(&mut self, page: u32, distinct_comments: usize) {
        self.progress.current_page = page;
        self.progress.total_comments = distinct_comments;
    }

    /// 完成任务
    ///
    /// 将任务状态从Running变更为Completed，并保存去重后的评论
    ///
    /// # 返回值
    ///
    /// * `Ok(())` - 转换成功
    /// * `Err(DomainError)` - 任务已处于终态
    pub fn complete(&mut self, comments: Vec<CommentEntry>) -> Result<(), DomainError> {
        self.ensure_running()?;
        self.status = TaskStatus::Completed;
        self.progress.total_comments = comments.len();
        self.comments = Some(comments);
        self.end_time = Some(Utc::now());
        Ok(())
    }

    /// 标记任务失败
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), DomainError> {
        self.ensure_running()?;
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.end_time = Some(Utc::now());
        Ok(())
    }

    /// 取消任务
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        self.ensure_running()?;
        self.status = TaskStatus::Cancelled;
        self.error = Some(reason.into());
        self.end_time = Some(Utc::now());
        Ok(())
    }

    /// 不含评论正文的快照
    pub fn summary(&self) -> Self {
        Self {
            task_id: self.task_id.clone(),
            video_id: self.video_id.clone(),
            video_title: self.video_title.clone(),
            status: self.status,
            comments: None,
            progress: self.progress,
            start_time: self.start_time,
            end_time: self.end_time,
            error: self.error.clone(),
            params: self.params.clone(),
        }
    }

    /// 释放评论正文以降低常驻内存，之后的读取会从存储懒加载
    pub fn release_comments(&mut self) {
        if self.status.is_terminal() {
            self.comments = None;
        }
    }

    /// 评论正文是否需要从存储懒加载
    pub fn needs_rehydration(&self) -> bool {
        self.status.is_terminal() && self.comments.is_none()
    }

    /// 判断任务是否在截止时间之前结束
    pub fn ended_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.end_time.is_some_and(|end| end < cutoff)
    }

    fn ensure_running(&self) -> Result<(), DomainError> {
        match self.status {
            TaskStatus::Running => Ok(()),
            other => Err(DomainError::InvalidStateTransition(other)),
        }
    }
}

#[cfg(test)]
#[path = "task_test.rs"]
mod tests;
