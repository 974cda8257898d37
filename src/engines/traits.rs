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

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::models::comment::CommentEntry;
use crate::domain::models::task::{AuthMode, SortMode};

/// 接口返回的权限不足错误码，主接口遇到时改用旧版接口
pub const ACCESS_DENIED_CODE: i64 = -403;

/// 引擎错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    /// 请求失败
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    /// 接口返回非零状态码
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },
    /// 响应解析失败
    #[error("Decode error: {0}")]
    Decode(String),
}

impl EngineError {
    pub fn is_access_denied(&self) -> bool {
        matches!(self, EngineError::Api { code, .. } if *code == ACCESS_DENIED_CODE)
    }
}

/// 视频信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoInfo {
    /// 评论区对象ID（即 aid）
    pub oid: u64,
    pub title: String,
}

/// 评论分页请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub oid: u64,
    /// 页码，从 1 开始
    pub page_number: u32,
    pub page_size: u32,
    /// 上一页返回的游标
    pub cursor: Option<u64>,
    /// 上一页返回的偏移串
    pub offset: Option<String>,
    pub sort_mode: SortMode,
}

/// 一页评论
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentPage {
    pub items: Vec<CommentEntry>,
    pub next_cursor: u64,
    pub next_offset: String,
    pub total_count_estimate: u64,
}

impl CommentPage {
    /// 判断是否已到最后一页
    ///
    /// 游标与偏移串都为空，或本页条数不足一页时视为结束。
    pub fn is_exhausted(&self, page_size: u32) -> bool {
        (self.next_cursor == 0 && self.next_offset.is_empty())
            || self.items.len() < page_size as usize
    }
}

/// 评论数据源特质
#[async_trait]
pub trait CommentSource: Send + Sync {
    /// 将视频标识解析为评论区对象ID与标题
    async fn resolve_video(&self, video_id: &str, auth: &AuthMode)
        -> Result<VideoInfo, EngineError>;

    /// 获取一页评论（已签名）
    async fn fetch_page(
        &self,
        request: &PageRequest,
        auth: &AuthMode,
    ) -> Result<CommentPage, EngineError>;

    /// 获取某条评论下的前 `limit` 条子评论
    async fn fetch_replies(
        &self,
        oid: u64,
        root: u64,
        limit: u32,
        auth: &AuthMode,
    ) -> Result<Vec<CommentEntry>, EngineError>;

    /// 数据源名称
    fn name(&self) -> &'static str;
}
