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
use chrono::Utc;
use metrics::counter;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, COOKIE, REFERER};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::settings::ApiSettings;
use crate::domain::models::comment::CommentEntry;
use crate::domain::models::task::{AuthMode, SortMode};
use crate::engines::traits::{CommentPage, CommentSource, EngineError, PageRequest, VideoInfo};
use crate::engines::wbi::{self, WbiKeyCache, WbiKeys};

const MAIN_REPLY_PATH: &str = "/x/v2/reply/main";
const LEGACY_REPLY_PATH: &str = "/x/v2/reply";
const SUB_REPLY_PATH: &str = "/x/v2/reply/reply";
const VIEW_PATH: &str = "/x/web-interface/view";
const NAV_PATH: &str = "/x/web-interface/nav";

/// 视频评论区类型
const VIDEO_REPLY_TYPE: &str = "1";

/// 接口响应外层结构
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    fn into_data(self) -> Result<T, EngineError> {
        if self.code != 0 {
            return Err(EngineError::Api {
                code: self.code,
                message: self.message,
            });
        }
        self.data
            .ok_or_else(|| EngineError::Decode("response has no data".to_string()))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ReplyData {
    #[serde(default)]
    replies: Option<Vec<CommentEntry>>,
    #[serde(default)]
    cursor: Option<ReplyCursor>,
    #[serde(default)]
    page: Option<LegacyPage>,
}

#[derive(Debug, Default, Deserialize)]
struct ReplyCursor {
    #[serde(default)]
    all_count: u64,
    #[serde(default)]
    next: u64,
    #[serde(default)]
    pagination_reply: Option<PaginationReply>,
}

#[derive(Debug, Default, Deserialize)]
struct PaginationReply {
    #[serde(default)]
    next_offset: String,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyPage {
    #[serde(default)]
    count: u64,
}

#[derive(Debug, Deserialize)]
struct ViewData {
    aid: u64,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Default, Deserialize)]
struct NavData {
    #[serde(default)]
    wbi_img: Option<WbiImg>,
}

#[derive(Debug, Default, Deserialize)]
struct WbiImg {
    #[serde(default)]
    img_url: String,
    #[serde(default)]
    sub_url: String,
}

/// B 站评论接口客户端
///
/// 基于 reqwest 实现评论分页、子评论与视频信息查询，分页请求带 WBI 签名。
pub struct BilibiliClient {
    client: reqwest::Client,
    base_url: Url,
    keys: WbiKeyCache,
}

impl BilibiliClient {
    pub fn new(settings: &ApiSettings) -> Result<Self, EngineError> {
        let base_url = Url::parse(&settings.base_url)
            .map_err(|e| EngineError::Decode(format!("invalid base url {}: {}", settings.base_url, e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(REFERER, HeaderValue::from_static("https://www.bilibili.com/"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"),
        );

        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .default_headers(headers)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url,
            keys: WbiKeyCache::new(Duration::from_secs(settings.wbi_key_ttl_secs)),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, EngineError> {
        self.base_url
            .join(path)
            .map_err(|e| EngineError::Decode(format!("invalid endpoint {}: {}", path, e)))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
        auth: &AuthMode,
    ) -> Result<T, EngineError> {
        let mut request = self.client.get(self.endpoint(path)?).query(query);
        match auth {
            AuthMode::None => {}
            AuthMode::Cookie { sessdata } => {
                request = request.header(COOKIE, format!("SESSDATA={}", sessdata));
            }
            AuthMode::App { app_key, .. } => {
                request = request.header("APP-KEY", app_key.as_str());
            }
        }

        counter!("comment_api_requests_total", "endpoint" => path.to_string()).increment(1);
        let response = request.send().await?.error_for_status()?;
        let bytes = response.bytes().await?;

        serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::Decode(format!("{}: {}", path, e)))
    }

    /// 获取签名密钥，导航接口不可用时退回内置密钥
    async fn wbi_keys(&self) -> WbiKeys {
        if let Some(keys) = self.keys.get() {
            return keys;
        }

        let keys = match self
            .get_json::<ApiEnvelope<NavData>>(NAV_PATH, &[], &AuthMode::None)
            .await
        {
            // 未登录时 code 为 -101，但仍会返回签名图片地址
            Ok(envelope) => envelope
                .data
                .and_then(|data| data.wbi_img)
                .and_then(|img| WbiKeys::from_urls(&img.img_url, &img.sub_url)),
            Err(e) => {
                warn!("Failed to fetch WBI keys: {}", e);
                None
            }
        };

        let keys = keys.unwrap_or_else(|| {
            debug!("Using fallback WBI keys");
            WbiKeys::fallback()
        });
        self.keys.store(keys.clone());
        keys
    }

    async fn signed_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: BTreeMap<String, String>,
        auth: &AuthMode,
    ) -> Result<T, EngineError> {
        let keys = self.wbi_keys().await;
        let query = wbi::sign_params(&params, &keys, Utc::now().timestamp());
        let envelope: ApiEnvelope<T> = self.get_json(path, &query, auth).await?;
        envelope.into_data()
    }

    async fn fetch_main_page(
        &self,
        request: &PageRequest,
        auth: &AuthMode,
    ) -> Result<CommentPage, EngineError> {
        let mut params = base_params(request.oid);
        params.insert("ps".to_string(), request.page_size.to_string());
        params.insert(
            "mode".to_string(),
            match request.sort_mode {
                SortMode::Time => "2",
                SortMode::Hot => "3",
            }
            .to_string(),
        );
        if let Some(cursor) = request.cursor {
            params.insert("next".to_string(), cursor.to_string());
        }
        if let Some(offset) = &request.offset {
            let pagination = serde_json::json!({ "offset": offset }).to_string();
            params.insert("pagination_str".to_string(), pagination);
        }

        let data: ReplyData = self.signed_get(MAIN_REPLY_PATH, params, auth).await?;
        let cursor = data.cursor.unwrap_or_default();

        Ok(CommentPage {
            items: data.replies.unwrap_or_default(),
            next_cursor: cursor.next,
            next_offset: cursor
                .pagination_reply
                .map(|p| p.next_offset)
                .unwrap_or_default(),
            total_count_estimate: cursor.all_count,
        })
    }

    /// 旧版分页接口，按页码翻页
    async fn fetch_legacy_page(
        &self,
        request: &PageRequest,
        auth: &AuthMode,
    ) -> Result<CommentPage, EngineError> {
        let mut params = base_params(request.oid);
        params.insert("pn".to_string(), request.page_number.to_string());
        params.insert("ps".to_string(), request.page_size.to_string());
        params.insert(
            "sort".to_string(),
            match request.sort_mode {
                SortMode::Time => "0",
                SortMode::Hot => "1",
            }
            .to_string(),
        );

        let data: ReplyData = self.signed_get(LEGACY_REPLY_PATH, params, auth).await?;
        let items = data.replies.unwrap_or_default();
        let next_cursor = if items.is_empty() {
            0
        } else {
            u64::from(request.page_number) + 1
        };

        Ok(CommentPage {
            items,
            next_cursor,
            next_offset: String::new(),
            total_count_estimate: data.page.map(|p| p.count).unwrap_or_default(),
        })
    }
}

fn base_params(oid: u64) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    params.insert("oid".to_string(), oid.to_string());
    params.insert("type".to_string(), VIDEO_REPLY_TYPE.to_string());
    params
}

/// 解析 `av` 号，其余视为 BV 号
fn video_query(video_id: &str) -> (String, String) {
    let lowered = video_id.to_ascii_lowercase();
    match lowered.strip_prefix("av") {
        Some(digits) if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) => {
            ("aid".to_string(), digits.to_string())
        }
        _ => ("bvid".to_string(), video_id.to_string()),
    }
}

#[async_trait]
impl CommentSource for BilibiliClient {
    async fn resolve_video(
        &self,
        video_id: &str,
        auth: &AuthMode,
    ) -> Result<VideoInfo, EngineError> {
        let envelope: ApiEnvelope<ViewData> = self
            .get_json(VIEW_PATH, &[video_query(video_id)], auth)
            .await?;
        let data = envelope.into_data()?;

        Ok(VideoInfo {
            oid: data.aid,
            title: data.title,
        })
    }

    async fn fetch_page(
        &self,
        request: &PageRequest,
        auth: &AuthMode,
    ) -> Result<CommentPage, EngineError> {
        match self.fetch_main_page(request, auth).await {
            Err(e) if e.is_access_denied() => {
                warn!(
                    oid = request.oid,
                    page = request.page_number,
                    "Main reply endpoint denied access, retrying legacy endpoint"
                );
                self.fetch_legacy_page(request, auth).await
            }
            other => other,
        }
    }

    async fn fetch_replies(
        &self,
        oid: u64,
        root: u64,
        limit: u32,
        auth: &AuthMode,
    ) -> Result<Vec<CommentEntry>, EngineError> {
        let mut query: Vec<(String, String)> = base_params(oid).into_iter().collect();
        query.push(("root".to_string(), root.to_string()));
        query.push(("pn".to_string(), "1".to_string()));
        query.push(("ps".to_string(), limit.to_string()));

        let envelope: ApiEnvelope<ReplyData> = self.get_json(SUB_REPLY_PATH, &query, auth).await?;
        let mut replies = envelope.into_data()?.replies.unwrap_or_default();
        replies.truncate(limit as usize);
        Ok(replies)
    }

    fn name(&self) -> &'static str {
        "bilibili"
    }
}

#[cfg(test)]
#[path = "bilibili_client_test.rs"]
mod tests;
