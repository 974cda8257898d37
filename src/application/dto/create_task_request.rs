// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::domain::models::task::{AuthKind, AuthMode, ScrapeParams, SortMode};

/// 创建爬取任务请求DTO
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_modes"))]
pub struct CreateTaskRequestDto {
    /// 视频标识（BV号或 av 号）
    #[validate(length(min = 1, max = 64))]
    pub video_id: String,

    /// 认证方式：none / cookie / app，留空视为 none
    #[serde(default)]
    pub auth_mode: String,

    /// Cookie 认证使用的 SESSDATA
    pub cookie: Option<String>,

    pub app_key: Option<String>,

    pub app_secret: Option<String>,

    /// 排序方式：time / hot，留空视为 time
    #[serde(default)]
    pub sort_mode: String,

    /// 是否抓取子评论
    #[serde(default)]
    pub include_replies: bool,

    /// 最大页数
    #[validate(range(min = 1))]
    pub page_limit: u32,

    /// 翻页间隔（毫秒）
    #[serde(default)]
    pub delay_ms: u64,
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

fn validate_modes(dto: &CreateTaskRequestDto) -> Result<(), ValidationError> {
    let auth = dto
        .auth_mode
        .parse::<AuthKind>()
        .map_err(|e| ValidationError::new("auth_mode").with_message(e.into()))?;

    match auth {
        AuthKind::Cookie if !non_empty(&dto.cookie) => {
            return Err(ValidationError::new("cookie")
                .with_message("cookie auth requires a SESSDATA cookie".into()));
        }
        AuthKind::App if !non_empty(&dto.app_key) || !non_empty(&dto.app_secret) => {
            return Err(ValidationError::new("app_credentials")
                .with_message("app auth requires both app key and app secret".into()));
        }
        _ => {}
    }

    dto.sort_mode
        .parse::<SortMode>()
        .map_err(|e| ValidationError::new("sort_mode").with_message(e.into()))?;

    Ok(())
}

impl CreateTaskRequestDto {
    /// 转换为爬取参数，应在校验通过后调用
    pub fn to_params(&self) -> ScrapeParams {
        let auth = match self.auth_mode.parse::<AuthKind>().unwrap_or_default() {
            AuthKind::None => AuthMode::None,
            AuthKind::Cookie => AuthMode::Cookie {
                sessdata: self.cookie.clone().unwrap_or_default(),
            },
            AuthKind::App => AuthMode::App {
                app_key: self.app_key.clone().unwrap_or_default(),
                app_secret: self.app_secret.clone().unwrap_or_default(),
            },
        };

        ScrapeParams {
            auth,
            page_limit: self.page_limit,
            delay_ms: self.delay_ms,
            sort_mode: self.sort_mode.parse().unwrap_or_default(),
            include_replies: self.include_replies,
        }
    }
}
