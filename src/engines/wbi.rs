// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use md5::{Digest, Md5};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// 混淆密钥重排表
const MIXIN_KEY_ENC_TAB: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22, 25,
    54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

/// 签名时从参数值中剔除的字符
const FILTERED_CHARS: [char; 5] = ['!', '\'', '(', ')', '*'];

const FALLBACK_IMG_KEY: &str = "6536ef935693ef639889778317a124ab";
const FALLBACK_SUB_KEY: &str = "44aa19dd532868a0e7278589417478a8";

/// WBI 签名密钥对
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WbiKeys {
    pub img_key: String,
    pub sub_key: String,
}

impl WbiKeys {
    /// 无法获取线上密钥时使用的内置密钥
    pub fn fallback() -> Self {
        Self {
            img_key: FALLBACK_IMG_KEY.to_string(),
            sub_key: FALLBACK_SUB_KEY.to_string(),
        }
    }

    /// 从导航接口返回的图片地址中提取密钥（文件名去掉扩展名）
    pub fn from_urls(img_url: &str, sub_url: &str) -> Option<Self> {
        let img_key = key_from_url(img_url)?;
        let sub_key = key_from_url(sub_url)?;
        Some(Self { img_key, sub_key })
    }
}

fn key_from_url(url: &str) -> Option<String> {
    let file_name = url.rsplit('/').next()?;
    let stem = file_name.split('.').next()?;
    if stem.is_empty() {
        None
    } else {
        Some(stem.to_string())
    }
}

/// 按重排表生成 32 位混淆密钥
pub fn mixin_key(keys: &WbiKeys) -> String {
    let orig: Vec<char> = format!("{}{}", keys.img_key, keys.sub_key).chars().collect();
    MIXIN_KEY_ENC_TAB
        .iter()
        .filter_map(|&i| orig.get(i))
        .take(32)
        .collect()
}

/// 对请求参数签名
///
/// 追加 `wts` 后按键排序，剔除值中的 `!'()*`，以 URL 编码拼接查询串，
/// `w_rid` 为查询串与混淆密钥拼接后的 MD5。给定相同参数与 `wts` 结果确定。
///
/// # 返回值
///
/// 按键排序的参数列表，末尾为 `w_rid`
pub fn sign_params(
    params: &BTreeMap<String, String>,
    keys: &WbiKeys,
    wts: i64,
) -> Vec<(String, String)> {
    let mut sorted: BTreeMap<String, String> = params
        .iter()
        .map(|(k, v)| (k.clone(), v.replace(FILTERED_CHARS, "")))
        .collect();
    sorted.insert("wts".to_string(), wts.to_string());

    let query = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Md5::new();
    hasher.update(query.as_bytes());
    hasher.update(mixin_key(keys).as_bytes());
    let w_rid = hex::encode(hasher.finalize());

    let mut signed: Vec<(String, String)> = sorted.into_iter().collect();
    signed.push(("w_rid".to_string(), w_rid));
    signed
}

/// 带过期时间的签名密钥缓存
pub struct WbiKeyCache {
    ttl: Duration,
    entry: RwLock<Option<(WbiKeys, Instant)>>,
}

impl WbiKeyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: RwLock::new(None),
        }
    }

    /// 返回未过期的缓存密钥
    pub fn get(&self) -> Option<WbiKeys> {
        let entry = self.entry.read();
        entry
            .as_ref()
            .filter(|(_, fetched_at)| fetched_at.elapsed() < self.ttl)
            .map(|(keys, _)| keys.clone())
    }

    pub fn store(&self, keys: WbiKeys) {
        *self.entry.write() = Some((keys, Instant::now()));
    }
}
