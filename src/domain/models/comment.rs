// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// 评论实体
///
/// 一条评论及其（可选的）子评论树。`rpid` 是评论的唯一标识，
/// 也是任务内去重的键。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CommentEntry {
    /// 评论ID（去重键）
    pub rpid: u64,
    /// 评论所属对象ID
    #[serde(default)]
    pub oid: u64,
    /// 评论者用户ID
    #[serde(default)]
    pub mid: u64,
    /// 根评论ID，顶层评论为0
    #[serde(default)]
    pub root: u64,
    /// 父评论ID，顶层评论为0
    #[serde(default)]
    pub parent: u64,
    /// 子评论数量
    #[serde(default)]
    pub rcount: u32,
    /// 点赞数
    #[serde(default)]
    pub like: u64,
    /// 发布时间（Unix 秒）
    #[serde(default)]
    pub ctime: i64,
    /// 评论内容
    #[serde(default)]
    pub content: CommentContent,
    /// 评论者信息
    #[serde(default)]
    pub member: CommentMember,
    /// 子评论，接口可能返回 null
    #[serde(default, deserialize_with = "null_as_empty")]
    pub replies: Vec<CommentEntry>,
}

/// 评论内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CommentContent {
    pub message: String,
}

/// 评论者信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CommentMember {
    #[serde(default)]
    pub mid: String,
    /// 用户名，接口字段为 `uname`
    #[serde(default, alias = "uname")]
    pub name: String,
    #[serde(default)]
    pub sex: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub sign: String,
    #[serde(default)]
    pub level: u32,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<CommentEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<CommentEntry>>::deserialize(deserializer)?.unwrap_or_default())
}

impl CommentEntry {
    /// 判断评论内容或作者名是否包含关键词（关键词需已转为小写）
    fn matches(&self, lowered_keyword: &str) -> bool {
        self.content.message.to_lowercase().contains(lowered_keyword)
            || self.member.name.to_lowercase().contains(lowered_keyword)
    }
}

/// 按 rpid 去重的评论集合
///
/// 同一 rpid 再次出现时覆盖原有条目，但保留其首次出现的位置。
#[derive(Debug, Default)]
pub struct CommentSet {
    positions: HashMap<u64, usize>,
    entries: Vec<CommentEntry>,
}

impl CommentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或覆盖评论
    ///
    /// # 返回值
    ///
    /// 如果是新出现的 rpid 返回 true
    pub fn upsert(&mut self, comment: CommentEntry) -> bool {
        match self.positions.get(&comment.rpid) {
            Some(&pos) => {
                self.entries[pos] = comment;
                false
            }
            None => {
                self.positions.insert(comment.rpid, self.entries.len());
                self.entries.push(comment);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_vec(self) -> Vec<CommentEntry> {
        self.entries
    }
}

/// 结果排序方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentSort {
    TimeAsc,
    TimeDesc,
    LikeAsc,
    LikeDesc,
}

impl fmt::Display for CommentSort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CommentSort::TimeAsc => write!(f, "time_asc"),
            CommentSort::TimeDesc => write!(f, "time_desc"),
            CommentSort::LikeAsc => write!(f, "like_asc"),
            CommentSort::LikeDesc => write!(f, "like_desc"),
        }
    }
}

impl FromStr for CommentSort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "time_asc" => Ok(CommentSort::TimeAsc),
            "time_desc" => Ok(CommentSort::TimeDesc),
            "like_asc" => Ok(CommentSort::LikeAsc),
            "like_desc" => Ok(CommentSort::LikeDesc),
            other => Err(format!("unknown sort order: {}", other)),
        }
    }
}

/// 按关键词筛选评论（大小写不敏感，匹配内容或作者名）
///
/// 关键词为空时原样返回。
pub fn filter_comments(comments: Vec<CommentEntry>, keyword: &str) -> Vec<CommentEntry> {
    if keyword.is_empty() {
        return comments;
    }

    let keyword = keyword.to_lowercase();
    comments
        .into_iter()
        .filter(|comment| comment.matches(&keyword))
        .collect()
}

/// 就地排序评论（稳定排序）
pub fn sort_comments(comments: &mut [CommentEntry], sort: CommentSort) {
    match sort {
        CommentSort::TimeAsc => comments.sort_by_key(|c| c.ctime),
        CommentSort::TimeDesc => comments.sort_by(|a, b| b.ctime.cmp(&a.ctime)),
        CommentSort::LikeAsc => comments.sort_by_key(|c| c.like),
        CommentSort::LikeDesc => comments.sort_by(|a, b| b.like.cmp(&a.like)),
    }
}

#[cfg(test)]
#[path = "comment_test.rs"]
mod tests;
