// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::models::task_record::{TaskData, TaskIndex, TaskMeta};

/// 存储错误类型
#[derive(Error, Debug)]
pub enum StorageError {
    /// IO错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// 序列化错误（文件损坏或格式不符）
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// 任务数据不存在
    #[error("Task data not found: {0}")]
    NotFound(String),
    /// 数据目录已被其他进程占用
    #[error("Data directory is locked by another process: {0}")]
    Locked(String),
}

/// 任务存储特质
///
/// 定义任务数据与任务索引的持久化接口。所有写入都必须是原子的：
/// 读者要么看到旧版本，要么看到新版本。
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 创建存储目录结构（幂等）
    async fn initialize(&self) -> Result<(), StorageError>;

    /// 保存任务完整数据，旧版本进入备份
    async fn save_task(&self, data: &TaskData) -> Result<(), StorageError>;

    /// 读取任务完整数据
    async fn load_task(&self, task_id: &str) -> Result<TaskData, StorageError>;

    /// 删除任务数据，不存在时视为成功
    async fn delete_task(&self, task_id: &str) -> Result<(), StorageError>;

    /// 保存任务索引
    async fn save_index(&self, index: &TaskIndex) -> Result<(), StorageError>;

    /// 读取任务索引，索引文件不存在时返回空索引
    async fn load_index(&self) -> Result<TaskIndex, StorageError>;

    /// 列出索引中的全部任务元数据
    async fn list_tasks(&self) -> Result<Vec<TaskMeta>, StorageError>;

    /// 清理结束时间早于 `before` 或已失败的任务
    ///
    /// # 返回值
    ///
    /// 返回被清理的任务数量
    async fn clean_old_tasks(&self, before: DateTime<Utc>) -> Result<usize, StorageError>;
}
