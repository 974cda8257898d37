// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use thiserror::Error;

use crate::domain::repositories::task_store::StorageError;

/// 任务服务错误类型
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("任务不存在: {0}")]
    TaskNotFound(String),

    #[error("任务尚未完成: {0}")]
    TaskNotCompleted(String),

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("持久化错误: {0}")]
    Persistence(#[from] StorageError),

    #[error("服务正在关闭，不再接受新任务")]
    ShuttingDown,
}
