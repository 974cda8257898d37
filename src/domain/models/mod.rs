// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域模型模块
///
/// 该模块定义了系统的核心业务实体，包括：
/// - 评论（comment）：评论实体、去重集合与结果筛选排序
/// - 任务（task）：评论爬取任务及其状态机
/// - 任务记录（task_record）：任务的持久化形式（索引条目与完整数据）
pub mod comment;
pub mod task;
pub mod task_record;
