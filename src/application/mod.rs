// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 应用程序模块
///
/// 包含任务注册表与请求DTO，编排领域模型、存储与评论数据源
pub mod dto;
pub mod registry;
