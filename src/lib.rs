// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 应用程序模块
///
/// 任务注册表与请求 DTO
pub mod application;

/// 配置模块
///
/// 处理应用程序的配置设置和环境变量
pub mod config;

/// 领域模块
///
/// 包含任务与评论实体、持久化记录以及存储接口
pub mod domain;

/// 引擎模块
///
/// 远程评论接口客户端及请求签名
pub mod engines;

/// 基础设施模块
///
/// 提供 JSON 文件存储与指标导出
pub mod infrastructure;

/// 工具模块
///
/// 提供通用的工具函数和辅助功能
pub mod utils;

/// 工作器模块
///
/// 实现爬取执行器、后台工作器和工作器管理
pub mod workers;
