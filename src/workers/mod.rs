// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 工作器模块
///
/// 提供爬取执行器、后台刷盘与清理工作器以及工作器生命周期管理
pub mod cleanup_worker;
pub mod manager;
pub mod persistence_worker;
pub mod scrape_worker;
pub mod worker;

pub use worker::Worker;
