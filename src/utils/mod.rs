// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 工具模块
///
/// 提供通用的错误类型、遥测初始化与时间计算
pub mod errors;
pub mod telemetry;
pub mod time;
