// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// 应用程序配置设置
///
/// 包含存储、后台工作器、远程接口、爬取行为和指标导出等配置项
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// 存储配置
    pub storage: StorageSettings,
    /// 后台工作器配置
    pub workers: WorkerSettings,
    /// 远程评论接口配置
    pub api: ApiSettings,
    /// 爬取行为配置
    pub scrape: ScrapeSettings,
    /// 指标配置
    pub metrics: MetricsSettings,
}

/// 存储配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// 数据根目录，任务文件位于其下的 `tasks/` 目录
    pub data_dir: String,
    /// 每个文件保留的备份数量
    pub backup_retention: usize,
}

/// 后台工作器配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    /// 脏任务刷盘间隔（秒）
    pub flush_interval_secs: u64,
    /// 过期任务清理间隔（秒）
    pub cleanup_interval_secs: u64,
    /// 终态任务保留时长（秒）
    pub retention_secs: u64,
    /// 优雅关闭的最长等待时间（秒）
    pub shutdown_timeout_secs: u64,
}

impl WorkerSettings {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// 远程接口配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSettings {
    /// 接口根地址
    pub base_url: String,
    /// 请求 User-Agent
    pub user_agent: String,
    /// 请求超时（秒）
    pub timeout_secs: u64,
    /// 签名密钥缓存时长（秒）
    pub wbi_key_ttl_secs: u64,
}

/// 爬取行为配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeSettings {
    /// 每页评论数
    pub page_size: u32,
    /// 每条评论最多抓取的子评论数
    pub max_replies: u32,
    /// 抓取子评论前的等待时间（毫秒）
    pub reply_delay_ms: u64,
}

/// 指标配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    /// 是否启用 Prometheus 导出
    pub enabled: bool,
    /// 导出器监听地址
    pub listen_addr: String,
}

impl Settings {
    /// 创建新的配置实例
    ///
    /// 依次合并默认值、`config/default`、`config/{APP_ENVIRONMENT}` 与
    /// `COMMENTRS__` 前缀的环境变量
    ///
    /// # Returns
    ///
    /// * `Ok(Settings)` - 成功加载的配置
    /// * `Err(ConfigError)` - 配置加载失败
    pub fn new() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "default".to_string());
        let builder = Config::builder()
            // Default storage settings
            .set_default("storage.data_dir", "./data")?
            .set_default("storage.backup_retention", 10)?
            // Default worker settings
            .set_default("workers.flush_interval_secs", 30)?
            .set_default("workers.cleanup_interval_secs", 1800)?
            .set_default("workers.retention_secs", 3600)?
            .set_default("workers.shutdown_timeout_secs", 30)?
            // Default API settings
            .set_default("api.base_url", "https://api.bilibili.com")?
            .set_default(
                "api.user_agent",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            )?
            .set_default("api.timeout_secs", 10)?
            .set_default("api.wbi_key_ttl_secs", 3600)?
            // Default scrape settings
            .set_default("scrape.page_size", 20)?
            .set_default("scrape.max_replies", 3)?
            .set_default("scrape.reply_delay_ms", 200)?
            // Default metrics settings
            .set_default("metrics.enabled", false)?
            .set_default("metrics.listen_addr", "0.0.0.0:9000")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(Environment::with_prefix("COMMENTRS").separator("__"));

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
#[path = "settings_test.rs"]
mod tests;
