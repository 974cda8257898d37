// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{info, warn};

use crate::config::settings::MetricsSettings;

/// 初始化指标系统
///
/// 未启用时不安装导出器，指标宏调用为空操作
pub fn init_metrics(settings: &MetricsSettings) {
    if !settings.enabled {
        return;
    }

    let addr: SocketAddr = match settings.listen_addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("Invalid metrics address {}: {}", settings.listen_addr, e);
            return;
        }
    };

    // Ignore error if address is already in use (for development/testing)
    if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
        warn!("Failed to install Prometheus recorder: {}. This might happen if the port is already in use.", e);
        return;
    }

    describe_counter!("scrape_tasks_total", "Total number of scrape tasks created");
    describe_counter!(
        "scrape_tasks_finished_total",
        "Total number of scrape tasks that reached a terminal state, by status"
    );
    describe_counter!("scrape_pages_total", "Total number of comment pages fetched");
    describe_histogram!(
        "scrape_duration_seconds",
        "Duration of scrape tasks in seconds"
    );
    describe_counter!(
        "comment_api_requests_total",
        "Total number of requests sent to the comment API, by endpoint"
    );
    describe_counter!(
        "task_flush_failures_total",
        "Total number of failed dirty-task flushes"
    );
    describe_counter!(
        "tasks_evicted_total",
        "Total number of expired tasks evicted from memory and store"
    );

    info!("Metrics exporter listening on {}", addr);
}
