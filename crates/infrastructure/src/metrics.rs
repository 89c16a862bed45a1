//! 指标采集
//!
//! 基于 metrics 门面采集调度与分发指标，通过 Prometheus 导出器暴露。

use anyhow::Result;
use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};

/// 指标采集器
pub struct MetricsCollector {
    // 指派执行指标
    assignments_dispatched_total: Counter,
    assignments_completed_total: Counter,
    assignments_failed_total: Counter,
    assignment_execution_duration: Histogram,

    // 客户端存活指标
    online_clients: Gauge,
    clients_expired_total: Counter,

    // 调度器指标
    scheduling_pass_duration: Histogram,
    liveness_sweep_duration: Histogram,
    task_cycles_started_total: Counter,
}

impl MetricsCollector {
    pub fn new() -> Result<Self> {
        let assignments_dispatched_total = counter!("taskfleet_assignments_dispatched_total");
        let assignments_completed_total = counter!("taskfleet_assignments_completed_total");
        let assignments_failed_total = counter!("taskfleet_assignments_failed_total");
        let assignment_execution_duration =
            histogram!("taskfleet_assignment_execution_duration_seconds");

        let online_clients = gauge!("taskfleet_online_clients");
        let clients_expired_total = counter!("taskfleet_clients_expired_total");

        let scheduling_pass_duration = histogram!("taskfleet_scheduling_pass_duration_seconds");
        let liveness_sweep_duration = histogram!("taskfleet_liveness_sweep_duration_seconds");
        let task_cycles_started_total = counter!("taskfleet_task_cycles_started_total");

        Ok(Self {
            assignments_dispatched_total,
            assignments_completed_total,
            assignments_failed_total,
            assignment_execution_duration,
            online_clients,
            clients_expired_total,
            scheduling_pass_duration,
            liveness_sweep_duration,
            task_cycles_started_total,
        })
    }

    /// 安装 Prometheus 导出器（进程级全局 recorder）
    pub fn install_prometheus_recorder() -> Result<()> {
        PrometheusBuilder::new().install_recorder()?;
        info!("Prometheus 指标导出器已安装");
        Ok(())
    }

    pub fn record_dispatch(&self, subtask: &str, client_name: &str) {
        self.assignments_dispatched_total.increment(1);
        info!(subtask = subtask, client = client_name, "指派已下发");
    }

    pub fn record_assignment_completed(&self, subtask: &str, duration_seconds: f64) {
        self.assignments_completed_total.increment(1);
        self.assignment_execution_duration.record(duration_seconds);
        info!(
            subtask = subtask,
            duration_seconds = duration_seconds,
            "指派执行完成"
        );
    }

    pub fn record_assignment_failed(&self, subtask: &str, reason: &str) {
        self.assignments_failed_total.increment(1);
        warn!(subtask = subtask, reason = reason, "指派执行失败");
    }

    pub fn update_online_clients(&self, count: f64) {
        self.online_clients.set(count);
    }

    pub fn record_client_expired(&self, client_name: &str) {
        self.clients_expired_total.increment(1);
        warn!(client = client_name, "客户端心跳超时，已判定离线");
    }

    pub fn record_scheduling_pass(&self, duration_seconds: f64) {
        self.scheduling_pass_duration.record(duration_seconds);
    }

    pub fn record_liveness_sweep(&self, duration_seconds: f64) {
        self.liveness_sweep_duration.record(duration_seconds);
    }

    pub fn record_cycle_started(&self, task_id: i64, cycle: i64) {
        self.task_cycles_started_total.increment(1);
        info!(task_id = task_id, cycle = cycle, "任务执行周期已启动");
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        // counter!/gauge!/histogram! 在无 recorder 时退化为 no-op，不会失败
        Self::new().unwrap_or_else(|_| unreachable!())
    }
}
