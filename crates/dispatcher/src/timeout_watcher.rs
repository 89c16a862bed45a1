use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use taskfleet_domain::{AssignmentRepository, FleetResult};

use crate::dispatch::DispatchEngine;

/// 执行超时巡检配置
#[derive(Debug, Clone)]
pub struct TimeoutWatcherConfig {
    /// 巡检间隔（秒）
    pub check_interval_seconds: u64,
}

impl Default for TimeoutWatcherConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 5,
        }
    }
}

/// 执行超时巡检器
///
/// 执行超时与心跳超时是相互独立的两个超时域：超过自身截止时刻的
/// 运行中指派以 "execution timeout" 判定失败，目标客户端的存活状态
/// 不受影响（任务慢和客户端死是两种故障）。
pub struct TimeoutWatcher {
    assignment_repo: Arc<dyn AssignmentRepository>,
    engine: Arc<DispatchEngine>,
    config: TimeoutWatcherConfig,
    running: Arc<tokio::sync::RwLock<bool>>,
}

impl TimeoutWatcher {
    pub fn new(
        assignment_repo: Arc<dyn AssignmentRepository>,
        engine: Arc<DispatchEngine>,
        config: Option<TimeoutWatcherConfig>,
    ) -> Self {
        Self {
            assignment_repo,
            engine,
            config: config.unwrap_or_default(),
            running: Arc::new(tokio::sync::RwLock::new(false)),
        }
    }

    /// 执行一轮超时巡检，返回本轮判定超时的指派数
    pub async fn run_check(&self) -> FleetResult<usize> {
        let now = Utc::now();
        let running = self.assignment_repo.list_running().await?;
        let mut timed_out = 0usize;

        for assignment in running {
            let overdue = matches!(assignment.execution_deadline(), Some(deadline) if deadline < now);
            if !overdue {
                continue;
            }
            warn!(
                "指派 {} ({}) 超过执行截止时刻 (超时 {}s)",
                assignment.id, assignment.subtask, assignment.timeout_seconds
            );
            match self
                .engine
                .fail_assignment(assignment.id, "execution timeout")
                .await
            {
                Ok(()) => timed_out += 1,
                Err(e) => error!("处理超时指派 {} 时出错: {e}", assignment.id),
            }
        }

        if timed_out > 0 {
            info!("本轮巡检判定 {timed_out} 个指派执行超时");
        }
        Ok(timed_out)
    }

    /// 启动巡检循环，直到 stop 被调用
    pub async fn start_watching(&self) -> FleetResult<()> {
        info!(
            "启动执行超时巡检循环 (间隔 {}s)",
            self.config.check_interval_seconds
        );
        {
            let mut running = self.running.write().await;
            *running = true;
        }
        let interval = Duration::from_secs(self.config.check_interval_seconds);
        loop {
            if !*self.running.read().await {
                info!("收到停止信号，退出执行超时巡检循环");
                break;
            }
            if let Err(e) = self.run_check().await {
                error!("执行超时巡检出错: {e}");
            }
            tokio::time::sleep(interval).await;
        }
        Ok(())
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!("执行超时巡检停止信号已发送");
    }
}
