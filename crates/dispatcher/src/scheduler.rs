use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info};

use taskfleet_domain::{FleetResult, Task, TaskRepository, TaskStatus};
use taskfleet_infrastructure::MetricsCollector;

use crate::dispatch::DispatchEngine;

/// 点火扫描配置
#[derive(Debug, Clone)]
pub struct TaskSchedulerConfig {
    /// 扫描周期（秒）。定时精度以此为界：固定时刻与周期任务的点火
    /// 最多延迟一个扫描周期（默认 10 秒粒度）。
    pub schedule_interval_seconds: u64,
}

impl Default for TaskSchedulerConfig {
    fn default() -> Self {
        Self {
            schedule_interval_seconds: 10,
        }
    }
}

/// 任务点火扫描器
///
/// 周期性扫描任务表，把到达点火时间的 Pending 任务交给分发引擎。
/// 不重叠保证由状态机承担：上一周期未终态的任务仍是 Running，本轮
/// 扫描不点火，点火时间保留到任务回到 Pending 后顺延执行。
pub struct TaskScheduler {
    task_repo: Arc<dyn TaskRepository>,
    engine: Arc<DispatchEngine>,
    metrics: Arc<MetricsCollector>,
    config: TaskSchedulerConfig,
    running: Arc<tokio::sync::RwLock<bool>>,
}

impl TaskScheduler {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        engine: Arc<DispatchEngine>,
        metrics: Arc<MetricsCollector>,
        config: Option<TaskSchedulerConfig>,
    ) -> Self {
        Self {
            task_repo,
            engine,
            metrics,
            config: config.unwrap_or_default(),
            running: Arc::new(tokio::sync::RwLock::new(false)),
        }
    }

    fn is_due(task: &Task, now: chrono::DateTime<chrono::Utc>) -> bool {
        if task.status != TaskStatus::Pending {
            return false;
        }
        matches!(task.next_fire_at, Some(fire) if fire <= now)
    }

    /// 执行一轮点火扫描，返回本轮点火的任务数
    pub async fn scan_and_schedule(&self) -> FleetResult<usize> {
        let start = std::time::Instant::now();
        let now = Utc::now();
        let tasks = self.task_repo.list().await?;
        let mut fired = 0usize;

        for task in tasks {
            if !Self::is_due(&task, now) {
                continue;
            }
            debug!("任务 {} ({}) 到达点火时间", task.id, task.name);
            match self.engine.start_cycle(task.id).await {
                Ok(()) => fired += 1,
                Err(e) => error!("点火任务 {} 时出错: {e}", task.id),
            }
        }

        self.metrics
            .record_scheduling_pass(start.elapsed().as_secs_f64());
        if fired > 0 {
            info!("本轮扫描点火了 {fired} 个任务");
        }
        Ok(fired)
    }

    /// 启动扫描循环，直到 stop 被调用
    pub async fn start_scanning(&self) -> FleetResult<()> {
        info!(
            "启动任务点火扫描循环 (间隔 {}s)",
            self.config.schedule_interval_seconds
        );
        {
            let mut running = self.running.write().await;
            *running = true;
        }
        let interval = Duration::from_secs(self.config.schedule_interval_seconds);
        loop {
            if !*self.running.read().await {
                info!("收到停止信号，退出点火扫描循环");
                break;
            }
            if let Err(e) = self.scan_and_schedule().await {
                error!("点火扫描出错: {e}");
            }
            tokio::time::sleep(interval).await;
        }
        Ok(())
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!("点火扫描停止信号已发送");
    }
}
