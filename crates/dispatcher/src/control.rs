use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use taskfleet_domain::{
    FleetError, FleetResult, ScheduleSpec, SubtaskSpec, Task, TaskEvent, TaskRepository,
    TaskStatus,
};
use taskfleet_infrastructure::EventBus;

use crate::dispatch::DispatchEngine;

/// 任务控制服务：创建、取消、查询
pub struct TaskControlService {
    task_repo: Arc<dyn TaskRepository>,
    engine: Arc<DispatchEngine>,
    event_bus: EventBus,
}

impl TaskControlService {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        engine: Arc<DispatchEngine>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            task_repo,
            engine,
            event_bus,
        }
    }

    /// 创建任务
    ///
    /// 调度描述在创建时校验：畸形 CRON 表达式以 InvalidSchedule 同步
    /// 拒绝，从不等到点火时刻才暴露。立即任务创建即点火。
    pub async fn create_task(
        &self,
        name: &str,
        schedule: ScheduleSpec,
        steps: Vec<SubtaskSpec>,
    ) -> FleetResult<Task> {
        if name.trim().is_empty() {
            return Err(FleetError::validation_error("任务名称不能为空"));
        }
        if steps.is_empty() {
            return Err(FleetError::validation_error("任务至少包含一个步骤"));
        }
        schedule.validate()?;

        let mut task = Task::new(name.to_string(), schedule, steps);
        task.next_fire_at = task.schedule.initial_fire(Utc::now())?;
        let created = self.task_repo.create(&task).await?;

        info!(
            "任务 {} ({}) 已创建，首次点火: {:?}",
            created.id, created.name, created.next_fire_at
        );
        self.event_bus
            .publish(TaskEvent::created(created.id, &created.name));

        if matches!(created.schedule, ScheduleSpec::Immediate) {
            self.engine.start_cycle(created.id).await?;
        }

        Ok(self
            .task_repo
            .get_by_id(created.id)
            .await?
            .unwrap_or(created))
    }

    /// 取消任务
    ///
    /// 先把任务置为 Cancelled 并抹掉下次点火，再取消当前周期的全部
    /// 非终态指派；此后迟到的回报会被终态幂等规则拦截。
    pub async fn cancel_task(&self, task_id: i64) -> FleetResult<Task> {
        // 取消在仓储实体锁内落地，并发的周期收尾复查后会放弃写入
        let task = match self.task_repo.cancel(task_id).await? {
            Some(task) => task,
            None => {
                let task = self
                    .task_repo
                    .get_by_id(task_id)
                    .await?
                    .ok_or_else(|| FleetError::task_not_found(task_id))?;
                warn!("任务 {task_id} 已是终态 {:?}，取消为空操作", task.status);
                return Ok(task);
            }
        };
        info!("任务 {} 已取消", task.id);
        self.event_bus
            .publish(TaskEvent::status_changed(task.id, TaskStatus::Cancelled));

        self.engine.cancel_cycle(&task).await?;
        Ok(task)
    }

    pub async fn get_task(&self, task_id: i64) -> FleetResult<Task> {
        self.task_repo
            .get_by_id(task_id)
            .await?
            .ok_or_else(|| FleetError::task_not_found(task_id))
    }

    pub async fn list_tasks(&self) -> FleetResult<Vec<Task>> {
        self.task_repo.list().await
    }
}
