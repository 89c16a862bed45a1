use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use taskfleet_domain::{
    assignment_queue_name, Assignment, AssignmentMessage, AssignmentRepository, AssignmentStatus,
    ClientRepository, FleetResult, Message, MessageQueue, ReportMessage, Task, TaskEvent,
    TaskRepository, TaskStatus,
};
use taskfleet_infrastructure::{EventBus, MetricsCollector};

/// 一个执行周期的推进判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleState {
    /// 有指派仍在执行，等待回报
    InFlight,
    /// 指定 order 组可以投递
    DispatchGroup(i32),
    /// 指定 order 组已全部终态且含失败，周期到此为止
    GroupFailed(i32),
    /// 全部指派成功完成
    AllCompleted,
}

/// 分发引擎
///
/// 将点火的任务展开为按周期留存的指派记录，逐 order 组投递到目标客户端
/// 的指派队列，并根据回报、超时和客户端失联推进周期直到派生出终态。
pub struct DispatchEngine {
    client_repo: Arc<dyn ClientRepository>,
    task_repo: Arc<dyn TaskRepository>,
    assignment_repo: Arc<dyn AssignmentRepository>,
    message_queue: Arc<dyn MessageQueue>,
    assignment_prefix: String,
    event_bus: EventBus,
    metrics: Arc<MetricsCollector>,
}

impl DispatchEngine {
    pub fn new(
        client_repo: Arc<dyn ClientRepository>,
        task_repo: Arc<dyn TaskRepository>,
        assignment_repo: Arc<dyn AssignmentRepository>,
        message_queue: Arc<dyn MessageQueue>,
        assignment_prefix: String,
        event_bus: EventBus,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            client_repo,
            task_repo,
            assignment_repo,
            message_queue,
            assignment_prefix,
            event_bus,
            metrics,
        }
    }

    /// 启动任务的一个执行周期
    ///
    /// 为全部步骤追加本周期的指派记录（更高 order 的记录先建后发），
    /// 周期任务在点火时即预排下一次点火时间：若周期结束时该时刻已经
    /// 过去，下一轮顺延执行而不是被跳过。
    pub async fn start_cycle(&self, task_id: i64) -> FleetResult<()> {
        // 点火在仓储实体锁内复查 Pending，扫描与立即点火竞争时只有一个赢家
        let task = match self.task_repo.begin_cycle(task_id, Utc::now()).await? {
            Some(task) => task,
            None => {
                debug!("任务 {task_id} 不存在或不处于 Pending，不点火");
                return Ok(());
            }
        };

        info!(
            "任务 {} ({}) 启动第 {} 个执行周期，共 {} 个步骤",
            task.id,
            task.name,
            task.current_cycle,
            task.steps.len()
        );
        self.event_bus
            .publish(TaskEvent::status_changed(task.id, TaskStatus::Running));
        self.metrics.record_cycle_started(task.id, task.current_cycle);

        for step in &task.steps {
            self.assignment_repo
                .create(&Assignment::new(task.id, task.current_cycle, step))
                .await?;
        }

        self.advance(task.id, task.current_cycle).await
    }

    /// 推进指定周期：投递下一个可投递的 order 组，或派生周期终态
    ///
    /// 属于旧周期或已取消任务的迟到推进请求被直接忽略。
    pub async fn advance(&self, task_id: i64, cycle: i64) -> FleetResult<()> {
        loop {
            let task = match self.task_repo.get_by_id(task_id).await? {
                Some(task) => task,
                None => return Ok(()),
            };
            if task.current_cycle != cycle || task.status != TaskStatus::Running {
                debug!(
                    "任务 {} 周期 {cycle} 的推进请求已过期 (当前周期 {}, 状态 {:?})",
                    task.id, task.current_cycle, task.status
                );
                return Ok(());
            }

            let snapshot = self.assignment_repo.snapshot(task_id, cycle).await?;
            match Self::evaluate(&snapshot) {
                CycleState::InFlight => return Ok(()),
                CycleState::DispatchGroup(order) => {
                    let delivered = self.dispatch_group(cycle, order, &snapshot).await?;
                    if delivered > 0 {
                        return Ok(());
                    }
                    // 整组未能投递（目标全部离线等），重新评估周期
                }
                CycleState::GroupFailed(order) => {
                    self.cancel_after_failed_group(&snapshot, order).await?;
                    self.finish_cycle(&task, TaskStatus::Failed).await?;
                    return Ok(());
                }
                CycleState::AllCompleted => {
                    self.finish_cycle(&task, TaskStatus::Completed).await?;
                    return Ok(());
                }
            }
        }
    }

    /// 从一致性快照判定周期的下一步
    ///
    /// 按 order 升序检查各组：组内全部终态且无失败才放行下一组。
    fn evaluate(snapshot: &[Assignment]) -> CycleState {
        let mut orders: Vec<i32> = snapshot.iter().map(|a| a.order).collect();
        orders.sort_unstable();
        orders.dedup();

        for order in orders {
            let group: Vec<&Assignment> =
                snapshot.iter().filter(|a| a.order == order).collect();
            if group.iter().all(|a| a.is_terminal()) {
                if group
                    .iter()
                    .any(|a| a.status == AssignmentStatus::Failed)
                {
                    return CycleState::GroupFailed(order);
                }
                continue;
            }
            if group.iter().any(|a| a.is_running()) {
                return CycleState::InFlight;
            }
            return CycleState::DispatchGroup(order);
        }
        CycleState::AllCompleted
    }

    /// 投递一个 order 组内的全部待投递指派，返回成功投递数
    ///
    /// 组内各指派独立尝试：某个目标离线只使该指派以 "client unavailable"
    /// 失败，其余指派照常投递（部分失败，而非全有全无）。
    async fn dispatch_group(
        &self,
        cycle: i64,
        order: i32,
        snapshot: &[Assignment],
    ) -> FleetResult<usize> {
        let mut delivered = 0usize;
        let pending = snapshot
            .iter()
            .filter(|a| a.order == order && a.status == AssignmentStatus::Pending);

        for assignment in pending {
            let online = self
                .client_repo
                .get(&assignment.client_name)
                .await?
                .map(|c| c.is_online())
                .unwrap_or(false);
            if !online {
                warn!(
                    "指派 {} 的目标客户端 {} 不在线，直接判定失败",
                    assignment.id, assignment.client_name
                );
                self.finish_assignment_internal(
                    assignment.id,
                    AssignmentStatus::Failed,
                    None,
                    Some("client unavailable".to_string()),
                )
                .await?;
                continue;
            }

            // 分发期间被取消的指派在这里拿不到 Running，放弃投递
            let running = match self.assignment_repo.mark_running(assignment.id).await? {
                Some(running) => running,
                None => {
                    debug!("指派 {} 已进入终态，放弃投递", assignment.id);
                    continue;
                }
            };
            self.client_repo
                .mark_busy(&running.client_name, running.id)
                .await?;

            let message =
                Message::assignment_delivery(AssignmentMessage::from_assignment(&running));
            let queue = assignment_queue_name(&self.assignment_prefix, &running.client_name);
            match self.message_queue.publish_message(&queue, &message).await {
                Ok(()) => {
                    delivered += 1;
                    info!(
                        "指派 {} ({}) 已投递到客户端 {} (任务 {} 周期 {cycle} order {order})",
                        running.id, running.subtask, running.client_name, running.task_id
                    );
                    self.metrics
                        .record_dispatch(&running.subtask, &running.client_name);
                    self.event_bus.publish(TaskEvent::assignment_changed(
                        running.task_id,
                        running.id,
                        &running.subtask,
                        &running.client_name,
                        AssignmentStatus::Running,
                        None,
                    ));
                }
                Err(e) => {
                    warn!("指派 {} 投递失败: {e}", running.id);
                    self.client_repo.mark_idle(&running.client_name).await?;
                    self.finish_assignment_internal(
                        running.id,
                        AssignmentStatus::Failed,
                        None,
                        Some(format!("投递失败: {e}")),
                    )
                    .await?;
                }
            }
        }
        Ok(delivered)
    }

    /// 处理客户端回报的执行结果
    ///
    /// 对重复回报幂等：已终态指派的第二次回报记录日志后丢弃，不再推进。
    pub async fn handle_report(&self, report: &ReportMessage) -> FleetResult<()> {
        if !report.status.is_terminal() {
            warn!(
                "忽略指派 {} 的非终态回报: {:?}",
                report.assignment_id, report.status
            );
            return Ok(());
        }

        // 指派的目标客户端在创建后不变，冒名回报在这里拦截
        if let Some(target) = self.assignment_repo.get_by_id(report.assignment_id).await? {
            if target.client_name != report.client_name {
                warn!(
                    "丢弃客户端 {} 对指派 {} 的回报，该指派的目标客户端为 {}",
                    report.client_name, report.assignment_id, target.client_name
                );
                return Ok(());
            }
        }

        let finished = self
            .assignment_repo
            .finish(
                report.assignment_id,
                report.status,
                report.result.clone(),
                report.error_message.clone(),
            )
            .await?;
        let assignment = match finished {
            Some(assignment) => assignment,
            None => {
                warn!(
                    "指派 {} 已是终态，丢弃来自 {} 的重复回报",
                    report.assignment_id, report.client_name
                );
                return Ok(());
            }
        };

        info!(
            "指派 {} 由客户端 {} 回报为 {:?}",
            assignment.id, report.client_name, assignment.status
        );
        self.release_client(&assignment).await?;
        self.publish_assignment_event(&assignment, assignment.error_message.clone());
        match assignment.status {
            AssignmentStatus::Completed => {
                let duration = assignment
                    .execution_duration_ms()
                    .map(|ms| ms as f64 / 1000.0)
                    .unwrap_or(0.0);
                self.metrics
                    .record_assignment_completed(&assignment.subtask, duration);
            }
            AssignmentStatus::Failed => {
                self.metrics.record_assignment_failed(
                    &assignment.subtask,
                    assignment.error_message.as_deref().unwrap_or("unknown"),
                );
            }
            _ => {}
        }

        self.advance(assignment.task_id, assignment.cycle).await
    }

    /// 以指定原因将指派判定失败并推进其周期
    ///
    /// 存活巡检（"client timeout"）、注销（"client removed"）和执行超时
    /// 巡检（"execution timeout"）都走这条路径。执行超时不影响客户端的
    /// 存活状态：任务慢和客户端死是两种故障。
    pub async fn fail_assignment(&self, assignment_id: i64, reason: &str) -> FleetResult<()> {
        let finished = self
            .assignment_repo
            .finish(
                assignment_id,
                AssignmentStatus::Failed,
                None,
                Some(reason.to_string()),
            )
            .await?;
        let assignment = match finished {
            Some(assignment) => assignment,
            None => {
                debug!("指派 {assignment_id} 已是终态，跳过失败判定 ({reason})");
                return Ok(());
            }
        };

        warn!("指派 {} 判定失败: {reason}", assignment.id);
        self.release_client(&assignment).await?;
        self.publish_assignment_event(&assignment, Some(reason.to_string()));
        self.metrics
            .record_assignment_failed(&assignment.subtask, reason);

        self.advance(assignment.task_id, assignment.cycle).await
    }

    /// 取消任务当前周期的全部非终态指派
    ///
    /// 调用方须已将任务置为 Cancelled；此后迟到的回报会被终态幂等规则
    /// 拦截，不会重新打开任务。
    pub async fn cancel_cycle(&self, task: &Task) -> FleetResult<()> {
        let snapshot = self
            .assignment_repo
            .snapshot(task.id, task.current_cycle)
            .await?;
        for assignment in snapshot.iter().filter(|a| !a.is_terminal()) {
            let cancelled = self
                .assignment_repo
                .finish(assignment.id, AssignmentStatus::Cancelled, None, None)
                .await?;
            if let Some(cancelled) = cancelled {
                self.release_client(&cancelled).await?;
                self.publish_assignment_event(&cancelled, None);
            }
        }
        Ok(())
    }

    /// 周期收尾：写入派生终态，周期任务重新回到 Pending 等待下次点火
    ///
    /// 终态写入与重排在仓储实体锁内一次完成，并发取消赢得竞争时这里
    /// 拿到 None，派生终态被放弃而不是覆盖取消。
    async fn finish_cycle(&self, task: &Task, status: TaskStatus) -> FleetResult<()> {
        let finished = match self
            .task_repo
            .finish_cycle(task.id, task.current_cycle, status)
            .await?
        {
            Some(finished) => finished,
            None => {
                debug!(
                    "任务 {} 周期 {} 的收尾被并发状态变更抢先，放弃",
                    task.id, task.current_cycle
                );
                return Ok(());
            }
        };

        info!(
            "任务 {} 第 {} 个周期结束: {:?}",
            finished.id, finished.current_cycle, status
        );
        self.event_bus
            .publish(TaskEvent::status_changed(finished.id, status));

        if finished.status == TaskStatus::Pending {
            debug!(
                "周期任务 {} 重新回到 Pending，下次点火: {:?}",
                finished.id, finished.next_fire_at
            );
            self.event_bus
                .publish(TaskEvent::status_changed(finished.id, TaskStatus::Pending));
        }
        Ok(())
    }

    /// 失败组之后的更高 order 指派不再执行，统一置为 Cancelled
    async fn cancel_after_failed_group(
        &self,
        snapshot: &[Assignment],
        failed_order: i32,
    ) -> FleetResult<()> {
        for assignment in snapshot
            .iter()
            .filter(|a| a.order > failed_order && !a.is_terminal())
        {
            let cancelled = self
                .assignment_repo
                .finish(assignment.id, AssignmentStatus::Cancelled, None, None)
                .await?;
            if let Some(cancelled) = cancelled {
                self.publish_assignment_event(&cancelled, None);
            }
        }
        Ok(())
    }

    /// 仅当客户端仍持有该指派时才释放，避免覆盖更新的占用关系
    async fn release_client(&self, assignment: &Assignment) -> FleetResult<()> {
        if let Some(client) = self.client_repo.get(&assignment.client_name).await? {
            if client.active_assignment == Some(assignment.id) {
                self.client_repo.mark_idle(&assignment.client_name).await?;
            }
        }
        Ok(())
    }

    fn publish_assignment_event(&self, assignment: &Assignment, reason: Option<String>) {
        self.event_bus.publish(TaskEvent::assignment_changed(
            assignment.task_id,
            assignment.id,
            &assignment.subtask,
            &assignment.client_name,
            assignment.status,
            reason,
        ));
    }

    /// 未经过投递的内部失败路径（目标离线、发送失败）
    async fn finish_assignment_internal(
        &self,
        assignment_id: i64,
        status: AssignmentStatus,
        result: Option<String>,
        error_message: Option<String>,
    ) -> FleetResult<()> {
        let finished = self
            .assignment_repo
            .finish(assignment_id, status, result, error_message.clone())
            .await?;
        if let Some(assignment) = finished {
            self.publish_assignment_event(&assignment, error_message);
            self.metrics.record_assignment_failed(
                &assignment.subtask,
                assignment.error_message.as_deref().unwrap_or("unknown"),
            );
        }
        Ok(())
    }
}
