#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use serde_json::json;

    use taskfleet_dispatcher::{DispatchEngine, TaskControlService, TaskScheduler};
    use taskfleet_domain::{
        AssignmentRepository, AssignmentStatus, ClientInfo, ClientRepository, FleetError,
        ReportMessage, ScheduleSpec, SubtaskSpec, TaskRepository, TaskStatus,
    };
    use taskfleet_infrastructure::{
        EventBus, InMemoryAssignmentRepository, InMemoryClientRepository, InMemoryMessageQueue,
        InMemoryTaskRepository, MetricsCollector,
    };

    struct Fleet {
        client_repo: Arc<InMemoryClientRepository>,
        task_repo: Arc<InMemoryTaskRepository>,
        assignment_repo: Arc<InMemoryAssignmentRepository>,
        engine: Arc<DispatchEngine>,
        control: TaskControlService,
        scheduler: TaskScheduler,
    }

    fn fleet() -> Fleet {
        let client_repo = Arc::new(InMemoryClientRepository::new());
        let task_repo = Arc::new(InMemoryTaskRepository::new());
        let assignment_repo = Arc::new(InMemoryAssignmentRepository::new());
        let queue = Arc::new(InMemoryMessageQueue::new());
        let event_bus = EventBus::default();
        let metrics = Arc::new(MetricsCollector::new().unwrap());

        let engine = Arc::new(DispatchEngine::new(
            client_repo.clone(),
            task_repo.clone(),
            assignment_repo.clone(),
            queue,
            "assignments".to_string(),
            event_bus.clone(),
            metrics.clone(),
        ));
        let control = TaskControlService::new(task_repo.clone(), engine.clone(), event_bus);
        let scheduler = TaskScheduler::new(task_repo.clone(), engine.clone(), metrics, None);
        Fleet {
            client_repo,
            task_repo,
            assignment_repo,
            engine,
            control,
            scheduler,
        }
    }

    fn single_step() -> Vec<SubtaskSpec> {
        vec![SubtaskSpec {
            subtask: "get_hostname".to_string(),
            target_client: "alice".to_string(),
            order: 0,
            args: json!({}),
            timeout_seconds: 5,
        }]
    }

    async fn online_alice(fleet: &Fleet) {
        fleet
            .client_repo
            .insert(&ClientInfo::new(
                "alice".to_string(),
                "127.0.0.1:9000".to_string(),
                vec![],
            ))
            .await
            .unwrap();
    }

    /// 把任务的点火时间拨到过去，模拟点火时刻到达
    async fn force_due(fleet: &Fleet, task_id: i64) {
        let mut task = fleet.task_repo.get_by_id(task_id).await.unwrap().unwrap();
        task.next_fire_at = Some(Utc::now() - Duration::seconds(1));
        fleet.task_repo.update(&task).await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_cron_fails_at_creation() {
        let fleet = fleet();
        let err = fleet
            .control
            .create_task(
                "broken",
                ScheduleSpec::Cron {
                    expr: "not a cron".to_string(),
                },
                single_step(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::InvalidSchedule { .. }));
        assert!(fleet.control.list_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_steps_rejected() {
        let fleet = fleet();
        let err = fleet
            .control
            .create_task("empty", ScheduleSpec::Immediate, vec![])
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_immediate_task_fires_at_creation() {
        let fleet = fleet();
        online_alice(&fleet).await;
        let task = fleet
            .control
            .create_task("now", ScheduleSpec::Immediate, single_step())
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.current_cycle, 1);
    }

    #[tokio::test]
    async fn test_at_task_waits_for_instant() {
        let fleet = fleet();
        online_alice(&fleet).await;
        let task = fleet
            .control
            .create_task(
                "later",
                ScheduleSpec::At {
                    instant: Utc::now() + Duration::hours(1),
                },
                single_step(),
            )
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        // 时刻未到，扫描不点火
        assert_eq!(fleet.scheduler.scan_and_schedule().await.unwrap(), 0);

        force_due(&fleet, task.id).await;
        assert_eq!(fleet.scheduler.scan_and_schedule().await.unwrap(), 1);
        let task = fleet.control.get_task(task.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        // 固定时刻任务只点火一次
        assert_eq!(task.next_fire_at, None);
    }

    #[tokio::test]
    async fn test_recurring_cycle_does_not_overlap() {
        let fleet = fleet();
        online_alice(&fleet).await;
        let task = fleet
            .control
            .create_task(
                "minutely",
                ScheduleSpec::Cron {
                    expr: "* * * * *".to_string(),
                },
                single_step(),
            )
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.next_fire_at.is_some());

        force_due(&fleet, task.id).await;
        assert_eq!(fleet.scheduler.scan_and_schedule().await.unwrap(), 1);
        let running = fleet.control.get_task(task.id).await.unwrap();
        assert_eq!(running.status, TaskStatus::Running);
        assert_eq!(running.current_cycle, 1);

        // 上一周期未终态时点火时刻再次到达：顺延，不并发启动第二个周期
        force_due(&fleet, task.id).await;
        assert_eq!(fleet.scheduler.scan_and_schedule().await.unwrap(), 0);
        let still_running = fleet.control.get_task(task.id).await.unwrap();
        assert_eq!(still_running.current_cycle, 1);

        // 周期完成后任务重新回到 Pending，被推迟的点火随即执行
        let snapshot = fleet.assignment_repo.snapshot(task.id, 1).await.unwrap();
        fleet
            .engine
            .handle_report(&ReportMessage {
                assignment_id: snapshot[0].id,
                client_name: "alice".to_string(),
                status: AssignmentStatus::Completed,
                result: Some("ok".to_string()),
                error_message: None,
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        let rearmed = fleet.control.get_task(task.id).await.unwrap();
        assert_eq!(rearmed.status, TaskStatus::Pending);

        assert_eq!(fleet.scheduler.scan_and_schedule().await.unwrap(), 1);
        assert_eq!(fleet.control.get_task(task.id).await.unwrap().current_cycle, 2);
        // 第二个周期追加新的指派记录，历史只增不改
        assert_eq!(fleet.assignment_repo.snapshot(task.id, 1).await.unwrap().len(), 1);
        assert_eq!(fleet.assignment_repo.snapshot(task.id, 2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_recurring_task_rearms_after_failure() {
        let fleet = fleet();
        // 目标不在线：周期立即失败，但周期任务没有终态
        let task = fleet
            .control
            .create_task(
                "flaky",
                ScheduleSpec::Cron {
                    expr: "*/5 * * * *".to_string(),
                },
                single_step(),
            )
            .await
            .unwrap();

        force_due(&fleet, task.id).await;
        assert_eq!(fleet.scheduler.scan_and_schedule().await.unwrap(), 1);

        let task = fleet.control.get_task(task.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.next_fire_at.is_some());
        let snapshot = fleet.assignment_repo.snapshot(task.id, 1).await.unwrap();
        assert_eq!(snapshot[0].status, AssignmentStatus::Failed);
    }
}
