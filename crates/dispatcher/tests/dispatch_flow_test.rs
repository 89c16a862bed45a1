#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::json;
    use tokio::sync::broadcast::error::TryRecvError;

    use taskfleet_dispatcher::{DispatchEngine, TaskControlService, TimeoutWatcher};
    use taskfleet_domain::{
        AssignmentRepository, AssignmentStatus, ClientInfo, ClientRepository, ClientStatus,
        FleetEvent, MessageQueue, ReportMessage, ScheduleSpec, SubtaskSpec, TaskEvent,
        TaskRepository, TaskStatus,
    };
    use taskfleet_infrastructure::{
        EventBus, InMemoryAssignmentRepository, InMemoryClientRepository, InMemoryMessageQueue,
        InMemoryTaskRepository, MetricsCollector,
    };

    struct Fleet {
        client_repo: Arc<InMemoryClientRepository>,
        task_repo: Arc<InMemoryTaskRepository>,
        assignment_repo: Arc<InMemoryAssignmentRepository>,
        queue: Arc<InMemoryMessageQueue>,
        event_bus: EventBus,
        engine: Arc<DispatchEngine>,
        control: TaskControlService,
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
            queue.clone(),
            "assignments".to_string(),
            event_bus.clone(),
            metrics,
        ));
        let control =
            TaskControlService::new(task_repo.clone(), engine.clone(), event_bus.clone());
        Fleet {
            client_repo,
            task_repo,
            assignment_repo,
            queue,
            event_bus,
            engine,
            control,
        }
    }

    async fn online_client(fleet: &Fleet, name: &str) {
        fleet
            .client_repo
            .insert(&ClientInfo::new(
                name.to_string(),
                "127.0.0.1:9000".to_string(),
                vec!["shell".to_string()],
            ))
            .await
            .unwrap();
    }

    async fn offline_client(fleet: &Fleet, name: &str) {
        let mut client = ClientInfo::new(name.to_string(), "127.0.0.1:9000".to_string(), vec![]);
        client.status = ClientStatus::Offline;
        fleet.client_repo.insert(&client).await.unwrap();
    }

    fn step(subtask: &str, client: &str, order: i32, timeout_seconds: i64) -> SubtaskSpec {
        SubtaskSpec {
            subtask: subtask.to_string(),
            target_client: client.to_string(),
            order,
            args: json!({}),
            timeout_seconds,
        }
    }

    async fn report(
        fleet: &Fleet,
        assignment_id: i64,
        client: &str,
        status: AssignmentStatus,
        result: Option<&str>,
        error: Option<&str>,
    ) {
        fleet
            .engine
            .handle_report(&ReportMessage {
                assignment_id,
                client_name: client.to_string(),
                status,
                result: result.map(str::to_string),
                error_message: error.map(str::to_string),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
    }

    fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<FleetEvent>) -> Vec<FleetEvent> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
        events
    }

    #[tokio::test]
    async fn test_single_step_completion_scenario() {
        let fleet = fleet();
        let mut rx = fleet.event_bus.subscribe();
        online_client(&fleet, "alice").await;

        let task = fleet
            .control
            .create_task(
                "hostname-probe",
                ScheduleSpec::Immediate,
                vec![step("get_hostname", "alice", 0, 5)],
            )
            .await
            .unwrap();

        // 投递后：指派 Running、alice Busy、消息落在 alice 的指派队列
        let snapshot = fleet.assignment_repo.snapshot(task.id, 1).await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status, AssignmentStatus::Running);
        let alice = fleet.client_repo.get("alice").await.unwrap().unwrap();
        assert_eq!(alice.status, ClientStatus::Busy);
        assert_eq!(alice.active_assignment, Some(snapshot[0].id));
        assert_eq!(fleet.queue.get_queue_size("assignments.alice").await.unwrap(), 1);

        report(
            &fleet,
            snapshot[0].id,
            "alice",
            AssignmentStatus::Completed,
            Some("alice-host"),
            None,
        )
        .await;

        let stored = fleet
            .assignment_repo
            .get_by_id(snapshot[0].id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, AssignmentStatus::Completed);
        assert_eq!(stored.result.as_deref(), Some("alice-host"));
        assert_eq!(
            fleet.control.get_task(task.id).await.unwrap().status,
            TaskStatus::Completed
        );
        assert_eq!(
            fleet.client_repo.get("alice").await.unwrap().unwrap().status,
            ClientStatus::Online
        );

        // 恰好一个 Completed 的任务状态事件
        let completed_events = drain_events(&mut rx)
            .into_iter()
            .filter(|e| {
                matches!(
                    e,
                    FleetEvent::Task(TaskEvent::TaskStatusChanged {
                        status: TaskStatus::Completed,
                        ..
                    })
                )
            })
            .count();
        assert_eq!(completed_events, 1);
    }

    #[tokio::test]
    async fn test_order_group_gating() {
        let fleet = fleet();
        online_client(&fleet, "alice").await;
        online_client(&fleet, "bob").await;

        let task = fleet
            .control
            .create_task(
                "two-stage",
                ScheduleSpec::Immediate,
                vec![step("get_hostname", "alice", 0, 5), step("shell", "bob", 1, 5)],
            )
            .await
            .unwrap();

        let snapshot = fleet.assignment_repo.snapshot(task.id, 1).await.unwrap();
        let first = snapshot.iter().find(|a| a.order == 0).unwrap();
        let second = snapshot.iter().find(|a| a.order == 1).unwrap();

        // order 0 未终态时 order 1 绝不投递
        assert_eq!(first.status, AssignmentStatus::Running);
        assert_eq!(second.status, AssignmentStatus::Pending);
        assert_eq!(
            fleet.client_repo.get("bob").await.unwrap().unwrap().status,
            ClientStatus::Online
        );

        report(&fleet, first.id, "alice", AssignmentStatus::Completed, Some("ok"), None).await;

        let second = fleet
            .assignment_repo
            .get_by_id(second.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.status, AssignmentStatus::Running);
        assert_eq!(
            fleet.client_repo.get("bob").await.unwrap().unwrap().status,
            ClientStatus::Busy
        );
    }

    #[tokio::test]
    async fn test_partial_failure_isolation() {
        let fleet = fleet();
        online_client(&fleet, "alice").await;
        online_client(&fleet, "bob").await;
        offline_client(&fleet, "carol").await;

        let task = fleet
            .control
            .create_task(
                "fan-out",
                ScheduleSpec::Immediate,
                vec![
                    step("shell", "alice", 0, 5),
                    step("shell", "bob", 0, 5),
                    step("shell", "carol", 0, 5),
                ],
            )
            .await
            .unwrap();

        let snapshot = fleet.assignment_repo.snapshot(task.id, 1).await.unwrap();
        let carol = snapshot.iter().find(|a| a.client_name == "carol").unwrap();
        assert_eq!(carol.status, AssignmentStatus::Failed);
        assert_eq!(carol.error_message.as_deref(), Some("client unavailable"));

        // 其余两个指派照常执行，任务不会立即失败
        for name in ["alice", "bob"] {
            let a = snapshot.iter().find(|a| a.client_name == name).unwrap();
            assert_eq!(a.status, AssignmentStatus::Running);
        }
        assert_eq!(
            fleet.control.get_task(task.id).await.unwrap().status,
            TaskStatus::Running
        );

        // 组内全部终态后，失败组使任务派生为 Failed
        let alice = snapshot.iter().find(|a| a.client_name == "alice").unwrap();
        let bob = snapshot.iter().find(|a| a.client_name == "bob").unwrap();
        report(&fleet, alice.id, "alice", AssignmentStatus::Completed, Some("ok"), None).await;
        report(&fleet, bob.id, "bob", AssignmentStatus::Completed, Some("ok"), None).await;
        assert_eq!(
            fleet.control.get_task(task.id).await.unwrap().status,
            TaskStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_failed_group_cancels_higher_orders() {
        let fleet = fleet();
        online_client(&fleet, "alice").await;
        online_client(&fleet, "bob").await;

        let task = fleet
            .control
            .create_task(
                "gated",
                ScheduleSpec::Immediate,
                vec![step("shell", "alice", 0, 5), step("shell", "bob", 1, 5)],
            )
            .await
            .unwrap();

        let snapshot = fleet.assignment_repo.snapshot(task.id, 1).await.unwrap();
        let first = snapshot.iter().find(|a| a.order == 0).unwrap();
        report(&fleet, first.id, "alice", AssignmentStatus::Failed, None, Some("boom")).await;

        let second = snapshot.iter().find(|a| a.order == 1).unwrap();
        let second = fleet
            .assignment_repo
            .get_by_id(second.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.status, AssignmentStatus::Cancelled);
        assert_eq!(
            fleet.control.get_task(task.id).await.unwrap().status,
            TaskStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_duplicate_report_is_discarded() {
        let fleet = fleet();
        online_client(&fleet, "alice").await;

        let task = fleet
            .control
            .create_task(
                "idempotent",
                ScheduleSpec::Immediate,
                vec![step("get_hostname", "alice", 0, 5)],
            )
            .await
            .unwrap();
        let snapshot = fleet.assignment_repo.snapshot(task.id, 1).await.unwrap();

        report(
            &fleet,
            snapshot[0].id,
            "alice",
            AssignmentStatus::Completed,
            Some("alice-host"),
            None,
        )
        .await;
        // 同一终局的第二次回报被记录并丢弃，存储状态不变
        report(
            &fleet,
            snapshot[0].id,
            "alice",
            AssignmentStatus::Failed,
            None,
            Some("late duplicate"),
        )
        .await;

        let stored = fleet
            .assignment_repo
            .get_by_id(snapshot[0].id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, AssignmentStatus::Completed);
        assert_eq!(stored.result.as_deref(), Some("alice-host"));
        assert_eq!(
            fleet.control.get_task(task.id).await.unwrap().status,
            TaskStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_execution_timeout_leaves_liveness_untouched() {
        let fleet = fleet();
        online_client(&fleet, "alice").await;

        // 超时设为 0 秒，投递后立即过截止时刻
        let task = fleet
            .control
            .create_task(
                "slow-probe",
                ScheduleSpec::Immediate,
                vec![step("get_hostname", "alice", 0, 0)],
            )
            .await
            .unwrap();

        let watcher = TimeoutWatcher::new(fleet.assignment_repo.clone(), fleet.engine.clone(), None);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let timed_out = watcher.run_check().await.unwrap();
        assert_eq!(timed_out, 1);

        let snapshot = fleet.assignment_repo.snapshot(task.id, 1).await.unwrap();
        assert_eq!(snapshot[0].status, AssignmentStatus::Failed);
        assert_eq!(snapshot[0].error_message.as_deref(), Some("execution timeout"));
        assert_eq!(
            fleet.control.get_task(task.id).await.unwrap().status,
            TaskStatus::Failed
        );
        // 任务慢不等于客户端死：alice 的存活状态不受影响
        assert_eq!(
            fleet.client_repo.get("alice").await.unwrap().unwrap().status,
            ClientStatus::Online
        );
    }

    #[tokio::test]
    async fn test_cancel_task_suppresses_inflight_report() {
        let fleet = fleet();
        online_client(&fleet, "alice").await;

        let task = fleet
            .control
            .create_task(
                "doomed",
                ScheduleSpec::Immediate,
                vec![step("shell", "alice", 0, 30)],
            )
            .await
            .unwrap();
        let snapshot = fleet.assignment_repo.snapshot(task.id, 1).await.unwrap();
        assert_eq!(snapshot[0].status, AssignmentStatus::Running);

        let cancelled = fleet.control.cancel_task(task.id).await.unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert_eq!(cancelled.next_fire_at, None);

        let stored = fleet
            .assignment_repo
            .get_by_id(snapshot[0].id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, AssignmentStatus::Cancelled);
        assert_eq!(
            fleet.client_repo.get("alice").await.unwrap().unwrap().status,
            ClientStatus::Online
        );

        // 迟到的回报不能重新打开已取消的任务
        report(
            &fleet,
            snapshot[0].id,
            "alice",
            AssignmentStatus::Completed,
            Some("too late"),
            None,
        )
        .await;
        let stored = fleet
            .assignment_repo
            .get_by_id(snapshot[0].id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, AssignmentStatus::Cancelled);
        assert_eq!(
            fleet.control.get_task(task.id).await.unwrap().status,
            TaskStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_report_from_wrong_client_is_discarded() {
        let fleet = fleet();
        online_client(&fleet, "alice").await;
        online_client(&fleet, "mallory").await;

        let task = fleet
            .control
            .create_task(
                "targeted",
                ScheduleSpec::Immediate,
                vec![step("shell", "alice", 0, 30)],
            )
            .await
            .unwrap();
        let snapshot = fleet.assignment_repo.snapshot(task.id, 1).await.unwrap();
        assert_eq!(snapshot[0].status, AssignmentStatus::Running);

        // 非目标客户端的回报被丢弃，指派照常在途
        report(
            &fleet,
            snapshot[0].id,
            "mallory",
            AssignmentStatus::Completed,
            Some("spoofed"),
            None,
        )
        .await;

        let stored = fleet
            .assignment_repo
            .get_by_id(snapshot[0].id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, AssignmentStatus::Running);
        assert!(stored.result.is_none());
        assert_eq!(
            fleet.control.get_task(task.id).await.unwrap().status,
            TaskStatus::Running
        );

        // 真正的目标客户端仍然可以收尾
        report(
            &fleet,
            snapshot[0].id,
            "alice",
            AssignmentStatus::Completed,
            Some("alice-host"),
            None,
        )
        .await;
        assert_eq!(
            fleet.control.get_task(task.id).await.unwrap().status,
            TaskStatus::Completed
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_survives_racing_cycle_completion() {
        // 周期任务的取消与回报驱动的周期收尾竞争：无论交错顺序如何，
        // 收尾都不得用重排回 Pending 覆盖已落地的取消
        for round in 0..200 {
            let fleet = fleet();
            online_client(&fleet, "alice").await;

            let task = fleet
                .control
                .create_task(
                    "recurring-sweep",
                    ScheduleSpec::Cron {
                        expr: "* * * * *".to_string(),
                    },
                    vec![step("shell", "alice", 0, 30)],
                )
                .await
                .unwrap();

            let mut due = fleet.control.get_task(task.id).await.unwrap();
            due.next_fire_at = Some(Utc::now() - chrono::Duration::seconds(1));
            fleet.task_repo.update(&due).await.unwrap();
            fleet.engine.start_cycle(task.id).await.unwrap();

            let snapshot = fleet.assignment_repo.snapshot(task.id, 1).await.unwrap();
            let report_msg = ReportMessage {
                assignment_id: snapshot[0].id,
                client_name: "alice".to_string(),
                status: AssignmentStatus::Completed,
                result: Some("ok".to_string()),
                error_message: None,
                timestamp: Utc::now(),
            };

            let engine = fleet.engine.clone();
            let report_handle =
                tokio::spawn(async move { engine.handle_report(&report_msg).await });
            let cancelled = fleet.control.cancel_task(task.id).await.unwrap();
            report_handle.await.unwrap().unwrap();

            assert_eq!(cancelled.status, TaskStatus::Cancelled);
            let finale = fleet.control.get_task(task.id).await.unwrap();
            assert_eq!(
                finale.status,
                TaskStatus::Cancelled,
                "第 {round} 轮：取消被周期收尾覆盖 (下次点火 {:?})",
                finale.next_fire_at
            );
            assert!(finale.next_fire_at.is_none());
        }
    }

    #[tokio::test]
    async fn test_immediate_task_with_no_online_target_fails() {
        let fleet = fleet();
        offline_client(&fleet, "ghost").await;

        let task = fleet
            .control
            .create_task(
                "nowhere",
                ScheduleSpec::Immediate,
                vec![step("shell", "ghost", 0, 5)],
            )
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        let snapshot = fleet.assignment_repo.snapshot(task.id, 1).await.unwrap();
        assert_eq!(snapshot[0].status, AssignmentStatus::Failed);
        assert_eq!(snapshot[0].error_message.as_deref(), Some("client unavailable"));
    }
}
