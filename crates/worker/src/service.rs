use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use taskfleet_domain::{
    assignment_queue_name, AssignmentMessage, AssignmentStatus, FleetResult, Message, MessageQueue,
    MessageType, ReportMessage,
};

use crate::executors::ExecutorRegistry;

/// 客户端服务
///
/// 轮询自己的指派队列，通过执行器目录执行子任务，并把结果发布到
/// 共享回报队列。执行带客户端侧超时保护；服务端的超时巡检仍是
/// 权威判定。
pub struct ClientService {
    client_name: String,
    executors: ExecutorRegistry,
    message_queue: Arc<dyn MessageQueue>,
    assignment_queue: String,
    reports_queue: String,
    poll_interval_ms: u64,
}

impl ClientService {
    pub fn new(
        client_name: String,
        executors: ExecutorRegistry,
        message_queue: Arc<dyn MessageQueue>,
        assignment_prefix: &str,
        reports_queue: String,
        poll_interval_ms: u64,
    ) -> Self {
        let assignment_queue = assignment_queue_name(assignment_prefix, &client_name);
        Self {
            client_name,
            executors,
            message_queue,
            assignment_queue,
            reports_queue,
            poll_interval_ms,
        }
    }

    /// 声明的能力标签（即执行器目录中的注册名）
    pub fn capabilities(&self) -> Vec<String> {
        self.executors.names()
    }

    /// 消费指派队列一次并执行全部到达的指派，返回处理数
    pub async fn poll_once(&self) -> FleetResult<usize> {
        let messages = self
            .message_queue
            .consume_messages(&self.assignment_queue)
            .await?;
        let mut processed = 0usize;
        for message in &messages {
            match &message.message_type {
                MessageType::AssignmentDelivery(assignment) => {
                    self.execute_assignment(assignment).await;
                    processed += 1;
                }
                other => {
                    debug!("忽略指派队列中的消息: {:?}", other);
                }
            }
        }
        Ok(processed)
    }

    /// 执行一条指派并上报结果
    async fn execute_assignment(&self, assignment: &AssignmentMessage) {
        info!(
            "客户端 {} 开始执行指派 {} ({})",
            self.client_name, assignment.assignment_id, assignment.subtask
        );

        let executor = match self.executors.get(&assignment.subtask) {
            Some(executor) => executor,
            None => {
                warn!(
                    "客户端 {} 没有 {} 的执行器",
                    self.client_name, assignment.subtask
                );
                self.report(
                    assignment.assignment_id,
                    AssignmentStatus::Failed,
                    None,
                    Some(format!("执行器不存在: {}", assignment.subtask)),
                )
                .await;
                return;
            }
        };

        let timeout = Duration::from_secs(assignment.timeout_seconds.max(0) as u64);
        let outcome = tokio::time::timeout(timeout, executor.execute(&assignment.args)).await;
        match outcome {
            Ok(Ok(result)) => {
                info!(
                    "指派 {} 执行完成 ({} 字节输出)",
                    assignment.assignment_id,
                    result.len()
                );
                self.report(
                    assignment.assignment_id,
                    AssignmentStatus::Completed,
                    Some(result),
                    None,
                )
                .await;
            }
            Ok(Err(e)) => {
                warn!("指派 {} 执行失败: {e}", assignment.assignment_id);
                self.report(
                    assignment.assignment_id,
                    AssignmentStatus::Failed,
                    None,
                    Some(e.to_string()),
                )
                .await;
            }
            Err(_) => {
                warn!(
                    "指派 {} 超过客户端侧超时 ({}s)",
                    assignment.assignment_id, assignment.timeout_seconds
                );
                self.report(
                    assignment.assignment_id,
                    AssignmentStatus::Failed,
                    None,
                    Some("execution timeout".to_string()),
                )
                .await;
            }
        }
    }

    async fn report(
        &self,
        assignment_id: i64,
        status: AssignmentStatus,
        result: Option<String>,
        error_message: Option<String>,
    ) {
        let message = Message::status_report(ReportMessage {
            assignment_id,
            client_name: self.client_name.clone(),
            status,
            result,
            error_message,
            timestamp: Utc::now(),
        });
        if let Err(e) = self
            .message_queue
            .publish_message(&self.reports_queue, &message)
            .await
        {
            error!("上报指派 {assignment_id} 结果失败: {e}");
        }
    }

    /// 启动轮询循环，直到收到关停信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> FleetResult<()> {
        info!(
            "客户端 {} 开始轮询指派队列 {} (间隔 {}ms)",
            self.client_name, self.assignment_queue, self.poll_interval_ms
        );
        let interval = Duration::from_millis(self.poll_interval_ms);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.poll_once().await {
                        error!("轮询指派队列出错: {e}");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("客户端 {} 收到关停信号，停止轮询", self.client_name);
                    break;
                }
            }
        }
        Ok(())
    }
}
