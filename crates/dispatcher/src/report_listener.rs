use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use taskfleet_domain::{FleetResult, Message, MessageQueue, MessageType};

use crate::dispatch::DispatchEngine;
use crate::heartbeat::HeartbeatMonitor;

/// 回报与心跳监听器
///
/// 并行监听共享的回报队列和心跳队列，把执行结果交给分发引擎、把
/// 心跳交给心跳监视器。
#[derive(Clone)]
pub struct ReportListener {
    engine: Arc<DispatchEngine>,
    monitor: Arc<HeartbeatMonitor>,
    message_queue: Arc<dyn MessageQueue>,
    reports_queue: String,
    heartbeats_queue: String,
    running: Arc<tokio::sync::RwLock<bool>>,
}

impl ReportListener {
    pub fn new(
        engine: Arc<DispatchEngine>,
        monitor: Arc<HeartbeatMonitor>,
        message_queue: Arc<dyn MessageQueue>,
        reports_queue: String,
        heartbeats_queue: String,
    ) -> Self {
        Self {
            engine,
            monitor,
            message_queue,
            reports_queue,
            heartbeats_queue,
            running: Arc::new(tokio::sync::RwLock::new(false)),
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!("回报监听停止信号已发送");
    }

    async fn process_message(&self, message: &Message) -> FleetResult<()> {
        match &message.message_type {
            MessageType::StatusReport(report) => {
                debug!(
                    "处理客户端 {} 对指派 {} 的回报",
                    report.client_name, report.assignment_id
                );
                self.engine.handle_report(report).await?;
            }
            MessageType::ClientHeartbeat(heartbeat) => {
                self.monitor.record_heartbeat(heartbeat).await?;
            }
            MessageType::AssignmentDelivery(_) => {
                debug!("忽略投递方向的消息: {}", message.message_type_str());
            }
        }
        Ok(())
    }

    /// 消费两个队列各一次并处理全部消息，供巡检式调用和测试使用
    pub async fn poll_once(&self) -> FleetResult<usize> {
        let mut processed = 0usize;
        for queue in [&self.reports_queue, &self.heartbeats_queue] {
            let messages = self.message_queue.consume_messages(queue).await?;
            for message in &messages {
                if let Err(e) = self.process_message(message).await {
                    error!("处理来自队列 {queue} 的消息时出错: {e}");
                }
            }
            processed += messages.len();
        }
        Ok(processed)
    }

    async fn listen_queue(&self, queue_name: &str) -> FleetResult<()> {
        info!("开始监听队列: {queue_name}");
        loop {
            if !self.is_running().await {
                info!("收到停止信号，退出队列 {queue_name} 的监听");
                break;
            }
            match self.message_queue.consume_messages(queue_name).await {
                Ok(messages) => {
                    if messages.is_empty() {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    } else {
                        for message in messages {
                            if let Err(e) = self.process_message(&message).await {
                                error!("处理来自队列 {queue_name} 的消息时出错: {e}");
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("从队列 {queue_name} 消费消息时出错: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        Ok(())
    }

    /// 启动两条监听循环并等待它们结束
    pub async fn listen_for_updates(&self) -> FleetResult<()> {
        info!("启动回报与心跳监听服务");
        {
            let mut running = self.running.write().await;
            *running = true;
        }

        let report_listener = self.clone();
        let reports_queue = self.reports_queue.clone();
        let reports_handle = tokio::spawn(async move {
            if let Err(e) = report_listener.listen_queue(&reports_queue).await {
                error!("回报队列监听出错: {e}");
            }
        });

        let heartbeat_listener = self.clone();
        let heartbeats_queue = self.heartbeats_queue.clone();
        let heartbeats_handle = tokio::spawn(async move {
            if let Err(e) = heartbeat_listener.listen_queue(&heartbeats_queue).await {
                error!("心跳队列监听出错: {e}");
            }
        });

        let (reports_result, heartbeats_result) =
            tokio::join!(reports_handle, heartbeats_handle);
        if let Err(e) = reports_result {
            error!("回报监听任务执行出错: {e}");
        }
        if let Err(e) = heartbeats_result {
            error!("心跳监听任务执行出错: {e}");
        }

        info!("回报与心跳监听服务已停止");
        Ok(())
    }
}
