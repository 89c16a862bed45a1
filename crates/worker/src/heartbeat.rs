use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info};

use taskfleet_domain::{FleetResult, HeartbeatMessage, Message, MessageQueue};

/// 客户端心跳上报器
///
/// 按固定间隔向共享心跳队列发布心跳消息，收到关停广播后退出。
pub struct HeartbeatManager {
    client_name: String,
    message_queue: Arc<dyn MessageQueue>,
    heartbeats_queue: String,
    heartbeat_interval_seconds: u64,
}

impl HeartbeatManager {
    pub fn new(
        client_name: String,
        message_queue: Arc<dyn MessageQueue>,
        heartbeats_queue: String,
        heartbeat_interval_seconds: u64,
    ) -> Self {
        Self {
            client_name,
            message_queue,
            heartbeats_queue,
            heartbeat_interval_seconds,
        }
    }

    /// 发送一次心跳
    pub async fn send_heartbeat(&self) -> FleetResult<()> {
        let message = Message::client_heartbeat(HeartbeatMessage {
            client_name: self.client_name.clone(),
            timestamp: Utc::now(),
            system_load: None,
            memory_usage_mb: None,
        });
        self.message_queue
            .publish_message(&self.heartbeats_queue, &message)
            .await?;
        debug!("客户端 {} 心跳已发送", self.client_name);
        Ok(())
    }

    /// 启动心跳循环，直到收到关停信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> FleetResult<()> {
        info!(
            "客户端 {} 启动心跳上报 (间隔 {}s)",
            self.client_name, self.heartbeat_interval_seconds
        );
        let mut ticker = interval(Duration::from_secs(self.heartbeat_interval_seconds));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.send_heartbeat().await {
                        error!("发送心跳失败: {e}");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("客户端 {} 心跳上报收到关停信号", self.client_name);
                    break;
                }
            }
        }
        Ok(())
    }
}
