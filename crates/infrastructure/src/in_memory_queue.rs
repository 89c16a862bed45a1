use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock, Semaphore};
use tracing::{debug, info, warn};

use taskfleet_domain::{FleetError, FleetResult, Message, MessageQueue};

/// 内存消息队列实现
///
/// 基于 Tokio channels，用于单进程部署场景。支持多个命名队列和
/// 信号量背压控制。
#[derive(Debug)]
pub struct InMemoryMessageQueue {
    /// 队列存储：队列名 -> 通道
    queues: Arc<RwLock<HashMap<String, QueueChannels>>>,
    config: InMemoryQueueConfig,
}

#[derive(Debug)]
struct QueueChannels {
    sender: mpsc::UnboundedSender<Message>,
    /// Mutex 包装接收端，支持多个消费者
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
    size: Arc<AtomicU32>,
    backpressure: Arc<Semaphore>,
}

#[derive(Debug, Clone)]
pub struct InMemoryQueueConfig {
    /// 队列深度超过此值后发布方开始等待
    pub backpressure_threshold: usize,
    /// 背压等待超时（毫秒），0 表示无限等待
    pub backpressure_timeout_ms: u64,
}

impl Default for InMemoryQueueConfig {
    fn default() -> Self {
        Self {
            backpressure_threshold: 8000,
            backpressure_timeout_ms: 5000,
        }
    }
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self::with_config(InMemoryQueueConfig::default())
    }

    pub fn with_config(config: InMemoryQueueConfig) -> Self {
        Self {
            queues: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    async fn get_or_create_queue(&self, queue_name: &str) -> FleetResult<()> {
        let mut queues = self.queues.write().await;
        if !queues.contains_key(queue_name) {
            debug!("创建队列: {queue_name}");
            let (sender, receiver) = mpsc::unbounded_channel();
            queues.insert(
                queue_name.to_string(),
                QueueChannels {
                    sender,
                    receiver: Arc::new(Mutex::new(receiver)),
                    size: Arc::new(AtomicU32::new(0)),
                    backpressure: Arc::new(Semaphore::new(self.config.backpressure_threshold)),
                },
            );
        }
        Ok(())
    }

    async fn channel_parts(
        &self,
        queue_name: &str,
    ) -> FleetResult<(
        mpsc::UnboundedSender<Message>,
        Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
        Arc<AtomicU32>,
        Arc<Semaphore>,
    )> {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|c| {
                (
                    c.sender.clone(),
                    c.receiver.clone(),
                    c.size.clone(),
                    c.backpressure.clone(),
                )
            })
            .ok_or_else(|| FleetError::MessageQueue(format!("队列不存在: {queue_name}")))
    }
}

impl Default for InMemoryMessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn publish_message(&self, queue: &str, message: &Message) -> FleetResult<()> {
        self.get_or_create_queue(queue).await?;
        let (sender, _, size, backpressure) = self.channel_parts(queue).await?;

        let permit = if self.config.backpressure_timeout_ms > 0 {
            tokio::time::timeout(
                Duration::from_millis(self.config.backpressure_timeout_ms),
                backpressure.acquire(),
            )
            .await
            .map_err(|_| {
                warn!("队列 {queue} 背压等待超时，消息被拒绝");
                FleetError::MessageQueue(format!("队列 {queue} 背压等待超时"))
            })?
            .map_err(|e| FleetError::MessageQueue(format!("获取背压许可失败: {e}")))?
        } else {
            backpressure
                .acquire()
                .await
                .map_err(|e| FleetError::MessageQueue(format!("获取背压许可失败: {e}")))?
        };

        sender
            .send(message.clone())
            .map_err(|e| FleetError::MessageQueue(format!("向队列 {queue} 发送消息失败: {e}")))?;
        size.fetch_add(1, Ordering::Relaxed);
        // 许可在消息被消费时归还
        permit.forget();

        debug!("消息 {} 已发布到队列 {queue}", message.id);
        Ok(())
    }

    async fn consume_messages(&self, queue: &str) -> FleetResult<Vec<Message>> {
        self.get_or_create_queue(queue).await?;
        let (_, receiver, size, backpressure) = self.channel_parts(queue).await?;

        let mut messages = Vec::new();
        {
            let mut rx = receiver.lock().await;
            while let Ok(message) = rx.try_recv() {
                messages.push(message);
            }
        }

        if !messages.is_empty() {
            size.fetch_sub(messages.len() as u32, Ordering::Relaxed);
            backpressure.add_permits(messages.len());
            debug!("从队列 {queue} 消费了 {} 条消息", messages.len());
        }
        Ok(messages)
    }

    async fn ack_message(&self, message_id: &str) -> FleetResult<()> {
        // 内存队列消息一旦消费即自动确认
        debug!("确认消息: {message_id}");
        Ok(())
    }

    async fn nack_message(&self, message_id: &str, requeue: bool) -> FleetResult<()> {
        if requeue {
            warn!("消息 {message_id} 请求重新入队，但内存队列不支持重新入队");
        }
        Ok(())
    }

    async fn create_queue(&self, queue: &str, _durable: bool) -> FleetResult<()> {
        self.get_or_create_queue(queue).await
    }

    async fn delete_queue(&self, queue: &str) -> FleetResult<()> {
        let mut queues = self.queues.write().await;
        if queues.remove(queue).is_some() {
            info!("队列 {queue} 已删除");
        } else {
            warn!("待删除的队列不存在: {queue}");
        }
        Ok(())
    }

    async fn get_queue_size(&self, queue: &str) -> FleetResult<u32> {
        let queues = self.queues.read().await;
        queues
            .get(queue)
            .map(|c| c.size.load(Ordering::Relaxed))
            .ok_or_else(|| FleetError::MessageQueue(format!("队列不存在: {queue}")))
    }

    async fn purge_queue(&self, queue: &str) -> FleetResult<()> {
        let (_, receiver, size, backpressure) = self.channel_parts(queue).await?;
        let mut purged = 0usize;
        {
            let mut rx = receiver.lock().await;
            while rx.try_recv().is_ok() {
                purged += 1;
            }
        }
        if purged > 0 {
            size.store(0, Ordering::Relaxed);
            backpressure.add_permits(purged);
        }
        info!("已清空队列 {queue} 中的 {purged} 条消息");
        Ok(())
    }
}
