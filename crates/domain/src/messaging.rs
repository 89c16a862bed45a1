//! 消息队列抽象

use async_trait::async_trait;

use crate::errors::FleetResult;
use crate::messages::Message;

#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn publish_message(&self, queue: &str, message: &Message) -> FleetResult<()>;
    async fn consume_messages(&self, queue: &str) -> FleetResult<Vec<Message>>;
    async fn ack_message(&self, message_id: &str) -> FleetResult<()>;
    async fn nack_message(&self, message_id: &str, requeue: bool) -> FleetResult<()>;
    async fn create_queue(&self, queue: &str, durable: bool) -> FleetResult<()>;
    async fn delete_queue(&self, queue: &str) -> FleetResult<()>;
    async fn get_queue_size(&self, queue: &str) -> FleetResult<u32>;
    async fn purge_queue(&self, queue: &str) -> FleetResult<()>;
}

/// 客户端专属指派队列的命名约定
pub fn assignment_queue_name(prefix: &str, client_name: &str) -> String {
    format!("{prefix}.{client_name}")
}
