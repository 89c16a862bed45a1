use tokio::sync::broadcast;
use tracing::{debug, trace};

use taskfleet_domain::{DomainEvent, FleetEvent};

/// 领域事件总线
///
/// 基于 tokio broadcast 通道。发布方永不阻塞：没有订阅者时事件被
/// 丢弃，落后的订阅者会丢失其错过的事件（broadcast Lagged 语义）。
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<FleetEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// 发布事件，即发即弃
    pub fn publish(&self, event: impl Into<FleetEvent>) {
        let event = event.into();
        debug!("发布事件: {}", event.event_type());
        // 无订阅者时 send 返回 Err，按设计忽略
        if self.sender.send(event).is_err() {
            trace!("当前无订阅者，事件被丢弃");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
