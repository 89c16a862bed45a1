//! 基础设施层：内存存储、消息队列、事件总线与指标采集

pub mod event_bus;
pub mod in_memory_queue;
pub mod memory;
pub mod metrics;

pub use event_bus::EventBus;
pub use in_memory_queue::{InMemoryMessageQueue, InMemoryQueueConfig};
pub use memory::{InMemoryAssignmentRepository, InMemoryClientRepository, InMemoryTaskRepository};
pub use metrics::MetricsCollector;
