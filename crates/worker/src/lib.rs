//! 客户端侧：子任务执行器、心跳上报与指派轮询

pub mod executors;
pub mod heartbeat;
pub mod service;

pub use executors::{ExecutorRegistry, HostnameExecutor, ShellExecutor, SubtaskExecutor};
pub use heartbeat::HeartbeatManager;
pub use service::ClientService;
