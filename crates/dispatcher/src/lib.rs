//! 服务端调度与分发
//!
//! 客户端注册、心跳存活判定、任务点火扫描、按 order 分组的指派投递、
//! 结果回收与执行超时巡检。

pub mod control;
pub mod dispatch;
pub mod heartbeat;
pub mod registry_service;
pub mod report_listener;
pub mod scheduler;
pub mod timeout_watcher;

pub use control::TaskControlService;
pub use dispatch::DispatchEngine;
pub use heartbeat::{HeartbeatMonitor, HeartbeatMonitorConfig};
pub use registry_service::ClientRegistryService;
pub use report_listener::ReportListener;
pub use scheduler::{TaskScheduler, TaskSchedulerConfig};
pub use timeout_watcher::{TimeoutWatcher, TimeoutWatcherConfig};
