//! 核心支撑库：配置模型与加载、日志初始化

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, ClientConfig, DispatcherConfig, LivenessConfig, ObservabilityConfig, QueueConfig,
};
pub use logging::init_logging;
