use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use taskfleet_domain::{FleetError, FleetResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub queues: QueueConfig,
    pub dispatcher: DispatcherConfig,
    pub liveness: LivenessConfig,
    pub client: ClientConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// 客户端指派队列前缀，完整队列名为 `<prefix>.<client>`
    pub assignment_prefix: String,
    pub reports: String,
    pub heartbeats: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    pub enabled: bool,
    /// 资格扫描周期。固定时刻任务按此粒度判定，默认10秒
    pub schedule_interval_seconds: u64,
    /// 执行超时巡检周期，独立于心跳超时
    pub timeout_check_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// 心跳超时，超过即判离线
    pub heartbeat_timeout_seconds: i64,
    /// 离线巡检周期，独立于任何客户端的心跳间隔
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub enabled: bool,
    pub name: String,
    pub address: String,
    pub capabilities: Vec<String>,
    pub heartbeat_interval_seconds: u64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            queues: QueueConfig {
                assignment_prefix: "assignments".to_string(),
                reports: "reports".to_string(),
                heartbeats: "heartbeats".to_string(),
            },
            dispatcher: DispatcherConfig {
                enabled: true,
                schedule_interval_seconds: 10,
                timeout_check_interval_seconds: 5,
            },
            liveness: LivenessConfig {
                heartbeat_timeout_seconds: 90,
                sweep_interval_seconds: 30,
            },
            client: ClientConfig {
                enabled: false,
                name: "client-001".to_string(),
                address: "127.0.0.1:9000".to_string(),
                capabilities: vec!["shell".to_string(), "get_hostname".to_string()],
                heartbeat_interval_seconds: 30,
                poll_interval_ms: 500,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_enabled: true,
            },
        }
    }
}

impl AppConfig {
    /// 加载配置：默认值 -> 可选TOML文件 -> TASKFLEET__ 前缀环境变量
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder().add_source(
            ConfigBuilder::try_from(&AppConfig::default()).context("构建默认配置失败")?,
        );

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                tracing::warn!("配置文件不存在，使用默认配置: {path}");
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("TASKFLEET")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("解析配置失败")?;

        config.validate().context("配置验证失败")?;
        Ok(config)
    }

    pub fn validate(&self) -> FleetResult<()> {
        validate_not_empty(&self.queues.assignment_prefix, "queues.assignment_prefix")?;
        validate_not_empty(&self.queues.reports, "queues.reports")?;
        validate_not_empty(&self.queues.heartbeats, "queues.heartbeats")?;

        validate_positive(
            self.dispatcher.schedule_interval_seconds,
            "dispatcher.schedule_interval_seconds",
        )?;
        validate_positive(
            self.dispatcher.timeout_check_interval_seconds,
            "dispatcher.timeout_check_interval_seconds",
        )?;
        validate_positive(
            self.liveness.sweep_interval_seconds,
            "liveness.sweep_interval_seconds",
        )?;
        if self.liveness.heartbeat_timeout_seconds <= 0 {
            return Err(FleetError::config_error(
                "liveness.heartbeat_timeout_seconds 必须为正数",
            ));
        }

        if self.client.enabled {
            validate_not_empty(&self.client.name, "client.name")?;
            validate_not_empty(&self.client.address, "client.address")?;
            validate_positive(
                self.client.heartbeat_interval_seconds,
                "client.heartbeat_interval_seconds",
            )?;
            validate_positive(self.client.poll_interval_ms, "client.poll_interval_ms")?;
            if self.client.capabilities.is_empty() {
                return Err(FleetError::config_error("client.capabilities 不能为空"));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.observability.log_level.as_str()) {
            return Err(FleetError::config_error(format!(
                "无效的日志级别: {}，可选项: {:?}",
                self.observability.log_level, valid_levels
            )));
        }

        Ok(())
    }
}

fn validate_not_empty(value: &str, field: &str) -> FleetResult<()> {
    if value.trim().is_empty() {
        return Err(FleetError::config_error(format!("{field} 不能为空")));
    }
    Ok(())
}

fn validate_positive(value: u64, field: &str) -> FleetResult<()> {
    if value == 0 {
        return Err(FleetError::config_error(format!("{field} 必须为正数")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dispatcher.schedule_interval_seconds, 10);
        assert_eq!(config.liveness.heartbeat_timeout_seconds, 90);
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        let mut config = AppConfig::default();
        config.dispatcher.schedule_interval_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.liveness.heartbeat_timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_client_name_when_enabled() {
        let mut config = AppConfig::default();
        config.client.enabled = true;
        config.client.name = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
[dispatcher]
schedule_interval_seconds = 3

[liveness]
heartbeat_timeout_seconds = 45
sweep_interval_seconds = 15
"#
        )
        .unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.dispatcher.schedule_interval_seconds, 3);
        assert_eq!(config.liveness.heartbeat_timeout_seconds, 45);
        // 未覆盖的字段保持默认值
        assert_eq!(config.queues.reports, "reports");
    }

    #[test]
    fn test_load_missing_file_falls_back_to_defaults() {
        let config = AppConfig::load(Some("/nonexistent/taskfleet.toml")).unwrap();
        assert_eq!(config.dispatcher.schedule_interval_seconds, 10);
    }
}
