use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use taskfleet_domain::{FleetError, FleetResult};

/// 子任务执行器
///
/// 服务端把子任务名当作不透明字符串键，语义完全由客户端的执行器
/// 目录解释。
#[async_trait]
pub trait SubtaskExecutor: Send + Sync {
    /// 目录中的注册名
    fn name(&self) -> &str;

    /// 执行子任务，返回结果文本
    async fn execute(&self, args: &serde_json::Value) -> FleetResult<String>;
}

/// 执行器目录：子任务名 -> 处理器
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn SubtaskExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// 带内置执行器（get_hostname、shell）的目录
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(HostnameExecutor));
        registry.register(Arc::new(ShellExecutor));
        registry
    }

    /// 按配置声明的能力从内置执行器中挑选，未知名称告警后忽略
    pub fn with_capabilities(capabilities: &[String]) -> Self {
        let builtins = Self::with_builtins();
        let mut registry = Self::new();
        for name in capabilities {
            match builtins.get(name) {
                Some(executor) => registry.register(executor),
                None => warn!("声明的能力 {name} 没有对应的内置执行器，忽略"),
            }
        }
        registry
    }

    pub fn register(&mut self, executor: Arc<dyn SubtaskExecutor>) {
        debug!("注册执行器: {}", executor.name());
        self.executors
            .insert(executor.name().to_string(), executor);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SubtaskExecutor>> {
        self.executors.get(name).cloned()
    }

    /// 注册名列表，作为注册时上报的能力标签
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.executors.keys().cloned().collect();
        names.sort();
        names
    }
}

/// 上报本机主机名
pub struct HostnameExecutor;

#[async_trait]
impl SubtaskExecutor for HostnameExecutor {
    fn name(&self) -> &str {
        "get_hostname"
    }

    async fn execute(&self, _args: &serde_json::Value) -> FleetResult<String> {
        let name = hostname::get()
            .map_err(|e| FleetError::Execution(format!("获取主机名失败: {e}")))?;
        Ok(name.to_string_lossy().into_owned())
    }
}

/// Shell 命令参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellArgs {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
}

/// 执行 Shell 命令并捕获输出
pub struct ShellExecutor;

#[async_trait]
impl SubtaskExecutor for ShellExecutor {
    fn name(&self) -> &str {
        "shell"
    }

    async fn execute(&self, args: &serde_json::Value) -> FleetResult<String> {
        let params: ShellArgs = serde_json::from_value(args.clone())
            .map_err(|e| FleetError::validation_error(format!("解析 shell 参数失败: {e}")))?;

        info!("执行 shell 命令: {} {:?}", params.command, params.args);
        let mut cmd = Command::new(&params.command);
        cmd.args(&params.args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        if let Some(dir) = &params.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &params.env_vars {
            cmd.env(key, value);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| FleetError::Execution(format!("启动命令 {} 失败: {e}", params.command)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        if output.status.success() {
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
            Err(FleetError::Execution(format!(
                "命令以状态 {} 退出: {stderr}",
                output.status
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtins_are_registered() {
        let registry = ExecutorRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["get_hostname", "shell"]);
        assert!(registry.get("get_hostname").is_some());
        assert!(registry.get("reboot").is_none());
    }

    #[test]
    fn test_with_capabilities_selects_declared_executors() {
        let registry = ExecutorRegistry::with_capabilities(&[
            "shell".to_string(),
            "reboot".to_string(),
        ]);
        assert_eq!(registry.names(), vec!["shell"]);
        assert!(registry.get("get_hostname").is_none());
    }

    #[tokio::test]
    async fn test_hostname_executor_returns_nonempty() {
        let executor = HostnameExecutor;
        let result = executor.execute(&json!({})).await.unwrap();
        assert!(!result.is_empty());
    }

    #[tokio::test]
    async fn test_shell_executor_captures_stdout() {
        let executor = ShellExecutor;
        let result = executor
            .execute(&json!({"command": "echo", "args": ["hello"]}))
            .await
            .unwrap();
        assert_eq!(result, "hello");
    }

    #[tokio::test]
    async fn test_shell_executor_fails_on_nonzero_exit() {
        let executor = ShellExecutor;
        let err = executor
            .execute(&json!({"command": "sh", "args": ["-c", "exit 3"]}))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::Execution(_)));
    }

    #[tokio::test]
    async fn test_shell_executor_rejects_malformed_args() {
        let executor = ShellExecutor;
        let err = executor.execute(&json!({"args": []})).await.unwrap_err();
        assert!(err.is_validation());
    }
}
