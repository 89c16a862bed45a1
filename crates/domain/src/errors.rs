use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum FleetError {
    #[error("客户端名称已被在线客户端占用: {name}")]
    DuplicateIdentity { name: String },
    #[error("客户端不存在: {name}")]
    UnknownClient { name: String },
    #[error("目标客户端离线，无法分发: {name}")]
    ClientUnavailable { name: String },
    #[error("调度表达式无效: {expr} - {message}")]
    InvalidSchedule { expr: String, message: String },
    #[error("任务不存在: id={id}")]
    TaskNotFound { id: i64 },
    #[error("指派记录不存在: id={id}")]
    AssignmentNotFound { id: i64 },
    #[error("指派执行超时: id={id}")]
    ExecutionTimeout { id: i64 },
    #[error("客户端心跳超时: {name}")]
    ClientTimeout { name: String },
    #[error("重复的结果上报: assignment={id}")]
    DuplicateReport { id: i64 },
    #[error("执行器不存在: {0}")]
    ExecutorNotFound(String),
    #[error("子任务执行失败: {0}")]
    Execution(String),
    #[error("消息队列操作失败: {0}")]
    MessageQueue(String),
    #[error("数据序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("数据验证失败: {0}")]
    ValidationError(String),
    #[error("系统内部错误: {0}")]
    Internal(String),
}

pub type FleetResult<T> = Result<T, FleetError>;

impl FleetError {
    pub fn duplicate_identity<S: Into<String>>(name: S) -> Self {
        Self::DuplicateIdentity { name: name.into() }
    }
    pub fn unknown_client<S: Into<String>>(name: S) -> Self {
        Self::UnknownClient { name: name.into() }
    }
    pub fn client_unavailable<S: Into<String>>(name: S) -> Self {
        Self::ClientUnavailable { name: name.into() }
    }
    pub fn invalid_schedule<S: Into<String>, M: Into<String>>(expr: S, message: M) -> Self {
        Self::InvalidSchedule {
            expr: expr.into(),
            message: message.into(),
        }
    }
    pub fn task_not_found(id: i64) -> Self {
        Self::TaskNotFound { id }
    }
    pub fn assignment_not_found(id: i64) -> Self {
        Self::AssignmentNotFound { id }
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }

    /// 身份与校验类错误同步返回给调用方，从不自动重试
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            FleetError::DuplicateIdentity { .. }
                | FleetError::InvalidSchedule { .. }
                | FleetError::ValidationError(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FleetError::MessageQueue(_) | FleetError::Internal(_)
        )
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(err: serde_json::Error) -> Self {
        FleetError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for FleetError {
    fn from(err: anyhow::Error) -> Self {
        FleetError::Internal(err.to_string())
    }
}
