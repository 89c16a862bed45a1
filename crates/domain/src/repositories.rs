//! 领域仓储抽象
//!
//! 数据访问的抽象接口。涉及并发竞争的操作（心跳应用、离线判定、终态写入）
//! 定义为仓储层的原子语义方法，由实现方保证在单实体锁内完成。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{Assignment, AssignmentStatus, ClientInfo, ClientStatus, Task, TaskStatus};
use crate::errors::FleetResult;
use crate::messages::HeartbeatMessage;

/// 心跳应用结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// 心跳已应用，携带应用前的状态
    Applied { previous: ClientStatus },
    /// 时间戳不晚于已记录值，按 last-writer-wins 丢弃
    Stale,
    /// 客户端未注册
    Unknown,
}

/// 客户端注册表抽象
#[async_trait]
pub trait ClientRepository: Send + Sync {
    async fn insert(&self, client: &ClientInfo) -> FleetResult<()>;
    async fn get(&self, name: &str) -> FleetResult<Option<ClientInfo>>;
    /// 按注册顺序返回，顺序稳定以支持分页
    async fn list(&self, status: Option<ClientStatus>) -> FleetResult<Vec<ClientInfo>>;
    async fn update(&self, client: &ClientInfo) -> FleetResult<()>;
    async fn remove(&self, name: &str) -> FleetResult<bool>;

    /// 在实体锁内按时间戳应用心跳
    async fn apply_heartbeat(&self, heartbeat: &HeartbeatMessage) -> FleetResult<HeartbeatOutcome>;

    /// 在实体锁内复查心跳时效后将客户端置为离线
    ///
    /// 转换时刻重新计算 `now - last_heartbeat`，并发到达的心跳赢得竞争时
    /// 返回 None；成功转换返回离线后的客户端快照。
    async fn expire_if_stale(
        &self,
        name: &str,
        timeout_seconds: i64,
        now: DateTime<Utc>,
    ) -> FleetResult<Option<ClientInfo>>;

    async fn mark_busy(&self, name: &str, assignment_id: i64) -> FleetResult<()>;
    async fn mark_idle(&self, name: &str) -> FleetResult<()>;
}

/// 任务仓储抽象
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 创建任务并分配单调递增 ID
    async fn create(&self, task: &Task) -> FleetResult<Task>;
    async fn get_by_id(&self, id: i64) -> FleetResult<Option<Task>>;
    async fn list(&self) -> FleetResult<Vec<Task>>;
    async fn update(&self, task: &Task) -> FleetResult<Task>;
    async fn delete(&self, id: i64) -> FleetResult<bool>;

    /// 在实体锁内原子点火：复查任务处于 Pending 后递增周期、转入 Running
    /// 并预排下一次点火时间
    ///
    /// 任务不存在或不处于 Pending（并发点火、已取消）时返回 None。
    async fn begin_cycle(
        &self,
        task_id: i64,
        now: DateTime<Utc>,
    ) -> FleetResult<Option<Task>>;

    /// 在实体锁内原子收尾：仅当任务仍处于 Running 且周期号匹配时写入
    /// 派生终态，周期任务随即在同一把锁内回到 Pending
    ///
    /// 复查失败（取消抢先落地、周期号过期）时返回 None，不做任何写入。
    async fn finish_cycle(
        &self,
        task_id: i64,
        cycle: i64,
        status: TaskStatus,
    ) -> FleetResult<Option<Task>>;

    /// 在实体锁内原子取消：置为 Cancelled 并抹掉下次点火
    ///
    /// 任务已是终态时返回 None；任务不存在时返回 TaskNotFound。
    async fn cancel(&self, task_id: i64) -> FleetResult<Option<Task>>;
}

/// 指派仓储抽象
#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    async fn create(&self, assignment: &Assignment) -> FleetResult<Assignment>;
    async fn get_by_id(&self, id: i64) -> FleetResult<Option<Assignment>>;
    /// 单次加锁返回某任务某周期的全部指派，作为派生任务状态的一致性快照
    async fn snapshot(&self, task_id: i64, cycle: i64) -> FleetResult<Vec<Assignment>>;
    async fn list_running(&self) -> FleetResult<Vec<Assignment>>;
    async fn active_for_client(&self, client_name: &str) -> FleetResult<Option<Assignment>>;
    /// Pending -> Running，记录开始时间；指派已进入终态（如分发期间被取消）
    /// 时返回 None，调用方应放弃投递
    async fn mark_running(&self, id: i64) -> FleetResult<Option<Assignment>>;
    /// 幂等终态写入：指派已是终态时返回 None，终态记录从不被覆盖
    async fn finish(
        &self,
        id: i64,
        status: AssignmentStatus,
        result: Option<String>,
        error_message: Option<String>,
    ) -> FleetResult<Option<Assignment>>;
}
