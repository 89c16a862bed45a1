use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::messages::HeartbeatMessage;
use crate::value_objects::ScheduleSpec;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ClientStatus {
    #[serde(rename = "ONLINE")]
    Online,
    #[serde(rename = "BUSY")]
    Busy,
    #[serde(rename = "OFFLINE")]
    Offline,
}

/// 客户端信息
///
/// 客户端以稳定的人为命名标识，网络地址变化不影响身份。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub address: String,
    pub capabilities: Vec<String>,
    pub status: ClientStatus,
    /// 当前执行中的指派 ID；离线客户端恒为 None
    pub active_assignment: Option<i64>,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl ClientInfo {
    pub fn new(name: String, address: String, capabilities: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            name,
            address,
            capabilities,
            status: ClientStatus::Online,
            active_assignment: None,
            last_heartbeat: now,
            registered_at: now,
        }
    }

    /// 在线含忙碌：两者都表示心跳仍然新鲜
    pub fn is_online(&self) -> bool {
        matches!(self.status, ClientStatus::Online | ClientStatus::Busy)
    }

    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.iter().any(|c| c == tag)
    }

    pub fn is_heartbeat_expired(&self, timeout_seconds: i64, now: DateTime<Utc>) -> bool {
        (now - self.last_heartbeat).num_seconds() > timeout_seconds
    }

    /// 应用一次心跳，按时间戳取最新（last-writer-wins）
    ///
    /// 过期的心跳（时间戳不晚于已记录值）返回 None，不做任何修改。
    /// 应用成功返回应用前的状态，供调用方判断是否发生了离线自愈。
    pub fn apply_heartbeat(&mut self, heartbeat: &HeartbeatMessage) -> Option<ClientStatus> {
        if heartbeat.timestamp <= self.last_heartbeat {
            return None;
        }
        let previous = self.status;
        self.last_heartbeat = heartbeat.timestamp;
        if self.status == ClientStatus::Offline {
            // 离线客户端凭心跳自愈，无需重新注册
            self.status = ClientStatus::Online;
        }
        Some(previous)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// 子任务步骤定义
///
/// `subtask` 是客户端执行器目录中的不透明键，核心不解释其语义。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskSpec {
    pub subtask: String,
    pub target_client: String,
    /// 同 order 的步骤可并发；更高 order 必须等待更低 order 全部终态
    pub order: i32,
    pub args: serde_json::Value,
    pub timeout_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub name: String,
    pub schedule: ScheduleSpec,
    pub steps: Vec<SubtaskSpec>,
    pub status: TaskStatus,
    /// 周期计数，每轮点火递增；历史指派按周期留存
    pub current_cycle: i64,
    /// 下次点火时间；None 表示不再点火
    pub next_fire_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(name: String, schedule: ScheduleSpec, steps: Vec<SubtaskSpec>) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 由存储层生成
            name,
            schedule,
            steps,
            status: TaskStatus::Pending,
            current_cycle: 0,
            next_fire_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.schedule.is_recurring()
    }

    /// 按 order 升序返回去重后的 order 值序列
    pub fn order_values(&self) -> Vec<i32> {
        let mut orders: Vec<i32> = self.steps.iter().map(|s| s.order).collect();
        orders.sort_unstable();
        orders.dedup();
        orders
    }

    pub fn steps_at_order(&self, order: i32) -> Vec<&SubtaskSpec> {
        self.steps.iter().filter(|s| s.order == order).collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AssignmentStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl AssignmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AssignmentStatus::Completed | AssignmentStatus::Failed | AssignmentStatus::Cancelled
        )
    }
}

/// 子任务指派：任务某一周期内 (子任务, 目标客户端, order) 的一次执行记录
///
/// 终态记录只追加、不覆盖，作为审计历史留存。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: i64,
    pub task_id: i64,
    pub cycle: i64,
    pub subtask: String,
    pub client_name: String,
    pub order: i32,
    pub args: serde_json::Value,
    pub timeout_seconds: i64,
    pub status: AssignmentStatus,
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Assignment {
    pub fn new(task_id: i64, cycle: i64, step: &SubtaskSpec) -> Self {
        Self {
            id: 0, // 由存储层生成
            task_id,
            cycle,
            subtask: step.subtask.clone(),
            client_name: step.target_client.clone(),
            order: step.order,
            args: step.args.clone(),
            timeout_seconds: step.timeout_seconds,
            status: AssignmentStatus::Pending,
            result: None,
            error_message: None,
            started_at: None,
            finished_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status, AssignmentStatus::Running)
    }

    pub fn update_status(&mut self, status: AssignmentStatus) {
        self.status = status;
        match status {
            AssignmentStatus::Running => {
                if self.started_at.is_none() {
                    self.started_at = Some(Utc::now());
                }
            }
            AssignmentStatus::Completed | AssignmentStatus::Failed | AssignmentStatus::Cancelled => {
                if self.finished_at.is_none() {
                    self.finished_at = Some(Utc::now());
                }
            }
            AssignmentStatus::Pending => {}
        }
    }

    /// 执行截止时刻；未开始执行的指派没有截止
    pub fn execution_deadline(&self) -> Option<DateTime<Utc>> {
        self.started_at
            .map(|t| t + chrono::Duration::seconds(self.timeout_seconds))
    }

    pub fn execution_duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(started), Some(finished)) => Some((finished - started).num_milliseconds()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn step(order: i32) -> SubtaskSpec {
        SubtaskSpec {
            subtask: "get_hostname".to_string(),
            target_client: "alice".to_string(),
            order,
            args: serde_json::json!({}),
            timeout_seconds: 5,
        }
    }

    #[test]
    fn test_apply_heartbeat_last_writer_wins() {
        let mut client = ClientInfo::new(
            "alice".to_string(),
            "10.0.0.1:9000".to_string(),
            vec!["shell".to_string()],
        );
        let fresh = HeartbeatMessage {
            client_name: "alice".to_string(),
            timestamp: client.last_heartbeat + Duration::seconds(10),
            system_load: None,
            memory_usage_mb: None,
        };
        assert_eq!(client.apply_heartbeat(&fresh), Some(ClientStatus::Online));

        // 更早的心跳不得回退状态
        let stale = HeartbeatMessage {
            client_name: "alice".to_string(),
            timestamp: client.last_heartbeat - Duration::seconds(5),
            system_load: None,
            memory_usage_mb: None,
        };
        assert_eq!(client.apply_heartbeat(&stale), None);
    }

    #[test]
    fn test_apply_heartbeat_heals_offline_client() {
        let mut client = ClientInfo::new("bob".to_string(), "addr".to_string(), vec![]);
        client.status = ClientStatus::Offline;
        let hb = HeartbeatMessage {
            client_name: "bob".to_string(),
            timestamp: client.last_heartbeat + Duration::seconds(1),
            system_load: Some(0.5),
            memory_usage_mb: Some(128),
        };
        assert_eq!(client.apply_heartbeat(&hb), Some(ClientStatus::Offline));
        assert_eq!(client.status, ClientStatus::Online);
    }

    #[test]
    fn test_busy_client_stays_busy_on_heartbeat() {
        let mut client = ClientInfo::new("carol".to_string(), "addr".to_string(), vec![]);
        client.status = ClientStatus::Busy;
        let hb = HeartbeatMessage {
            client_name: "carol".to_string(),
            timestamp: client.last_heartbeat + Duration::seconds(1),
            system_load: None,
            memory_usage_mb: None,
        };
        client.apply_heartbeat(&hb);
        assert_eq!(client.status, ClientStatus::Busy);
    }

    #[test]
    fn test_order_values_sorted_and_deduped() {
        let task = Task::new(
            "t".to_string(),
            ScheduleSpec::Immediate,
            vec![step(1), step(0), step(1), step(2)],
        );
        assert_eq!(task.order_values(), vec![0, 1, 2]);
        assert_eq!(task.steps_at_order(1).len(), 2);
    }

    #[test]
    fn test_assignment_status_timestamps() {
        let task = Task::new("t".to_string(), ScheduleSpec::Immediate, vec![step(0)]);
        let mut assignment = Assignment::new(1, 0, &task.steps[0]);
        assert!(assignment.started_at.is_none());

        assignment.update_status(AssignmentStatus::Running);
        assert!(assignment.started_at.is_some());
        assert!(assignment.execution_deadline().is_some());

        assignment.update_status(AssignmentStatus::Completed);
        assert!(assignment.finished_at.is_some());
        assert!(assignment.is_terminal());
    }
}
