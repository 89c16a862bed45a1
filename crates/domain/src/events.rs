//! 领域事件
//!
//! 状态变更以事件形式广播给观察者（WebSocket中继、日志写入等外部组件）。
//! 每次状态转换恰好产生一个事件。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{AssignmentStatus, ClientStatus, TaskStatus};

/// 领域事件基础trait
pub trait DomainEvent: Send + Sync {
    fn event_id(&self) -> Uuid;
    fn event_type(&self) -> &str;
    fn occurred_at(&self) -> DateTime<Utc>;
    fn aggregate_id(&self) -> String;
}

/// 任务相关事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskEvent {
    TaskCreated {
        id: Uuid,
        task_id: i64,
        task_name: String,
        occurred_at: DateTime<Utc>,
    },
    TaskStatusChanged {
        id: Uuid,
        task_id: i64,
        status: TaskStatus,
        occurred_at: DateTime<Utc>,
    },
    AssignmentStatusChanged {
        id: Uuid,
        task_id: i64,
        assignment_id: i64,
        subtask: String,
        client_name: String,
        status: AssignmentStatus,
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    },
}

impl TaskEvent {
    pub fn created(task_id: i64, task_name: &str) -> Self {
        TaskEvent::TaskCreated {
            id: Uuid::new_v4(),
            task_id,
            task_name: task_name.to_string(),
            occurred_at: Utc::now(),
        }
    }

    pub fn status_changed(task_id: i64, status: TaskStatus) -> Self {
        TaskEvent::TaskStatusChanged {
            id: Uuid::new_v4(),
            task_id,
            status,
            occurred_at: Utc::now(),
        }
    }

    pub fn assignment_changed(
        task_id: i64,
        assignment_id: i64,
        subtask: &str,
        client_name: &str,
        status: AssignmentStatus,
        reason: Option<String>,
    ) -> Self {
        TaskEvent::AssignmentStatusChanged {
            id: Uuid::new_v4(),
            task_id,
            assignment_id,
            subtask: subtask.to_string(),
            client_name: client_name.to_string(),
            status,
            reason,
            occurred_at: Utc::now(),
        }
    }
}

impl DomainEvent for TaskEvent {
    fn event_id(&self) -> Uuid {
        match self {
            TaskEvent::TaskCreated { id, .. } => *id,
            TaskEvent::TaskStatusChanged { id, .. } => *id,
            TaskEvent::AssignmentStatusChanged { id, .. } => *id,
        }
    }

    fn event_type(&self) -> &str {
        match self {
            TaskEvent::TaskCreated { .. } => "task_created",
            TaskEvent::TaskStatusChanged { .. } => "task_status_changed",
            TaskEvent::AssignmentStatusChanged { .. } => "subtask_status_changed",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TaskEvent::TaskCreated { occurred_at, .. } => *occurred_at,
            TaskEvent::TaskStatusChanged { occurred_at, .. } => *occurred_at,
            TaskEvent::AssignmentStatusChanged { occurred_at, .. } => *occurred_at,
        }
    }

    fn aggregate_id(&self) -> String {
        match self {
            TaskEvent::TaskCreated { task_id, .. } => task_id.to_string(),
            TaskEvent::TaskStatusChanged { task_id, .. } => task_id.to_string(),
            TaskEvent::AssignmentStatusChanged { task_id, .. } => task_id.to_string(),
        }
    }
}

/// 客户端相关事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientEvent {
    ClientRegistered {
        id: Uuid,
        client_name: String,
        occurred_at: DateTime<Utc>,
    },
    ClientStatusChanged {
        id: Uuid,
        client_name: String,
        status: ClientStatus,
        occurred_at: DateTime<Utc>,
    },
}

impl ClientEvent {
    pub fn registered(client_name: &str) -> Self {
        ClientEvent::ClientRegistered {
            id: Uuid::new_v4(),
            client_name: client_name.to_string(),
            occurred_at: Utc::now(),
        }
    }

    pub fn status_changed(client_name: &str, status: ClientStatus) -> Self {
        ClientEvent::ClientStatusChanged {
            id: Uuid::new_v4(),
            client_name: client_name.to_string(),
            status,
            occurred_at: Utc::now(),
        }
    }
}

impl DomainEvent for ClientEvent {
    fn event_id(&self) -> Uuid {
        match self {
            ClientEvent::ClientRegistered { id, .. } => *id,
            ClientEvent::ClientStatusChanged { id, .. } => *id,
        }
    }

    fn event_type(&self) -> &str {
        match self {
            ClientEvent::ClientRegistered { .. } => "client_registered",
            ClientEvent::ClientStatusChanged { .. } => "client_status_changed",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ClientEvent::ClientRegistered { occurred_at, .. } => *occurred_at,
            ClientEvent::ClientStatusChanged { occurred_at, .. } => *occurred_at,
        }
    }

    fn aggregate_id(&self) -> String {
        match self {
            ClientEvent::ClientRegistered { client_name, .. } => client_name.clone(),
            ClientEvent::ClientStatusChanged { client_name, .. } => client_name.clone(),
        }
    }
}

/// 事件总线承载的统一事件类型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FleetEvent {
    Task(TaskEvent),
    Client(ClientEvent),
}

impl DomainEvent for FleetEvent {
    fn event_id(&self) -> Uuid {
        match self {
            FleetEvent::Task(e) => e.event_id(),
            FleetEvent::Client(e) => e.event_id(),
        }
    }

    fn event_type(&self) -> &str {
        match self {
            FleetEvent::Task(e) => e.event_type(),
            FleetEvent::Client(e) => e.event_type(),
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            FleetEvent::Task(e) => e.occurred_at(),
            FleetEvent::Client(e) => e.occurred_at(),
        }
    }

    fn aggregate_id(&self) -> String {
        match self {
            FleetEvent::Task(e) => e.aggregate_id(),
            FleetEvent::Client(e) => e.aggregate_id(),
        }
    }
}

impl From<TaskEvent> for FleetEvent {
    fn from(event: TaskEvent) -> Self {
        FleetEvent::Task(event)
    }
}

impl From<ClientEvent> for FleetEvent {
    fn from(event: ClientEvent) -> Self {
        FleetEvent::Client(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_types_match_boundary_contract() {
        let events: Vec<FleetEvent> = vec![
            TaskEvent::created(1, "t").into(),
            TaskEvent::status_changed(1, TaskStatus::Completed).into(),
            TaskEvent::assignment_changed(1, 2, "s", "alice", AssignmentStatus::Failed, None)
                .into(),
            ClientEvent::registered("alice").into(),
            ClientEvent::status_changed("alice", ClientStatus::Offline).into(),
        ];
        let types: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(
            types,
            vec![
                "task_created",
                "task_status_changed",
                "subtask_status_changed",
                "client_registered",
                "client_status_changed",
            ]
        );
    }

    #[test]
    fn test_aggregate_id_tracks_entity() {
        let event: FleetEvent = TaskEvent::status_changed(42, TaskStatus::Running).into();
        assert_eq!(event.aggregate_id(), "42");
        let event: FleetEvent = ClientEvent::registered("alice").into();
        assert_eq!(event.aggregate_id(), "alice");
    }
}
