use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Assignment, AssignmentStatus};

/// 队列消息信封
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageType {
    AssignmentDelivery(AssignmentMessage),
    StatusReport(ReportMessage),
    ClientHeartbeat(HeartbeatMessage),
}

/// 分发器推送给客户端的指派载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentMessage {
    pub assignment_id: i64,
    pub task_id: i64,
    pub cycle: i64,
    pub subtask: String,
    pub order: i32,
    pub args: serde_json::Value,
    pub timeout_seconds: i64,
}

impl AssignmentMessage {
    pub fn from_assignment(assignment: &Assignment) -> Self {
        Self {
            assignment_id: assignment.id,
            task_id: assignment.task_id,
            cycle: assignment.cycle,
            subtask: assignment.subtask.clone(),
            order: assignment.order,
            args: assignment.args.clone(),
            timeout_seconds: assignment.timeout_seconds,
        }
    }
}

/// 客户端上报的执行结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMessage {
    pub assignment_id: i64,
    pub client_name: String,
    pub status: AssignmentStatus,
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// 客户端周期性心跳
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    pub client_name: String,
    pub timestamp: DateTime<Utc>,
    pub system_load: Option<f64>,
    pub memory_usage_mb: Option<u64>,
}

impl Message {
    pub fn assignment_delivery(payload: AssignmentMessage) -> Self {
        Self::wrap(MessageType::AssignmentDelivery(payload))
    }

    pub fn status_report(payload: ReportMessage) -> Self {
        Self::wrap(MessageType::StatusReport(payload))
    }

    pub fn client_heartbeat(payload: HeartbeatMessage) -> Self {
        Self::wrap(MessageType::ClientHeartbeat(payload))
    }

    fn wrap(message_type: MessageType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type,
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: String) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn deserialize(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn message_type_str(&self) -> &'static str {
        match &self.message_type {
            MessageType::AssignmentDelivery(_) => "assignment_delivery",
            MessageType::StatusReport(_) => "status_report",
            MessageType::ClientHeartbeat(_) => "client_heartbeat",
        }
    }

    pub fn routing_key(&self) -> String {
        match &self.message_type {
            MessageType::AssignmentDelivery(msg) => {
                format!("assignment.{}.{}", msg.task_id, msg.assignment_id)
            }
            MessageType::StatusReport(msg) => format!("report.{}", msg.client_name),
            MessageType::ClientHeartbeat(msg) => format!("heartbeat.{}", msg.client_name),
        }
    }
}
