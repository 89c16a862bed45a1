//! 任务分发系统领域模型
//!
//! 定义客户端、任务、子任务指派等核心实体，以及仓储和消息队列的抽象接口。

pub mod entities;
pub mod errors;
pub mod events;
pub mod messages;
pub mod messaging;
pub mod repositories;
pub mod value_objects;

pub use entities::{Assignment, AssignmentStatus, ClientInfo, ClientStatus, SubtaskSpec, Task, TaskStatus};
pub use errors::{FleetError, FleetResult};
pub use events::{ClientEvent, DomainEvent, FleetEvent, TaskEvent};
pub use messages::{AssignmentMessage, HeartbeatMessage, Message, MessageType, ReportMessage};
pub use messaging::{assignment_queue_name, MessageQueue};
pub use repositories::{AssignmentRepository, ClientRepository, HeartbeatOutcome, TaskRepository};
pub use value_objects::ScheduleSpec;
