//! 内存仓储实现
//!
//! 共享可变状态按实体加锁：外层map锁只在查找期间短暂持有，单条记录的
//! 变更在各自的实体锁内完成，互不相关的客户端/任务不会相互串行化。

mod client_repository;
mod task_store;

pub use client_repository::InMemoryClientRepository;
pub use task_store::{InMemoryAssignmentRepository, InMemoryTaskRepository};
