use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use taskfleet_domain::{
    Assignment, AssignmentRepository, AssignmentStatus, FleetError, FleetResult, Task,
    TaskRepository, TaskStatus,
};

/// 内存任务仓储，ID单调递增
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<i64, Arc<RwLock<Task>>>>,
    next_id: AtomicI64,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    async fn entry(&self, id: i64) -> Option<Arc<RwLock<Task>>> {
        self.tasks.read().await.get(&id).cloned()
    }
}

impl Default for InMemoryTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(&self, task: &Task) -> FleetResult<Task> {
        let mut created = task.clone();
        created.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.tasks
            .write()
            .await
            .insert(created.id, Arc::new(RwLock::new(created.clone())));
        debug!("任务 {} 已创建 (ID: {})", created.name, created.id);
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> FleetResult<Option<Task>> {
        match self.entry(id).await {
            Some(entry) => Ok(Some(entry.read().await.clone())),
            None => Ok(None),
        }
    }

    async fn list(&self) -> FleetResult<Vec<Task>> {
        let entries: Vec<Arc<RwLock<Task>>> =
            self.tasks.read().await.values().cloned().collect();
        let mut tasks = Vec::with_capacity(entries.len());
        for entry in entries {
            tasks.push(entry.read().await.clone());
        }
        tasks.sort_by_key(|t| t.id);
        Ok(tasks)
    }

    async fn update(&self, task: &Task) -> FleetResult<Task> {
        let entry = self
            .entry(task.id)
            .await
            .ok_or_else(|| FleetError::task_not_found(task.id))?;
        let mut stored = entry.write().await;
        let mut updated = task.clone();
        updated.updated_at = chrono::Utc::now();
        *stored = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, id: i64) -> FleetResult<bool> {
        Ok(self.tasks.write().await.remove(&id).is_some())
    }

    async fn begin_cycle(
        &self,
        task_id: i64,
        now: DateTime<Utc>,
    ) -> FleetResult<Option<Task>> {
        let entry = match self.entry(task_id).await {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let mut stored = entry.write().await;
        if stored.status != TaskStatus::Pending {
            return Ok(None);
        }
        stored.current_cycle += 1;
        stored.status = TaskStatus::Running;
        stored.next_fire_at = stored.schedule.next_fire_after(now)?;
        stored.updated_at = now;
        Ok(Some(stored.clone()))
    }

    async fn finish_cycle(
        &self,
        task_id: i64,
        cycle: i64,
        status: TaskStatus,
    ) -> FleetResult<Option<Task>> {
        let entry = match self.entry(task_id).await {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let mut stored = entry.write().await;
        // 复查：取消或更新的周期抢先落地时放弃写入
        if stored.status != TaskStatus::Running || stored.current_cycle != cycle {
            debug!(
                "任务 {task_id} 周期 {cycle} 的收尾复查失败 (当前周期 {}, 状态 {:?})",
                stored.current_cycle, stored.status
            );
            return Ok(None);
        }
        stored.status = status;
        stored.updated_at = Utc::now();
        // 周期任务在同一把锁内回到 Pending，取消无法插入终态与重排之间
        if stored.is_recurring() {
            stored.status = TaskStatus::Pending;
        }
        Ok(Some(stored.clone()))
    }

    async fn cancel(&self, task_id: i64) -> FleetResult<Option<Task>> {
        let entry = self
            .entry(task_id)
            .await
            .ok_or_else(|| FleetError::task_not_found(task_id))?;
        let mut stored = entry.write().await;
        if stored.status.is_terminal() {
            return Ok(None);
        }
        stored.status = TaskStatus::Cancelled;
        stored.next_fire_at = None;
        stored.updated_at = Utc::now();
        Ok(Some(stored.clone()))
    }
}

/// 内存指派仓储
///
/// 按任务分桶，同一任务的指派集合在一把实体锁内读写，`snapshot` 因此
/// 能以一次加锁取得派生任务状态所需的一致视图。
pub struct InMemoryAssignmentRepository {
    by_task: RwLock<HashMap<i64, Arc<RwLock<Vec<Assignment>>>>>,
    /// 指派ID -> 任务ID 索引
    index: RwLock<HashMap<i64, i64>>,
    next_id: AtomicI64,
}

impl InMemoryAssignmentRepository {
    pub fn new() -> Self {
        Self {
            by_task: RwLock::new(HashMap::new()),
            index: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    async fn bucket(&self, task_id: i64) -> Arc<RwLock<Vec<Assignment>>> {
        let mut by_task = self.by_task.write().await;
        by_task
            .entry(task_id)
            .or_insert_with(|| Arc::new(RwLock::new(Vec::new())))
            .clone()
    }

    async fn bucket_of(&self, assignment_id: i64) -> Option<Arc<RwLock<Vec<Assignment>>>> {
        let task_id = *self.index.read().await.get(&assignment_id)?;
        self.by_task.read().await.get(&task_id).cloned()
    }
}

impl Default for InMemoryAssignmentRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssignmentRepository for InMemoryAssignmentRepository {
    async fn create(&self, assignment: &Assignment) -> FleetResult<Assignment> {
        let mut created = assignment.clone();
        created.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let bucket = self.bucket(created.task_id).await;
        bucket.write().await.push(created.clone());
        self.index.write().await.insert(created.id, created.task_id);
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> FleetResult<Option<Assignment>> {
        let bucket = match self.bucket_of(id).await {
            Some(bucket) => bucket,
            None => return Ok(None),
        };
        let assignments = bucket.read().await;
        Ok(assignments.iter().find(|a| a.id == id).cloned())
    }

    async fn snapshot(&self, task_id: i64, cycle: i64) -> FleetResult<Vec<Assignment>> {
        let bucket = match self.by_task.read().await.get(&task_id).cloned() {
            Some(bucket) => bucket,
            None => return Ok(Vec::new()),
        };
        let assignments = bucket.read().await;
        Ok(assignments
            .iter()
            .filter(|a| a.cycle == cycle)
            .cloned()
            .collect())
    }

    async fn list_running(&self) -> FleetResult<Vec<Assignment>> {
        let buckets: Vec<Arc<RwLock<Vec<Assignment>>>> =
            self.by_task.read().await.values().cloned().collect();
        let mut running = Vec::new();
        for bucket in buckets {
            let assignments = bucket.read().await;
            running.extend(assignments.iter().filter(|a| a.is_running()).cloned());
        }
        Ok(running)
    }

    async fn active_for_client(&self, client_name: &str) -> FleetResult<Option<Assignment>> {
        let running = self.list_running().await?;
        Ok(running.into_iter().find(|a| a.client_name == client_name))
    }

    async fn mark_running(&self, id: i64) -> FleetResult<Option<Assignment>> {
        let bucket = self
            .bucket_of(id)
            .await
            .ok_or_else(|| FleetError::assignment_not_found(id))?;
        let mut assignments = bucket.write().await;
        let assignment = assignments
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| FleetError::assignment_not_found(id))?;
        if assignment.status != AssignmentStatus::Pending {
            return Ok(None);
        }
        assignment.update_status(AssignmentStatus::Running);
        Ok(Some(assignment.clone()))
    }

    async fn finish(
        &self,
        id: i64,
        status: AssignmentStatus,
        result: Option<String>,
        error_message: Option<String>,
    ) -> FleetResult<Option<Assignment>> {
        let bucket = self
            .bucket_of(id)
            .await
            .ok_or_else(|| FleetError::assignment_not_found(id))?;
        let mut assignments = bucket.write().await;
        let assignment = assignments
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| FleetError::assignment_not_found(id))?;
        // 终态记录只追加不覆盖；重复写入交由调用方按 DuplicateReport 记录
        if assignment.is_terminal() {
            return Ok(None);
        }
        assignment.result = result;
        assignment.error_message = error_message;
        assignment.update_status(status);
        Ok(Some(assignment.clone()))
    }
}
