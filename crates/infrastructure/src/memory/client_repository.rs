use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use taskfleet_domain::{
    ClientInfo, ClientRepository, ClientStatus, FleetError, FleetResult, HeartbeatMessage,
    HeartbeatOutcome,
};

/// 内存客户端注册表
pub struct InMemoryClientRepository {
    clients: RwLock<HashMap<String, Arc<RwLock<ClientInfo>>>>,
    /// 注册顺序，list 按此顺序返回以保证分页稳定
    registration_order: RwLock<Vec<String>>,
}

impl InMemoryClientRepository {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            registration_order: RwLock::new(Vec::new()),
        }
    }

    async fn entry(&self, name: &str) -> Option<Arc<RwLock<ClientInfo>>> {
        self.clients.read().await.get(name).cloned()
    }
}

impl Default for InMemoryClientRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClientRepository for InMemoryClientRepository {
    async fn insert(&self, client: &ClientInfo) -> FleetResult<()> {
        let mut clients = self.clients.write().await;
        let replaced = clients
            .insert(
                client.name.clone(),
                Arc::new(RwLock::new(client.clone())),
            )
            .is_some();
        if !replaced {
            self.registration_order.write().await.push(client.name.clone());
        }
        debug!("客户端 {} 已写入注册表 (覆盖: {})", client.name, replaced);
        Ok(())
    }

    async fn get(&self, name: &str) -> FleetResult<Option<ClientInfo>> {
        match self.entry(name).await {
            Some(entry) => Ok(Some(entry.read().await.clone())),
            None => Ok(None),
        }
    }

    async fn list(&self, status: Option<ClientStatus>) -> FleetResult<Vec<ClientInfo>> {
        let order = self.registration_order.read().await.clone();
        let mut result = Vec::with_capacity(order.len());
        for name in order {
            if let Some(entry) = self.entry(&name).await {
                let client = entry.read().await.clone();
                if status.is_none() || status == Some(client.status) {
                    result.push(client);
                }
            }
        }
        Ok(result)
    }

    async fn update(&self, client: &ClientInfo) -> FleetResult<()> {
        let entry = self
            .entry(&client.name)
            .await
            .ok_or_else(|| FleetError::unknown_client(&client.name))?;
        *entry.write().await = client.clone();
        Ok(())
    }

    async fn remove(&self, name: &str) -> FleetResult<bool> {
        let removed = self.clients.write().await.remove(name).is_some();
        if removed {
            self.registration_order.write().await.retain(|n| n != name);
        }
        Ok(removed)
    }

    async fn apply_heartbeat(&self, heartbeat: &HeartbeatMessage) -> FleetResult<HeartbeatOutcome> {
        let entry = match self.entry(&heartbeat.client_name).await {
            Some(entry) => entry,
            None => return Ok(HeartbeatOutcome::Unknown),
        };
        let mut client = entry.write().await;
        match client.apply_heartbeat(heartbeat) {
            Some(previous) => Ok(HeartbeatOutcome::Applied { previous }),
            None => Ok(HeartbeatOutcome::Stale),
        }
    }

    async fn expire_if_stale(
        &self,
        name: &str,
        timeout_seconds: i64,
        now: DateTime<Utc>,
    ) -> FleetResult<Option<ClientInfo>> {
        let entry = match self.entry(name).await {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let mut client = entry.write().await;
        // 转换时刻在实体锁内复查，并发写入的心跳是更新的存活证据，必须获胜
        if !client.is_online() || !client.is_heartbeat_expired(timeout_seconds, now) {
            return Ok(None);
        }
        client.status = ClientStatus::Offline;
        let snapshot = client.clone();
        // 离线客户端不得持有活动指派；由调用方负责将该指派置为失败
        client.active_assignment = None;
        Ok(Some(snapshot))
    }

    async fn mark_busy(&self, name: &str, assignment_id: i64) -> FleetResult<()> {
        let entry = self
            .entry(name)
            .await
            .ok_or_else(|| FleetError::unknown_client(name))?;
        let mut client = entry.write().await;
        client.status = ClientStatus::Busy;
        client.active_assignment = Some(assignment_id);
        Ok(())
    }

    async fn mark_idle(&self, name: &str) -> FleetResult<()> {
        let entry = self
            .entry(name)
            .await
            .ok_or_else(|| FleetError::unknown_client(name))?;
        let mut client = entry.write().await;
        client.active_assignment = None;
        if client.status == ClientStatus::Busy {
            client.status = ClientStatus::Online;
        }
        Ok(())
    }
}
