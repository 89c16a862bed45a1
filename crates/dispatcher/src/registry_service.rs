use std::sync::Arc;

use tracing::{info, warn};

use taskfleet_domain::{
    ClientEvent, ClientInfo, ClientRepository, ClientStatus, FleetError, FleetResult,
};
use taskfleet_infrastructure::EventBus;

use crate::dispatch::DispatchEngine;

/// 客户端注册服务
///
/// 客户端以稳定的人为命名标识。名称仅在在线客户端之间唯一：离线名称
/// 可以被重新注册并重置状态，进程重启无需人工清理。
pub struct ClientRegistryService {
    client_repo: Arc<dyn ClientRepository>,
    engine: Arc<DispatchEngine>,
    event_bus: EventBus,
}

impl ClientRegistryService {
    pub fn new(
        client_repo: Arc<dyn ClientRepository>,
        engine: Arc<DispatchEngine>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            client_repo,
            engine,
            event_bus,
        }
    }

    /// 注册客户端
    ///
    /// 同名在线客户端存在时以 DuplicateIdentity 同步拒绝，不重试。
    pub async fn register(
        &self,
        name: &str,
        address: &str,
        capabilities: Vec<String>,
    ) -> FleetResult<ClientInfo> {
        if name.trim().is_empty() {
            return Err(FleetError::validation_error("客户端名称不能为空"));
        }
        if let Some(existing) = self.client_repo.get(name).await? {
            if existing.is_online() {
                warn!("拒绝注册: 在线客户端 {name} 已存在");
                return Err(FleetError::duplicate_identity(name));
            }
            info!("客户端 {name} 处于离线状态，重新注册并重置其状态");
        }

        let client = ClientInfo::new(name.to_string(), address.to_string(), capabilities);
        self.client_repo.insert(&client).await?;
        info!("客户端 {name} 已注册 (地址: {address})");
        self.event_bus.publish(ClientEvent::registered(name));
        Ok(client)
    }

    /// 永久移除客户端
    ///
    /// 持有中的活动指派以 "client removed" 判定失败并推进所属任务。
    pub async fn unregister(&self, name: &str) -> FleetResult<()> {
        let client = self
            .client_repo
            .get(name)
            .await?
            .ok_or_else(|| FleetError::unknown_client(name))?;

        if let Some(assignment_id) = client.active_assignment {
            warn!(
                "客户端 {name} 注销时仍持有指派 {assignment_id}，判定该指派失败"
            );
            self.engine
                .fail_assignment(assignment_id, "client removed")
                .await?;
        }

        self.client_repo.remove(name).await?;
        info!("客户端 {name} 已注销");
        self.event_bus
            .publish(ClientEvent::status_changed(name, ClientStatus::Offline));
        Ok(())
    }

    pub async fn get_client(&self, name: &str) -> FleetResult<Option<ClientInfo>> {
        self.client_repo.get(name).await
    }

    /// 按注册顺序返回客户端，可按状态过滤
    pub async fn list_clients(
        &self,
        status: Option<ClientStatus>,
    ) -> FleetResult<Vec<ClientInfo>> {
        self.client_repo.list(status).await
    }
}
