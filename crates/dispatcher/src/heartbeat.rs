use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use taskfleet_domain::{
    ClientEvent, ClientInfo, ClientRepository, ClientStatus, FleetResult, HeartbeatMessage,
    HeartbeatOutcome,
};
use taskfleet_infrastructure::{EventBus, MetricsCollector};

use crate::dispatch::DispatchEngine;

/// 心跳监视配置
#[derive(Debug, Clone)]
pub struct HeartbeatMonitorConfig {
    /// 心跳超时时间（秒）
    pub heartbeat_timeout_seconds: i64,
    /// 存活巡检间隔（秒），与各客户端的心跳间隔相互独立
    pub sweep_interval_seconds: u64,
}

impl Default for HeartbeatMonitorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_seconds: 90,
            sweep_interval_seconds: 30,
        }
    }
}

/// 心跳监视器
///
/// 入站心跳按时间戳应用（last-writer-wins），离线客户端凭心跳自愈。
/// 后台巡检主动老化存活状态：死掉的客户端不会再发心跳，只有巡检能
/// 发现它。巡检与心跳竞争时，实体锁内的复查保证心跳获胜。
pub struct HeartbeatMonitor {
    client_repo: Arc<dyn ClientRepository>,
    engine: Arc<DispatchEngine>,
    event_bus: EventBus,
    metrics: Arc<MetricsCollector>,
    config: HeartbeatMonitorConfig,
    running: Arc<tokio::sync::RwLock<bool>>,
}

impl HeartbeatMonitor {
    pub fn new(
        client_repo: Arc<dyn ClientRepository>,
        engine: Arc<DispatchEngine>,
        event_bus: EventBus,
        metrics: Arc<MetricsCollector>,
        config: Option<HeartbeatMonitorConfig>,
    ) -> Self {
        Self {
            client_repo,
            engine,
            event_bus,
            metrics,
            config: config.unwrap_or_default(),
            running: Arc::new(tokio::sync::RwLock::new(false)),
        }
    }

    /// 应用一次入站心跳
    ///
    /// 时间戳不晚于已记录值的心跳按 last-writer-wins 丢弃并记录日志，
    /// 从不应用；离线 -> 在线的自愈恰好产生一个状态事件。
    pub async fn record_heartbeat(&self, heartbeat: &HeartbeatMessage) -> FleetResult<()> {
        match self.client_repo.apply_heartbeat(heartbeat).await? {
            HeartbeatOutcome::Applied { previous } => {
                debug!("已应用客户端 {} 的心跳", heartbeat.client_name);
                if previous == ClientStatus::Offline {
                    info!("客户端 {} 凭心跳自愈，重新上线", heartbeat.client_name);
                    self.event_bus.publish(ClientEvent::status_changed(
                        &heartbeat.client_name,
                        ClientStatus::Online,
                    ));
                }
            }
            HeartbeatOutcome::Stale => {
                warn!(
                    "丢弃客户端 {} 的过期心跳 (时间戳 {})",
                    heartbeat.client_name, heartbeat.timestamp
                );
            }
            HeartbeatOutcome::Unknown => {
                warn!(
                    "收到未注册客户端 {} 的心跳，客户端可能需要重新注册",
                    heartbeat.client_name
                );
            }
        }
        Ok(())
    }

    /// 执行一轮存活巡检，返回本轮被判定离线的客户端
    pub async fn run_sweep(&self) -> FleetResult<Vec<ClientInfo>> {
        let start = std::time::Instant::now();
        let now = Utc::now();
        let clients = self.client_repo.list(None).await?;
        let mut expired = Vec::new();

        for client in &clients {
            if !client.is_online() {
                continue;
            }
            // 过期判定在实体锁内复查，与此并发到达的心跳获胜
            let snapshot = self
                .client_repo
                .expire_if_stale(&client.name, self.config.heartbeat_timeout_seconds, now)
                .await?;
            if let Some(snapshot) = snapshot {
                warn!(
                    "客户端 {} 心跳超时 (上次心跳: {})，判定离线",
                    snapshot.name, snapshot.last_heartbeat
                );
                self.metrics.record_client_expired(&snapshot.name);
                self.event_bus.publish(ClientEvent::status_changed(
                    &snapshot.name,
                    ClientStatus::Offline,
                ));
                // 离线客户端不得持有活动指派
                if let Some(assignment_id) = snapshot.active_assignment {
                    self.engine
                        .fail_assignment(assignment_id, "client timeout")
                        .await?;
                }
                expired.push(snapshot);
            }
        }

        let online = self
            .client_repo
            .list(None)
            .await?
            .iter()
            .filter(|c| c.is_online())
            .count();
        self.metrics.update_online_clients(online as f64);
        self.metrics
            .record_liveness_sweep(start.elapsed().as_secs_f64());

        if !expired.is_empty() {
            info!("本轮巡检判定 {} 个客户端离线", expired.len());
        }
        Ok(expired)
    }

    /// 启动巡检循环，直到 stop 被调用
    pub async fn start_sweeping(&self) -> FleetResult<()> {
        info!(
            "启动存活巡检循环 (超时 {}s, 间隔 {}s)",
            self.config.heartbeat_timeout_seconds, self.config.sweep_interval_seconds
        );
        {
            let mut running = self.running.write().await;
            *running = true;
        }
        let interval = Duration::from_secs(self.config.sweep_interval_seconds);
        loop {
            if !*self.running.read().await {
                info!("收到停止信号，退出存活巡检循环");
                break;
            }
            if let Err(e) = self.run_sweep().await {
                error!("存活巡检出错: {e}");
            }
            tokio::time::sleep(interval).await;
        }
        Ok(())
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!("存活巡检停止信号已发送");
    }
}
