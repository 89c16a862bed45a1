use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info};

use taskfleet_core::AppConfig;
use taskfleet_dispatcher::{
    ClientRegistryService, DispatchEngine, HeartbeatMonitor, HeartbeatMonitorConfig,
    ReportListener, TaskControlService, TaskScheduler, TaskSchedulerConfig, TimeoutWatcher,
    TimeoutWatcherConfig,
};
use taskfleet_domain::MessageQueue;
use taskfleet_infrastructure::{
    EventBus, InMemoryAssignmentRepository, InMemoryClientRepository, InMemoryMessageQueue,
    InMemoryTaskRepository, MetricsCollector,
};
use taskfleet_worker::{ClientService, ExecutorRegistry, HeartbeatManager};

/// 应用运行模式
#[derive(Debug, Clone)]
pub enum AppMode {
    /// 仅运行服务端（注册、调度、分发、存活与超时巡检）
    Server,
    /// 仅运行客户端（执行器、心跳、指派轮询）
    Client,
    /// 运行所有组件
    All,
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    message_queue: Arc<dyn MessageQueue>,
    event_bus: EventBus,
    registry: Arc<ClientRegistryService>,
    monitor: Arc<HeartbeatMonitor>,
    scheduler: Arc<TaskScheduler>,
    watcher: Arc<TimeoutWatcher>,
    listener: ReportListener,
    control: Arc<TaskControlService>,
}

impl Application {
    /// 创建新的应用实例
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);

        if config.observability.metrics_enabled {
            MetricsCollector::install_prometheus_recorder()
                .context("安装Prometheus指标导出器失败")?;
        }
        let metrics = Arc::new(MetricsCollector::new().context("创建指标收集器失败")?);

        let message_queue: Arc<dyn MessageQueue> = Arc::new(InMemoryMessageQueue::new());
        let event_bus = EventBus::new(256);

        let client_repo = Arc::new(InMemoryClientRepository::new());
        let task_repo = Arc::new(InMemoryTaskRepository::new());
        let assignment_repo = Arc::new(InMemoryAssignmentRepository::new());

        let engine = Arc::new(DispatchEngine::new(
            client_repo.clone(),
            task_repo.clone(),
            assignment_repo.clone(),
            message_queue.clone(),
            config.queues.assignment_prefix.clone(),
            event_bus.clone(),
            metrics.clone(),
        ));

        let registry = Arc::new(ClientRegistryService::new(
            client_repo.clone(),
            engine.clone(),
            event_bus.clone(),
        ));

        let monitor = Arc::new(HeartbeatMonitor::new(
            client_repo.clone(),
            engine.clone(),
            event_bus.clone(),
            metrics.clone(),
            Some(HeartbeatMonitorConfig {
                heartbeat_timeout_seconds: config.liveness.heartbeat_timeout_seconds,
                sweep_interval_seconds: config.liveness.sweep_interval_seconds,
            }),
        ));

        let scheduler = Arc::new(TaskScheduler::new(
            task_repo.clone(),
            engine.clone(),
            metrics.clone(),
            Some(TaskSchedulerConfig {
                schedule_interval_seconds: config.dispatcher.schedule_interval_seconds,
            }),
        ));

        let watcher = Arc::new(TimeoutWatcher::new(
            assignment_repo,
            engine.clone(),
            Some(TimeoutWatcherConfig {
                check_interval_seconds: config.dispatcher.timeout_check_interval_seconds,
            }),
        ));

        let listener = ReportListener::new(
            engine.clone(),
            monitor.clone(),
            message_queue.clone(),
            config.queues.reports.clone(),
            config.queues.heartbeats.clone(),
        );

        let control = Arc::new(TaskControlService::new(
            task_repo,
            engine.clone(),
            event_bus.clone(),
        ));

        Ok(Self {
            config,
            mode,
            message_queue,
            event_bus,
            registry,
            monitor,
            scheduler,
            watcher,
            listener,
            control,
        })
    }

    /// 任务控制入口（创建、取消、查询）
    pub fn control(&self) -> Arc<TaskControlService> {
        self.control.clone()
    }

    /// 客户端注册入口
    pub fn registry(&self) -> Arc<ClientRegistryService> {
        self.registry.clone()
    }

    /// 事件总线，供外部观察者订阅状态变更
    pub fn event_bus(&self) -> EventBus {
        self.event_bus.clone()
    }

    /// 运行应用程序
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);

        match self.mode {
            AppMode::Server => {
                self.run_server(shutdown_rx).await?;
            }
            AppMode::Client => {
                self.run_client(shutdown_rx).await?;
            }
            AppMode::All => {
                self.run_all_components(shutdown_rx).await?;
            }
        }

        Ok(())
    }

    /// 运行服务端组件
    async fn run_server(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动服务端组件");

        let scanner_handle = {
            let scheduler = self.scheduler.clone();
            tokio::spawn(async move {
                if let Err(e) = scheduler.start_scanning().await {
                    error!("任务点火扫描循环出错: {e}");
                }
            })
        };

        let sweep_handle = {
            let monitor = self.monitor.clone();
            tokio::spawn(async move {
                if let Err(e) = monitor.start_sweeping().await {
                    error!("存活巡检循环出错: {e}");
                }
            })
        };

        let watcher_handle = {
            let watcher = self.watcher.clone();
            tokio::spawn(async move {
                if let Err(e) = watcher.start_watching().await {
                    error!("执行超时巡检循环出错: {e}");
                }
            })
        };

        let listener_handle = {
            let listener = self.listener.clone();
            tokio::spawn(async move {
                if let Err(e) = listener.listen_for_updates().await {
                    error!("回报与心跳监听出错: {e}");
                }
            })
        };

        let _ = shutdown_rx.recv().await;
        info!("服务端收到关闭信号");

        self.scheduler.stop().await;
        self.monitor.stop().await;
        self.watcher.stop().await;
        self.listener.stop().await;

        let _ = tokio::join!(scanner_handle, sweep_handle, watcher_handle, listener_handle);

        info!("服务端组件已停止");
        Ok(())
    }

    /// 运行客户端组件
    async fn run_client(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let client_config = &self.config.client;
        info!("启动客户端: {}", client_config.name);

        // 配置声明的能力决定暴露哪些内置执行器
        let executors = ExecutorRegistry::with_capabilities(&client_config.capabilities);
        let service = Arc::new(ClientService::new(
            client_config.name.clone(),
            executors,
            self.message_queue.clone(),
            &self.config.queues.assignment_prefix,
            self.config.queues.reports.clone(),
            client_config.poll_interval_ms,
        ));

        // 同进程部署下注册直达注册表；网络分发是另一层的事
        self.registry
            .register(
                &client_config.name,
                &client_config.address,
                service.capabilities(),
            )
            .await
            .with_context(|| format!("注册客户端 {} 失败", client_config.name))?;

        let heartbeat = Arc::new(HeartbeatManager::new(
            client_config.name.clone(),
            self.message_queue.clone(),
            self.config.queues.heartbeats.clone(),
            client_config.heartbeat_interval_seconds,
        ));

        let heartbeat_handle = {
            let heartbeat = heartbeat.clone();
            let shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move {
                if let Err(e) = heartbeat.run(shutdown_rx).await {
                    error!("心跳上报循环出错: {e}");
                }
            })
        };

        let poll_handle = {
            let service = service.clone();
            let shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move {
                if let Err(e) = service.run(shutdown_rx).await {
                    error!("指派轮询循环出错: {e}");
                }
            })
        };

        let _ = shutdown_rx.recv().await;
        info!("客户端 {} 收到关闭信号", client_config.name);

        let _ = tokio::join!(heartbeat_handle, poll_handle);

        // 注销会把仍在执行的指派判失败，属于预期语义
        if let Err(e) = self.registry.unregister(&client_config.name).await {
            error!("注销客户端 {} 失败: {e}", client_config.name);
        }

        info!("客户端 {} 已停止", client_config.name);
        Ok(())
    }

    /// 运行所有组件
    async fn run_all_components(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("以完整模式启动所有组件");

        let server_rx = shutdown_rx.resubscribe();
        let client_rx = shutdown_rx.resubscribe();

        if self.config.client.enabled {
            let (server_result, client_result) =
                tokio::join!(self.run_server(server_rx), self.run_client(client_rx));
            server_result?;
            client_result?;
        } else {
            self.run_server(server_rx).await?;
        }

        info!("所有组件已停止");
        Ok(())
    }
}
