//! 组件容器
//!
//! 容器是组合根：持有已发现的模块/特性、依赖图与拓扑顺序、
//! 解析链、事件总线与指标，并把生命周期批次交给编排器执行。
//!
//! 生命周期操作（`start` / `install_modules` / `uninstall_modules` /
//! `enable_features` / `disable_features`）是单写者操作：容器内部的
//! 操作锁保证每个批次（含钩子调用与持久化）运行完毕后下一个批次
//! 才开始。解析链的装载请求不受操作锁约束，可并发调用。
//!
//! # 使用示例
//!
//! ```rust,no_run
//! use mosaic_core::{Container, CoreConfig, HostEnvironment};
//! use mosaic_core::module::descriptor::{FeatureDescriptor, ModuleDescriptor};
//! use mosaic_core::module::version::ComponentVersion;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CoreConfig::default();
//!     let container = Container::new(config);
//!
//!     container
//!         .add_module(
//!             ModuleDescriptor::new("blog", "博客", ComponentVersion::parse("1.0")?)
//!                 .with_feature(FeatureDescriptor::new("blog.post", "文章")),
//!         )
//!         .await?;
//!
//!     let host = HostEnvironment::new(ComponentVersion::parse("1.0")?);
//!     container.start(host).await?;
//!
//!     container.enable_features(&["blog.post"]).await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument, warn};

use crate::core::config::CoreConfig;
use crate::event::{ContainerEvent, ContainerEventKind, EventBus, EventCallback};
use crate::module::activator::{ActivatorLocator, EmptyActivatorLocator};
use crate::module::descriptor::{FeatureDescriptor, InstallState, ModuleDescriptor};
use crate::module::graph::DependencyGraphBuilder;
use crate::module::health::HealthPropagator;
use crate::module::identity::{ComponentIdentity, ProcessorArchitecture};
use crate::module::lifecycle::LifecycleOrchestrator;
use crate::module::loader::{
    DeclarativeLoader, FileProbeLoader, LoadableUnit, ResolutionChain,
};
use crate::module::persist::{JsonFilePersistProvider, MemoryPersistProvider, PersistProvider};
use crate::module::registry::ComponentRegistry;
use crate::module::version::ComponentVersion;
use crate::utils::{CoreError, MetricsCollector, MetricsReport, Result};

// ============================================================================
// 宿主环境
// ============================================================================

/// 宿主环境
///
/// 容器启动时由宿主注入：宿主版本、处理器架构、激活器定位器
/// 与持久化提供者。
#[derive(Clone)]
pub struct HostEnvironment {
    /// 宿主版本
    pub version: ComponentVersion,

    /// 宿主处理器架构
    pub architecture: Option<ProcessorArchitecture>,

    /// 激活器定位器
    pub locator: Arc<dyn ActivatorLocator>,

    /// 持久化提供者
    pub persist: Arc<dyn PersistProvider>,
}

impl HostEnvironment {
    /// 创建默认宿主环境（无钩子、内存持久化）
    pub fn new(version: ComponentVersion) -> Self {
        Self {
            version,
            architecture: None,
            locator: Arc::new(EmptyActivatorLocator),
            persist: Arc::new(MemoryPersistProvider::new()),
        }
    }

    /// 设置激活器定位器
    pub fn with_locator(mut self, locator: Arc<dyn ActivatorLocator>) -> Self {
        self.locator = locator;
        self
    }

    /// 设置持久化提供者
    pub fn with_persist(mut self, persist: Arc<dyn PersistProvider>) -> Self {
        self.persist = persist;
        self
    }

    /// 设置处理器架构
    pub fn with_architecture(mut self, architecture: ProcessorArchitecture) -> Self {
        self.architecture = Some(architecture);
        self
    }

    /// 按配置装配宿主环境（持久化提供者按 persist 段构造）
    pub async fn from_config(config: &CoreConfig) -> Result<Self> {
        let version = ComponentVersion::parse(&config.host.version)?;
        let architecture = config
            .host
            .architecture
            .as_deref()
            .map(ProcessorArchitecture::parse)
            .transpose()?;

        let persist: Arc<dyn PersistProvider> = match config.persist.mode.as_str() {
            "file" => {
                let path = config.persist.path.clone().ok_or_else(|| {
                    CoreError::InvalidConfigValue {
                        key: "persist.path".to_string(),
                        reason: "file 模式必须指定状态文件路径".to_string(),
                    }
                })?;
                Arc::new(JsonFilePersistProvider::open(path).await?)
            }
            _ => Arc::new(MemoryPersistProvider::new()),
        };

        Ok(Self {
            version,
            architecture,
            locator: Arc::new(EmptyActivatorLocator),
            persist,
        })
    }
}

// ============================================================================
// 容器状态
// ============================================================================

/// 容器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// 已创建，尚未启动（注册阶段）
    Created,
    /// 运行中
    Started,
}

// ============================================================================
// 容器
// ============================================================================

/// 组件容器
pub struct Container {
    /// 配置
    config: CoreConfig,

    /// 组件注册表
    registry: ComponentRegistry,

    /// 解析链
    chain: Arc<ResolutionChain>,

    /// 事件总线
    bus: EventBus,

    /// 指标收集器
    metrics: Arc<MetricsCollector>,

    /// 容器状态
    state: RwLock<ContainerState>,

    /// 生命周期编排器（启动后装配）
    orchestrator: RwLock<Option<Arc<LifecycleOrchestrator>>>,

    /// 操作锁：生命周期批次单写者串行化
    op_lock: Mutex<()>,
}

impl Container {
    /// 创建容器
    pub fn new(config: CoreConfig) -> Self {
        let metrics = Arc::new(MetricsCollector::new());
        let chain = Arc::new(ResolutionChain::new(
            config.resolver.max_redirects,
            config.resolver.cache_size,
            metrics.clone(),
        ));
        Self {
            config,
            registry: ComponentRegistry::new(),
            chain,
            bus: EventBus::new(),
            metrics,
            state: RwLock::new(ContainerState::Created),
            orchestrator: RwLock::new(None),
            op_lock: Mutex::new(()),
        }
    }

    /// 注册模块描述符（仅启动前）
    pub async fn add_module(&self, descriptor: ModuleDescriptor) -> Result<String> {
        if *self.state.read().await == ContainerState::Started {
            return Err(CoreError::AlreadyStarted);
        }
        self.registry.register(descriptor).await
    }

    /// 启动容器
    ///
    /// 依次执行：激活器能力解析、持久化状态恢复、依赖图构建与
    /// 拓扑排序（环为致命错误，容器拒绝启动）、健康传播、装载器
    /// 注册，最后自动巡检（无钩子且无错的组件直接落位）。
    #[instrument(skip_all)]
    pub async fn start(&self, host: HostEnvironment) -> Result<()> {
        let _op = self.op_lock.lock().await;
        if *self.state.read().await == ContainerState::Started {
            return Err(CoreError::AlreadyStarted);
        }

        // 激活器能力解析：can_enable/can_disable 与 has_installer 在此固定
        {
            let handle = self.registry.handle();
            let mut inner = handle.write().await;
            for module in inner.modules.iter_mut() {
                module.has_installer = host.locator.module_activator(&module.id).is_some();
                for feature in module.features.iter_mut() {
                    match host.locator.feature_activator(&feature.id) {
                        Some(activator) => {
                            feature.can_enable = true;
                            feature.can_disable = activator.supports_disable();
                        }
                        None => {
                            feature.can_enable = false;
                            feature.can_disable = false;
                        }
                    }
                }
            }
        }

        // 恢复持久化的安装/启用状态
        let modules_snapshot = self.registry.list_modules().await;
        for module in &modules_snapshot {
            if module.has_installer {
                if let Some(version) = host.persist.module_installed(&module.id).await? {
                    if version != module.version {
                        warn!(
                            module_id = %module.id,
                            recorded = %version,
                            discovered = %module.version,
                            "安装记录版本与发现版本不一致"
                        );
                    }
                    let handle = self.registry.handle();
                    handle
                        .write()
                        .await
                        .set_install_state(&module.id, InstallState::Installed);
                }
            }
            for feature in &module.features {
                if feature.can_enable && host.persist.feature_enabled(&feature.id).await? {
                    let handle = self.registry.handle();
                    handle.write().await.set_enable_state(
                        &feature.id,
                        crate::module::descriptor::EnableState::Enabled,
                    );
                }
            }
        }

        // 依赖图与拓扑：环是致命配置错误
        let graph = DependencyGraphBuilder::build(&self.registry).await;
        let topo_order = graph.topological_order()?;

        HealthPropagator::propagate(&self.registry, &topo_order, &host.version).await;

        // 装载器注册：全局探测目录 + 各模块的声明式条目
        if !self.config.resolver.probe_dirs.is_empty() {
            self.chain
                .add_loader(Arc::new(FileProbeLoader::new(
                    self.config.resolver.probe_dirs.clone(),
                )))
                .await;
        }
        for module in &modules_snapshot {
            for spec in &module.loaders {
                let loader = DeclarativeLoader::from_spec(
                    spec,
                    module.shadow_path.clone(),
                    Some(module.id.clone()),
                )?;
                self.chain.add_loader(Arc::new(loader)).await;
            }
        }

        // 装配编排器并执行自动巡检
        let orchestrator = Arc::new(LifecycleOrchestrator::new(
            self.registry.clone(),
            host.persist.clone(),
            host.locator.clone(),
            host.version.clone(),
            topo_order,
            self.metrics.clone(),
        ));
        let events = orchestrator.install(&[]).await?;

        *self.orchestrator.write().await = Some(orchestrator);
        *self.state.write().await = ContainerState::Started;
        self.bus.publish_all(events).await;

        info!(
            modules = modules_snapshot.len(),
            host_version = %host.version,
            "容器已启动"
        );
        Ok(())
    }

    // ==================== 生命周期批次 ====================

    /// 安装模块批次
    pub async fn install_modules(&self, ids: &[&str]) -> Result<()> {
        let _op = self.op_lock.lock().await;
        let orchestrator = self.orchestrator_handle().await?;
        let ids = Self::owned(ids);
        let events = orchestrator.install(&ids).await?;
        self.bus.publish_all(events).await;
        Ok(())
    }

    /// 卸载模块批次（逆发现序）
    pub async fn uninstall_modules(&self, ids: &[&str]) -> Result<()> {
        let _op = self.op_lock.lock().await;
        let orchestrator = self.orchestrator_handle().await?;
        let ids = Self::owned(ids);
        let events = orchestrator.uninstall(&ids).await?;

        // 卸载提交后移除模块单元
        let mut unload_events = Vec::new();
        for event in &events {
            if event.kind == ContainerEventKind::ModuleUninstalled {
                for identity in self.chain.evict_owner(&event.subject).await {
                    unload_events.push(ContainerEvent::module_unloaded(&identity));
                }
            }
        }
        self.bus.publish_all(events).await;
        self.bus.publish_all(unload_events).await;
        Ok(())
    }

    /// 启用特性批次（严格模式）
    pub async fn enable_features(&self, ids: &[&str]) -> Result<()> {
        let _op = self.op_lock.lock().await;
        let orchestrator = self.orchestrator_handle().await?;
        let ids = Self::owned(ids);
        let events = orchestrator.enable(&ids).await?;
        self.bus.publish_all(events).await;
        Ok(())
    }

    /// 停用特性批次（含依赖方级联）
    pub async fn disable_features(&self, ids: &[&str]) -> Result<()> {
        let _op = self.op_lock.lock().await;
        let orchestrator = self.orchestrator_handle().await?;
        let ids = Self::owned(ids);
        let events = orchestrator.disable(&ids).await?;
        self.bus.publish_all(events).await;
        Ok(())
    }

    // ==================== 解析链 ====================

    /// 解析组件身份为可装载单元
    ///
    /// 可在容器启动后由多个调用方并发调用。
    pub async fn resolve_unit(&self, identity: &ComponentIdentity) -> Result<Arc<LoadableUnit>> {
        self.ensure_started().await?;
        let resolution = self.chain.resolve(identity).await?;
        if resolution.fresh {
            self.bus
                .publish(ContainerEvent::module_loaded(&resolution.unit))
                .await;
        }
        Ok(resolution.unit)
    }

    // ==================== 查询 ====================

    /// 全部模块描述符快照（发现顺序）
    pub async fn get_modules(&self) -> Vec<ModuleDescriptor> {
        self.registry.list_modules().await
    }

    /// 全部特性描述符快照（发现顺序）
    pub async fn get_features(&self) -> Vec<FeatureDescriptor> {
        self.registry.list_features().await
    }

    /// 模块描述符快照
    pub async fn get_module(&self, id: &str) -> Option<ModuleDescriptor> {
        self.registry.get_module(id).await
    }

    /// 特性描述符快照
    pub async fn get_feature(&self, id: &str) -> Option<FeatureDescriptor> {
        self.registry.get_feature(id).await
    }

    /// 模块数量
    pub async fn module_count(&self) -> usize {
        self.registry.module_count().await
    }

    /// 容器状态
    pub async fn state(&self) -> ContainerState {
        *self.state.read().await
    }

    /// 配置
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    // ==================== 事件与指标 ====================

    /// 订阅容器事件，`kind` 为 None 订阅全部
    pub async fn subscribe(
        &self,
        kind: Option<ContainerEventKind>,
        callback: EventCallback,
    ) -> String {
        self.bus.subscribe(kind, callback).await
    }

    /// 取消订阅
    pub async fn unsubscribe(&self, subscription_id: &str) -> bool {
        self.bus.unsubscribe(subscription_id).await
    }

    /// 指标快照
    pub fn stats(&self) -> MetricsReport {
        self.metrics.export()
    }

    // ==================== 内部方法 ====================

    fn owned(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    async fn ensure_started(&self) -> Result<()> {
        if *self.state.read().await == ContainerState::Started {
            Ok(())
        } else {
            Err(CoreError::NotStarted)
        }
    }

    async fn orchestrator_handle(&self) -> Result<Arc<LifecycleOrchestrator>> {
        self.orchestrator
            .read()
            .await
            .clone()
            .ok_or(CoreError::NotStarted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::descriptor::DependencyDescriptor;

    fn v(text: &str) -> ComponentVersion {
        ComponentVersion::parse(text).unwrap()
    }

    async fn hookless_container() -> Container {
        let container = Container::new(CoreConfig::default());
        container
            .add_module(
                ModuleDescriptor::new("storage", "存储", v("1.0"))
                    .with_feature(FeatureDescriptor::new("storage.kv", "KV")),
            )
            .await
            .unwrap();
        container
            .add_module(
                ModuleDescriptor::new("blog", "博客", v("1.0")).with_feature(
                    FeatureDescriptor::new("blog.post", "文章")
                        .with_dependency(DependencyDescriptor::new("storage.kv")),
                ),
            )
            .await
            .unwrap();
        container
    }

    #[tokio::test]
    async fn test_start_auto_installs_hookless_components() {
        let container = hookless_container().await;
        container.start(HostEnvironment::new(v("1.0"))).await.unwrap();

        assert_eq!(container.state().await, ContainerState::Started);
        assert!(container.get_module("blog").await.unwrap().is_installed());
        assert!(container.get_feature("blog.post").await.unwrap().is_enabled());
        assert!(container.get_feature("storage.kv").await.unwrap().is_enabled());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let container = hookless_container().await;
        container.start(HostEnvironment::new(v("1.0"))).await.unwrap();

        let err = container
            .start(HostEnvironment::new(v("1.0")))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyStarted));
    }

    #[tokio::test]
    async fn test_cycle_prevents_start() {
        let container = Container::new(CoreConfig::default());
        container
            .add_module(
                ModuleDescriptor::new("app", "app", v("1.0"))
                    .with_feature(
                        FeatureDescriptor::new("a", "a")
                            .with_dependency(DependencyDescriptor::new("b")),
                    )
                    .with_feature(
                        FeatureDescriptor::new("b", "b")
                            .with_dependency(DependencyDescriptor::new("c")),
                    )
                    .with_feature(
                        FeatureDescriptor::new("c", "c")
                            .with_dependency(DependencyDescriptor::new("a")),
                    ),
            )
            .await
            .unwrap();

        let err = container
            .start(HostEnvironment::new(v("1.0")))
            .await
            .unwrap_err();
        match err {
            CoreError::CircularDependency { cycle } => {
                let members: std::collections::HashSet<&str> =
                    cycle.iter().map(String::as_str).collect();
                assert_eq!(members, std::collections::HashSet::from(["a", "b", "c"]));
            }
            other => panic!("expected cycle error, got {other}"),
        }
        assert_eq!(container.state().await, ContainerState::Created);
    }

    #[tokio::test]
    async fn test_operations_require_start() {
        let container = hookless_container().await;
        assert!(matches!(
            container.install_modules(&["blog"]).await,
            Err(CoreError::NotStarted)
        ));
        assert!(matches!(
            container
                .resolve_unit(&ComponentIdentity::new("blog"))
                .await,
            Err(CoreError::NotStarted)
        ));
    }

    #[tokio::test]
    async fn test_add_module_after_start_fails() {
        let container = hookless_container().await;
        container.start(HostEnvironment::new(v("1.0"))).await.unwrap();

        let err = container
            .add_module(ModuleDescriptor::new("late", "late", v("1.0")))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyStarted));
    }

    #[tokio::test]
    async fn test_unknown_ids_are_argument_errors() {
        let container = hookless_container().await;
        container.start(HostEnvironment::new(v("1.0"))).await.unwrap();

        assert!(matches!(
            container.install_modules(&["ghost"]).await,
            Err(CoreError::ModuleNotFound(_))
        ));
        assert!(matches!(
            container.enable_features(&["ghost"]).await,
            Err(CoreError::FeatureNotFound(_))
        ));
        assert!(matches!(
            container.disable_features(&["ghost"]).await,
            Err(CoreError::FeatureNotFound(_))
        ));
        assert!(matches!(
            container.uninstall_modules(&["ghost"]).await,
            Err(CoreError::ModuleNotFound(_))
        ));
    }
}
