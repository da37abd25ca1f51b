//! # 生命周期集成测试
//!
//! 覆盖安装/卸载、启用/停用批次的完整语义：
//! - 钩子调用次数与状态迁移
//! - 守卫先行：激活被拒、依赖约束冲突在任何变更之前失败
//! - 事务回滚：钩子失败与持久化失败都不留下部分效果
//! - 卸载的级联强制停用与阻塞规则

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mosaic_core::module::activator::{ActivatorLocator, FeatureActivator, ModuleActivator};
use mosaic_core::module::descriptor::{
    DependencyDescriptor, FeatureDescriptor, ModuleDescriptor,
};
use mosaic_core::module::persist::{MemoryPersistProvider, PersistProvider};
use mosaic_core::module::version::ComponentVersion;
use mosaic_core::{Container, CoreConfig, CoreError, HostEnvironment, VersionSpecifier};

// ============================================================================
// 测试辅助结构
// ============================================================================

/// 记录调用次数的模块激活器
#[derive(Default)]
struct CountingModuleActivator {
    installs: AtomicUsize,
    uninstalls: AtomicUsize,
    fail_install: AtomicBool,
}

#[async_trait]
impl ModuleActivator for CountingModuleActivator {
    async fn install(&self) -> mosaic_core::Result<()> {
        if self.fail_install.load(Ordering::SeqCst) {
            return Err(CoreError::Internal("安装钩子被注入失败".to_string()));
        }
        self.installs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn uninstall(&self) -> mosaic_core::Result<()> {
        self.uninstalls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 记录调用次数的特性激活器
struct CountingFeatureActivator {
    enables: AtomicUsize,
    disables: AtomicUsize,
    supports_disable: bool,
    fail_enable: AtomicBool,
}

impl CountingFeatureActivator {
    fn new(supports_disable: bool) -> Self {
        Self {
            enables: AtomicUsize::new(0),
            disables: AtomicUsize::new(0),
            supports_disable,
            fail_enable: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl FeatureActivator for CountingFeatureActivator {
    async fn enable(&self) -> mosaic_core::Result<()> {
        if self.fail_enable.load(Ordering::SeqCst) {
            return Err(CoreError::Internal("启用钩子被注入失败".to_string()));
        }
        self.enables.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disable(&self) -> mosaic_core::Result<()> {
        self.disables.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn supports_disable(&self) -> bool {
        self.supports_disable
    }
}

/// 按 ID 查表的定位器
#[derive(Default)]
struct TableLocator {
    modules: HashMap<String, Arc<CountingModuleActivator>>,
    features: HashMap<String, Arc<CountingFeatureActivator>>,
}

impl TableLocator {
    fn with_module(mut self, id: &str) -> Self {
        self.modules
            .insert(id.to_string(), Arc::new(CountingModuleActivator::default()));
        self
    }

    fn with_feature(mut self, id: &str, supports_disable: bool) -> Self {
        self.features.insert(
            id.to_string(),
            Arc::new(CountingFeatureActivator::new(supports_disable)),
        );
        self
    }

    fn module(&self, id: &str) -> &CountingModuleActivator {
        &self.modules[id]
    }

    fn feature(&self, id: &str) -> &CountingFeatureActivator {
        &self.features[id]
    }
}

impl ActivatorLocator for TableLocator {
    fn module_activator(&self, module_id: &str) -> Option<Arc<dyn ModuleActivator>> {
        self.modules
            .get(module_id)
            .map(|a| a.clone() as Arc<dyn ModuleActivator>)
    }

    fn feature_activator(&self, feature_id: &str) -> Option<Arc<dyn FeatureActivator>> {
        self.features
            .get(feature_id)
            .map(|a| a.clone() as Arc<dyn FeatureActivator>)
    }
}

/// 对指定特性注入持久化失败的提供者
struct FailingPersist {
    inner: MemoryPersistProvider,
    fail_feature: String,
}

#[async_trait]
impl PersistProvider for FailingPersist {
    async fn install_module(
        &self,
        module_id: &str,
        version: &ComponentVersion,
    ) -> mosaic_core::Result<()> {
        self.inner.install_module(module_id, version).await
    }

    async fn uninstall_module(&self, module_id: &str) -> mosaic_core::Result<()> {
        self.inner.uninstall_module(module_id).await
    }

    async fn module_installed(
        &self,
        module_id: &str,
    ) -> mosaic_core::Result<Option<ComponentVersion>> {
        self.inner.module_installed(module_id).await
    }

    async fn enable_feature(&self, feature_id: &str) -> mosaic_core::Result<()> {
        if feature_id == self.fail_feature {
            return Err(CoreError::PersistFailed("存储被注入失败".to_string()));
        }
        self.inner.enable_feature(feature_id).await
    }

    async fn disable_feature(&self, feature_id: &str) -> mosaic_core::Result<()> {
        self.inner.disable_feature(feature_id).await
    }

    async fn feature_enabled(&self, feature_id: &str) -> mosaic_core::Result<bool> {
        self.inner.feature_enabled(feature_id).await
    }
}

fn v(text: &str) -> ComponentVersion {
    ComponentVersion::parse(text).unwrap()
}

// ============================================================================
// 安装
// ============================================================================

#[tokio::test]
async fn install_invokes_hook_once_and_cascades_enable() {
    let locator = Arc::new(
        TableLocator::default()
            .with_module("blog")
            .with_feature("blog.post", true),
    );
    let persist = MemoryPersistProvider::shared();

    let container = Container::new(CoreConfig::default());
    container
        .add_module(
            ModuleDescriptor::new("blog", "博客", v("1.2"))
                .with_feature(FeatureDescriptor::new("blog.post", "文章")),
        )
        .await
        .unwrap();
    container
        .start(
            HostEnvironment::new(v("1.0"))
                .with_locator(locator.clone())
                .with_persist(persist.clone()),
        )
        .await
        .unwrap();

    // 启动后带安装钩子的模块保持待安装
    assert!(!container.get_module("blog").await.unwrap().is_installed());

    container.install_modules(&["blog"]).await.unwrap();

    assert_eq!(locator.module("blog").installs.load(Ordering::SeqCst), 1);
    assert!(container.get_module("blog").await.unwrap().is_installed());
    // 级联启用了本模块的特性
    assert_eq!(locator.feature("blog.post").enables.load(Ordering::SeqCst), 1);
    assert!(container.get_feature("blog.post").await.unwrap().is_enabled());
    // 持久化记录在钩子成功后写入
    assert_eq!(persist.installed_modules().await, vec!["blog".to_string()]);
    assert_eq!(persist.enabled_features().await, vec!["blog.post".to_string()]);
}

#[tokio::test]
async fn install_of_unhealthy_module_is_rejected_without_effect() {
    let locator = Arc::new(TableLocator::default().with_module("legacy"));
    let persist = MemoryPersistProvider::shared();

    let container = Container::new(CoreConfig::default());
    container
        .add_module(
            ModuleDescriptor::new("legacy", "遗留", v("1.0"))
                .with_host_requirement(VersionSpecifier::parse(">=9.0").unwrap())
                .with_feature(FeatureDescriptor::new("legacy.api", "API")),
        )
        .await
        .unwrap();
    container
        .start(
            HostEnvironment::new(v("1.0"))
                .with_locator(locator.clone())
                .with_persist(persist.clone()),
        )
        .await
        .unwrap();

    let err = container.install_modules(&["legacy"]).await.unwrap_err();
    assert!(matches!(err, CoreError::ActivationBlocked { .. }));

    assert_eq!(locator.module("legacy").installs.load(Ordering::SeqCst), 0);
    assert!(!container.get_module("legacy").await.unwrap().is_installed());
    assert!(persist.installed_modules().await.is_empty());
}

#[tokio::test]
async fn install_hook_failure_rolls_back_whole_batch() {
    let locator = Arc::new(
        TableLocator::default()
            .with_module("first")
            .with_module("second"),
    );
    locator
        .module("second")
        .fail_install
        .store(true, Ordering::SeqCst);
    let persist = MemoryPersistProvider::shared();

    let container = Container::new(CoreConfig::default());
    container
        .add_module(ModuleDescriptor::new("first", "甲", v("1.0")))
        .await
        .unwrap();
    container
        .add_module(ModuleDescriptor::new("second", "乙", v("1.0")))
        .await
        .unwrap();
    container
        .start(
            HostEnvironment::new(v("1.0"))
                .with_locator(locator.clone())
                .with_persist(persist.clone()),
        )
        .await
        .unwrap();

    let err = container
        .install_modules(&["first", "second"])
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InstallHookFailed { .. }));

    // first 的安装钩子执行过，但整批回滚后状态与存储都未留效果
    assert_eq!(locator.module("first").installs.load(Ordering::SeqCst), 1);
    assert!(!container.get_module("first").await.unwrap().is_installed());
    assert!(!container.get_module("second").await.unwrap().is_installed());
    assert!(persist.installed_modules().await.is_empty());
}

// ============================================================================
// 启用 / 停用
// ============================================================================

#[tokio::test]
async fn enable_hook_failure_rolls_back_earlier_members() {
    let locator = Arc::new(
        TableLocator::default()
            .with_feature("tools.alpha", true)
            .with_feature("tools.beta", true),
    );
    locator
        .feature("tools.beta")
        .fail_enable
        .store(true, Ordering::SeqCst);
    let persist = MemoryPersistProvider::shared();

    let container = Container::new(CoreConfig::default());
    container
        .add_module(
            ModuleDescriptor::new("tools", "工具", v("1.0"))
                .with_feature(FeatureDescriptor::new("tools.alpha", "甲"))
                .with_feature(FeatureDescriptor::new("tools.beta", "乙")),
        )
        .await
        .unwrap();
    container
        .start(
            HostEnvironment::new(v("1.0"))
                .with_locator(locator.clone())
                .with_persist(persist.clone()),
        )
        .await
        .unwrap();

    let err = container
        .enable_features(&["tools.alpha", "tools.beta"])
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::EnableHookFailed { .. }));

    // alpha 的钩子执行过，但状态与存储都被回滚
    assert_eq!(locator.feature("tools.alpha").enables.load(Ordering::SeqCst), 1);
    assert!(!container.get_feature("tools.alpha").await.unwrap().is_enabled());
    assert!(!container.get_feature("tools.beta").await.unwrap().is_enabled());
    assert!(persist.enabled_features().await.is_empty());
}

#[tokio::test]
async fn persist_failure_rolls_back_states_and_records() {
    let locator = Arc::new(
        TableLocator::default()
            .with_feature("tools.alpha", true)
            .with_feature("tools.beta", true),
    );
    let persist = Arc::new(FailingPersist {
        inner: MemoryPersistProvider::new(),
        fail_feature: "tools.beta".to_string(),
    });

    let container = Container::new(CoreConfig::default());
    container
        .add_module(
            ModuleDescriptor::new("tools", "工具", v("1.0"))
                .with_feature(FeatureDescriptor::new("tools.alpha", "甲"))
                .with_feature(FeatureDescriptor::new("tools.beta", "乙")),
        )
        .await
        .unwrap();
    container
        .start(
            HostEnvironment::new(v("1.0"))
                .with_locator(locator.clone())
                .with_persist(persist.clone()),
        )
        .await
        .unwrap();

    // 两个钩子都成功，第二条持久化提交失败 -> 已提交的第一条回滚
    let err = container
        .enable_features(&["tools.alpha", "tools.beta"])
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::PersistFailed(_)));

    assert!(!container.get_feature("tools.alpha").await.unwrap().is_enabled());
    assert!(!container.get_feature("tools.beta").await.unwrap().is_enabled());
    assert!(persist.inner.enabled_features().await.is_empty());
}

#[tokio::test]
async fn disable_blocked_by_one_way_dependent_leaves_everything_unchanged() {
    // ui.panel 有启用钩子、无停用钩子（单向启用），依赖 core.api
    let locator = Arc::new(
        TableLocator::default()
            .with_feature("core.api", true)
            .with_feature("ui.panel", false),
    );
    let persist = MemoryPersistProvider::shared();

    let container = Container::new(CoreConfig::default());
    container
        .add_module(
            ModuleDescriptor::new("core-mod", "核心", v("1.0"))
                .with_feature(FeatureDescriptor::new("core.api", "API")),
        )
        .await
        .unwrap();
    container
        .add_module(
            ModuleDescriptor::new("ui-mod", "界面", v("1.0")).with_feature(
                FeatureDescriptor::new("ui.panel", "面板")
                    .with_dependency(DependencyDescriptor::new("core.api")),
            ),
        )
        .await
        .unwrap();
    container
        .start(
            HostEnvironment::new(v("1.0"))
                .with_locator(locator.clone())
                .with_persist(persist.clone()),
        )
        .await
        .unwrap();

    container
        .enable_features(&["core.api", "ui.panel"])
        .await
        .unwrap();

    let err = container.disable_features(&["core.api"]).await.unwrap_err();
    match err {
        CoreError::DependencyViolation { dependents, .. } => {
            assert_eq!(dependents, vec!["ui.panel".to_string()]);
        }
        other => panic!("expected dependency violation, got {other}"),
    }

    // 状态与持久化记录都保持不变
    assert!(container.get_feature("core.api").await.unwrap().is_enabled());
    assert!(container.get_feature("ui.panel").await.unwrap().is_enabled());
    let mut enabled = persist.enabled_features().await;
    enabled.sort();
    assert_eq!(enabled, vec!["core.api".to_string(), "ui.panel".to_string()]);
    assert_eq!(locator.feature("core.api").disables.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn disable_cascades_leaf_first() {
    // chain: c 依赖 b 依赖 a，全部可停用；停用 a 级联停用 b、c
    let locator = Arc::new(
        TableLocator::default()
            .with_feature("chain.a", true)
            .with_feature("chain.b", true)
            .with_feature("chain.c", true),
    );
    let persist = MemoryPersistProvider::shared();

    let container = Container::new(CoreConfig::default());
    container
        .add_module(
            ModuleDescriptor::new("chain", "链", v("1.0"))
                .with_feature(FeatureDescriptor::new("chain.a", "a"))
                .with_feature(
                    FeatureDescriptor::new("chain.b", "b")
                        .with_dependency(DependencyDescriptor::new("chain.a")),
                )
                .with_feature(
                    FeatureDescriptor::new("chain.c", "c")
                        .with_dependency(DependencyDescriptor::new("chain.b")),
                ),
        )
        .await
        .unwrap();
    container
        .start(
            HostEnvironment::new(v("1.0"))
                .with_locator(locator.clone())
                .with_persist(persist.clone()),
        )
        .await
        .unwrap();

    container
        .enable_features(&["chain.a", "chain.b", "chain.c"])
        .await
        .unwrap();

    container.disable_features(&["chain.a"]).await.unwrap();

    for id in ["chain.a", "chain.b", "chain.c"] {
        assert!(
            !container.get_feature(id).await.unwrap().is_enabled(),
            "{id} 应已停用"
        );
        assert_eq!(locator.feature(id).disables.load(Ordering::SeqCst), 1);
    }
    assert!(persist.enabled_features().await.is_empty());
}

// ============================================================================
// 卸载
// ============================================================================

#[tokio::test]
async fn uninstall_blocked_by_one_way_dependent_in_other_module() {
    let locator = Arc::new(
        TableLocator::default()
            .with_module("core-mod")
            .with_module("ui-mod")
            .with_feature("core.api", true)
            .with_feature("ui.panel", false),
    );
    let persist = MemoryPersistProvider::shared();

    let container = Container::new(CoreConfig::default());
    container
        .add_module(
            ModuleDescriptor::new("core-mod", "核心", v("1.0"))
                .with_feature(FeatureDescriptor::new("core.api", "API")),
        )
        .await
        .unwrap();
    container
        .add_module(
            ModuleDescriptor::new("ui-mod", "界面", v("1.0")).with_feature(
                FeatureDescriptor::new("ui.panel", "面板")
                    .with_dependency(DependencyDescriptor::new("core.api")),
            ),
        )
        .await
        .unwrap();
    container
        .start(
            HostEnvironment::new(v("1.0"))
                .with_locator(locator.clone())
                .with_persist(persist.clone()),
        )
        .await
        .unwrap();

    container
        .install_modules(&["core-mod", "ui-mod"])
        .await
        .unwrap();
    assert!(container.get_feature("ui.panel").await.unwrap().is_enabled());

    // 单独卸载 core-mod 被 ui.panel 阻塞
    let err = container.uninstall_modules(&["core-mod"]).await.unwrap_err();
    assert!(matches!(err, CoreError::DependencyViolation { .. }));
    assert!(container.get_module("core-mod").await.unwrap().is_installed());

    // 两个模块一起卸载则放行：ui.panel 属于同批卸载的模块
    container
        .uninstall_modules(&["core-mod", "ui-mod"])
        .await
        .unwrap();

    assert!(!container.get_module("core-mod").await.unwrap().is_installed());
    assert!(!container.get_module("ui-mod").await.unwrap().is_installed());
    assert!(!container.get_feature("core.api").await.unwrap().is_enabled());
    assert!(!container.get_feature("ui.panel").await.unwrap().is_enabled());
    assert_eq!(locator.module("core-mod").uninstalls.load(Ordering::SeqCst), 1);
    assert_eq!(locator.module("ui-mod").uninstalls.load(Ordering::SeqCst), 1);
    assert!(persist.installed_modules().await.is_empty());
    assert!(persist.enabled_features().await.is_empty());
}

#[tokio::test]
async fn uninstall_force_disables_own_features_first() {
    let locator = Arc::new(
        TableLocator::default()
            .with_module("blog")
            .with_feature("blog.post", true),
    );
    let persist = MemoryPersistProvider::shared();

    let container = Container::new(CoreConfig::default());
    container
        .add_module(
            ModuleDescriptor::new("blog", "博客", v("1.0"))
                .with_feature(FeatureDescriptor::new("blog.post", "文章")),
        )
        .await
        .unwrap();
    container
        .start(
            HostEnvironment::new(v("1.0"))
                .with_locator(locator.clone())
                .with_persist(persist.clone()),
        )
        .await
        .unwrap();

    container.install_modules(&["blog"]).await.unwrap();
    container.uninstall_modules(&["blog"]).await.unwrap();

    assert_eq!(locator.feature("blog.post").disables.load(Ordering::SeqCst), 1);
    assert_eq!(locator.module("blog").uninstalls.load(Ordering::SeqCst), 1);
    assert!(persist.installed_modules().await.is_empty());
    assert!(persist.enabled_features().await.is_empty());
}

// ============================================================================
// 持久化状态恢复
// ============================================================================

#[tokio::test]
async fn start_restores_persisted_states_without_invoking_hooks() {
    let locator = Arc::new(
        TableLocator::default()
            .with_module("blog")
            .with_feature("blog.post", true),
    );
    let persist = MemoryPersistProvider::shared();
    persist.install_module("blog", &v("1.0")).await.unwrap();
    persist.enable_feature("blog.post").await.unwrap();

    let container = Container::new(CoreConfig::default());
    container
        .add_module(
            ModuleDescriptor::new("blog", "博客", v("1.0"))
                .with_feature(FeatureDescriptor::new("blog.post", "文章")),
        )
        .await
        .unwrap();
    container
        .start(
            HostEnvironment::new(v("1.0"))
                .with_locator(locator.clone())
                .with_persist(persist.clone()),
        )
        .await
        .unwrap();

    assert!(container.get_module("blog").await.unwrap().is_installed());
    assert!(container.get_feature("blog.post").await.unwrap().is_enabled());
    // 恢复不重放钩子
    assert_eq!(locator.module("blog").installs.load(Ordering::SeqCst), 0);
    assert_eq!(locator.feature("blog.post").enables.load(Ordering::SeqCst), 0);
}
