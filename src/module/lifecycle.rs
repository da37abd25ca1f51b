//! 生命周期编排器
//!
//! 驱动模块的安装/卸载与特性的启用/停用。每个批次在一个
//! [`ModulizeTransaction`] 内执行：
//!
//! - 守卫先行：不存在的 ID、显式请求带错组件、依赖约束冲突都在
//!   任何可见变更之前抛错；
//! - 钩子内联调用：批次内的状态变更就地发生，并为每个变更登记
//!   （持久化提交, 状态还原 + 持久化逆操作）动作对；
//! - 守卫全部通过且钩子全部成功后事务才被标记完成，提交动作随
//!   事务终结执行 —— 持久化写入严格发生在钩子成功之后；
//! - 任何失败触发逆序回滚，可见的组件图与外部存储不会分叉。
//!
//! 顺序是正确性要求：启用按依赖先行（拓扑序）、停用按叶先行
//! （逆拓扑序）、卸载按逆发现序。批次之间由容器的操作锁串行化。

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::event::ContainerEvent;
use crate::module::activator::ActivatorLocator;
use crate::module::descriptor::{EnableState, InstallState};
use crate::module::health::HealthPropagator;
use crate::module::persist::PersistProvider;
use crate::module::registry::{ComponentRegistry, RegistryInner};
use crate::module::transaction::{ActionFuture, ModulizeTransaction};
use crate::module::version::ComponentVersion;
use crate::utils::{CoreError, MetricsCollector, Result};

/// 生命周期编排器
///
/// 由容器在启动时装配；持有注册表句柄、持久化提供者、
/// 激活器定位器与拓扑顺序。
pub(crate) struct LifecycleOrchestrator {
    registry: ComponentRegistry,
    persist: Arc<dyn PersistProvider>,
    locator: Arc<dyn ActivatorLocator>,
    host_version: ComponentVersion,
    topo_order: Vec<String>,
    metrics: Arc<MetricsCollector>,
}

impl LifecycleOrchestrator {
    /// 装配编排器
    pub(crate) fn new(
        registry: ComponentRegistry,
        persist: Arc<dyn PersistProvider>,
        locator: Arc<dyn ActivatorLocator>,
        host_version: ComponentVersion,
        topo_order: Vec<String>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            registry,
            persist,
            locator,
            host_version,
            topo_order,
            metrics,
        }
    }

    /// 重算健康位（单遍，依赖序）
    pub(crate) async fn refresh_health(&self) {
        HealthPropagator::propagate(&self.registry, &self.topo_order, &self.host_version).await;
    }

    // ==================== 安装 ====================

    /// 安装批次
    ///
    /// 对全部已发现模块按发现序执行一遍：无钩子且无错的模块直接
    /// 迁移；有钩子且在请求集合内的模块执行安装钩子并登记持久化对。
    /// 每次安装落位后重算健康位，使同批中依赖先行模块的安装
    /// 解除后续模块的阻断。遍历结束后对已安装模块的特性级联启用。
    ///
    /// 显式请求的模块在被处理时仍携带健康错误即为激活错误，
    /// 整批失败且不留下部分效果（事务回滚）。
    #[instrument(skip(self), fields(requested = requested.len()))]
    pub(crate) async fn install(&self, requested: &[String]) -> Result<Vec<ContainerEvent>> {
        // 参数校验：不存在的 ID 在任何变更之前失败
        {
            let handle = self.registry.handle();
            let inner = handle.read().await;
            for id in requested {
                if inner.module(id).is_none() {
                    return Err(CoreError::ModuleNotFound(id.clone()));
                }
            }
        }

        let mut tx = ModulizeTransaction::new();
        let mut events = Vec::new();
        let result = self.install_pass(requested, &mut tx, &mut events).await;
        self.finalize(tx, result, events).await
    }

    async fn install_pass(
        &self,
        requested: &[String],
        tx: &mut ModulizeTransaction,
        events: &mut Vec<ContainerEvent>,
    ) -> Result<()> {
        let requested_set: HashSet<&str> = requested.iter().map(String::as_str).collect();
        let module_ids = {
            let handle = self.registry.handle();
            let inner = handle.read().await;
            inner.module_ids()
        };

        let mut cascade: Vec<String> = Vec::new();
        for module_id in module_ids {
            let snapshot = {
                let handle = self.registry.handle();
                let inner = handle.read().await;
                inner.module(&module_id).map(|m| {
                    (
                        m.has_errors(),
                        m.is_installed(),
                        m.has_installer,
                        m.version.clone(),
                        m.features.iter().map(|f| f.id.clone()).collect::<Vec<_>>(),
                    )
                })
            };
            let Some((has_errors, installed, has_installer, version, feature_ids)) = snapshot
            else {
                continue;
            };
            if installed {
                continue;
            }
            if has_errors {
                if requested_set.contains(module_id.as_str()) {
                    // 显式请求带错模块：整批失败，事务回滚保证无部分效果
                    let detail = {
                        let handle = self.registry.handle();
                        let inner = handle.read().await;
                        inner
                            .module(&module_id)
                            .map(|m| format!("{:?}", m.errors))
                            .unwrap_or_default()
                    };
                    return Err(CoreError::ActivationBlocked {
                        id: module_id.clone(),
                        detail,
                    });
                }
                continue;
            }

            if !has_installer {
                // 直接迁移：无持久化写入、无事务条目
                self.set_install_state(&module_id, InstallState::Installed).await;
                events.push(ContainerEvent::module_installed(&module_id));
                self.metrics.record_module_installed();
                debug!(module_id = %module_id, "模块无安装钩子，直接迁移");
                continue;
            }
            if !requested_set.contains(module_id.as_str()) {
                continue;
            }

            // 安装钩子内联调用，失败即整批回滚
            if let Some(activator) = self.locator.module_activator(&module_id) {
                activator
                    .install()
                    .await
                    .map_err(|e| CoreError::InstallHookFailed {
                        module_id: module_id.clone(),
                        reason: e.to_string(),
                    })?;
            }
            self.set_install_state(&module_id, InstallState::Installed).await;

            let commit = {
                let persist = self.persist.clone();
                let id = module_id.clone();
                let version = version.clone();
                Box::new(move || -> ActionFuture {
                    Box::pin(async move { persist.install_module(&id, &version).await })
                })
            };
            let rollback = {
                let persist = self.persist.clone();
                let handle = self.registry.handle();
                let id = module_id.clone();
                Box::new(move || -> ActionFuture {
                    Box::pin(async move {
                        {
                            let mut inner = handle.write().await;
                            inner.set_install_state(&id, InstallState::RequireInstall);
                        }
                        persist.uninstall_module(&id).await
                    })
                })
            };
            tx.enlist(format!("install:{}", module_id), commit, rollback);

            events.push(ContainerEvent::module_installed(&module_id));
            self.metrics.record_module_installed();
            info!(module_id = %module_id, "模块安装钩子完成");
            cascade.extend(feature_ids);

            // 本模块落位后健康位变化（UNINSTALL_MODULE 及其级联清除），
            // 同批后续模块据最新状态评估
            self.refresh_health().await;
        }

        self.enable_pass(&cascade, tx, events).await
    }

    // ==================== 启用 ====================

    /// 启用批次（严格模式：请求带错特性即失败）
    #[instrument(skip(self), fields(requested = requested.len()))]
    pub(crate) async fn enable(&self, requested: &[String]) -> Result<Vec<ContainerEvent>> {
        self.validate_enable(requested).await?;

        let mut tx = ModulizeTransaction::new();
        let mut events = Vec::new();
        let result = self.enable_pass(requested, &mut tx, &mut events).await;
        self.finalize(tx, result, events).await
    }

    /// 启用守卫：请求的特性必须存在；严格模式下不得带健康错误
    async fn validate_enable(&self, requested: &[String]) -> Result<()> {
        let handle = self.registry.handle();
        let inner = handle.read().await;
        for id in requested {
            let feature = inner
                .feature(id)
                .ok_or_else(|| CoreError::FeatureNotFound(id.clone()))?;
            if feature.has_errors() {
                return Err(CoreError::ActivationBlocked {
                    id: id.clone(),
                    detail: format!("{:?}", feature.errors),
                });
            }
        }
        Ok(())
    }

    /// 启用遍历：按依赖先行的拓扑序
    ///
    /// 无钩子且无错的特性总是直接迁移（自动启用）；有钩子的特性
    /// 仅当 ID 在本次集合内才执行钩子并登记持久化对。
    /// 严格与否只体现在守卫：[`enable`](Self::enable) 在进入本遍历前
    /// 拒绝带错的请求，安装级联则静默跳过带错成员。
    async fn enable_pass(
        &self,
        requested: &[String],
        tx: &mut ModulizeTransaction,
        events: &mut Vec<ContainerEvent>,
    ) -> Result<()> {
        let requested_set: HashSet<&str> = requested.iter().map(String::as_str).collect();

        for feature_id in &self.topo_order {
            let snapshot = {
                let handle = self.registry.handle();
                let inner = handle.read().await;
                inner
                    .feature(feature_id)
                    .map(|f| (f.has_errors(), f.is_enabled(), f.can_enable))
            };
            let Some((has_errors, enabled, can_enable)) = snapshot else {
                continue;
            };
            if enabled || has_errors {
                continue;
            }

            if !can_enable {
                // 直接迁移：无持久化写入、无事务条目
                self.set_enable_state(feature_id, EnableState::Enabled).await;
                events.push(ContainerEvent::feature_enabled(feature_id));
                self.metrics.record_feature_enabled();
                continue;
            }
            if !requested_set.contains(feature_id.as_str()) {
                continue;
            }

            let Some(activator) = self.locator.feature_activator(feature_id) else {
                warn!(feature_id = %feature_id, "定位器未返回启用钩子，跳过");
                continue;
            };
            activator
                .enable()
                .await
                .map_err(|e| CoreError::EnableHookFailed {
                    feature_id: feature_id.clone(),
                    reason: e.to_string(),
                })?;
            self.set_enable_state(feature_id, EnableState::Enabled).await;

            let commit = {
                let persist = self.persist.clone();
                let id = feature_id.clone();
                Box::new(move || -> ActionFuture {
                    Box::pin(async move { persist.enable_feature(&id).await })
                })
            };
            let rollback = {
                let persist = self.persist.clone();
                let handle = self.registry.handle();
                let id = feature_id.clone();
                Box::new(move || -> ActionFuture {
                    Box::pin(async move {
                        {
                            let mut inner = handle.write().await;
                            inner.set_enable_state(&id, EnableState::RequireEnable);
                        }
                        persist.disable_feature(&id).await
                    })
                })
            };
            tx.enlist(format!("enable:{}", feature_id), commit, rollback);

            events.push(ContainerEvent::feature_enabled(feature_id));
            self.metrics.record_feature_enabled();
            info!(feature_id = %feature_id, "特性启用钩子完成");
        }
        Ok(())
    }

    // ==================== 停用 ====================

    /// 停用批次
    ///
    /// 先沿 `dependings` 收集传递的已启用依赖方并全部守卫，
    /// 再按叶先行（逆拓扑序）停用：没有任何依赖方会在其依赖
    /// 停用后仍保持启用。
    #[instrument(skip(self), fields(requested = requested.len()))]
    pub(crate) async fn disable(&self, requested: &[String]) -> Result<Vec<ContainerEvent>> {
        let affected = self.collect_disable_set(requested).await?;

        let mut tx = ModulizeTransaction::new();
        let mut events = Vec::new();
        let result = self.disable_pass(&affected, &mut tx, &mut events).await;
        self.finalize(tx, result, events).await
    }

    /// 计算受影响集合并执行守卫（任何变更之前）
    async fn collect_disable_set(&self, requested: &[String]) -> Result<HashSet<String>> {
        let handle = self.registry.handle();
        let inner = handle.read().await;

        let requested_set: HashSet<&str> = requested.iter().map(String::as_str).collect();
        for id in requested {
            if inner.feature(id).is_none() {
                return Err(CoreError::FeatureNotFound(id.clone()));
            }
        }

        let mut affected: HashSet<String> = requested.iter().cloned().collect();
        for dep_id in Self::dependings_closure(&inner, requested) {
            if inner
                .feature(&dep_id)
                .map(|f| f.is_enabled())
                .unwrap_or(false)
            {
                affected.insert(dep_id);
            }
        }

        // 守卫：受影响的已启用特性必须允许停用
        let mut blockers: Vec<String> = Vec::new();
        for id in &affected {
            let Some(feature) = inner.feature(id) else {
                continue;
            };
            if !feature.is_enabled() || feature.force_disableable() {
                continue;
            }
            if requested_set.contains(id.as_str()) {
                return Err(CoreError::ActivationBlocked {
                    id: id.clone(),
                    detail: "特性没有停用钩子，无法停用".to_string(),
                });
            }
            blockers.push(id.clone());
        }
        if !blockers.is_empty() {
            blockers.sort();
            return Err(CoreError::DependencyViolation {
                id: requested.first().cloned().unwrap_or_default(),
                dependents: blockers,
            });
        }
        Ok(affected)
    }

    /// 停用遍历：按叶先行（逆拓扑序），未启用的成员跳过
    async fn disable_pass(
        &self,
        affected: &HashSet<String>,
        tx: &mut ModulizeTransaction,
        events: &mut Vec<ContainerEvent>,
    ) -> Result<()> {
        for feature_id in self.topo_order.iter().rev() {
            if !affected.contains(feature_id) {
                continue;
            }
            let snapshot = {
                let handle = self.registry.handle();
                let inner = handle.read().await;
                inner
                    .feature(feature_id)
                    .map(|f| (f.is_enabled(), f.can_enable, f.can_disable))
            };
            let Some((enabled, can_enable, can_disable)) = snapshot else {
                continue;
            };
            if !enabled {
                continue;
            }

            if can_disable {
                if let Some(activator) = self.locator.feature_activator(feature_id) {
                    activator
                        .disable()
                        .await
                        .map_err(|e| CoreError::DisableHookFailed {
                            feature_id: feature_id.clone(),
                            reason: e.to_string(),
                        })?;
                }
            }
            self.set_enable_state(feature_id, EnableState::RequireEnable).await;

            // 持久化移除按「有启用钩子」登记
            if can_enable {
                let commit = {
                    let persist = self.persist.clone();
                    let id = feature_id.clone();
                    Box::new(move || -> ActionFuture {
                        Box::pin(async move { persist.disable_feature(&id).await })
                    })
                };
                let rollback = {
                    let persist = self.persist.clone();
                    let handle = self.registry.handle();
                    let id = feature_id.clone();
                    Box::new(move || -> ActionFuture {
                        Box::pin(async move {
                            {
                                let mut inner = handle.write().await;
                                inner.set_enable_state(&id, EnableState::Enabled);
                            }
                            persist.enable_feature(&id).await
                        })
                    })
                };
                tx.enlist(format!("disable:{}", feature_id), commit, rollback);
            }

            events.push(ContainerEvent::feature_disabled(feature_id));
            self.metrics.record_feature_disabled();
            info!(feature_id = %feature_id, "特性已停用");
        }
        Ok(())
    }

    // ==================== 卸载 ====================

    /// 卸载批次：请求集合按逆发现序处理
    #[instrument(skip(self), fields(requested = requested.len()))]
    pub(crate) async fn uninstall(&self, requested: &[String]) -> Result<Vec<ContainerEvent>> {
        let ordered = {
            let handle = self.registry.handle();
            let inner = handle.read().await;
            for id in requested {
                if inner.module(id).is_none() {
                    return Err(CoreError::ModuleNotFound(id.clone()));
                }
            }
            let requested_set: HashSet<&str> = requested.iter().map(String::as_str).collect();
            let mut ordered: Vec<String> = inner
                .module_ids()
                .into_iter()
                .filter(|id| requested_set.contains(id.as_str()))
                .collect();
            ordered.reverse();
            ordered
        };

        self.guard_uninstall(&ordered).await?;

        let mut tx = ModulizeTransaction::new();
        let mut events = Vec::new();
        let result = self.uninstall_pass(&ordered, &mut tx, &mut events).await;
        self.finalize(tx, result, events).await
    }

    /// 卸载守卫（任何变更之前）
    ///
    /// 模块不可卸载，若存在经 `dependings` 可达、已启用且不可强制
    /// 停用的依赖方特性，而其所属模块不在卸载集合内且自身可安装。
    async fn guard_uninstall(&self, ordered: &[String]) -> Result<()> {
        let handle = self.registry.handle();
        let inner = handle.read().await;
        let uninstall_set: HashSet<&str> = ordered.iter().map(String::as_str).collect();

        for module_id in ordered {
            let Some(module) = inner.module(module_id) else {
                continue;
            };
            if !module.has_installer || !module.is_installed() {
                continue;
            }

            let seeds: Vec<String> = module
                .features
                .iter()
                .filter(|f| f.is_enabled())
                .map(|f| f.id.clone())
                .collect();

            let mut blockers: Vec<String> = Vec::new();
            for dep_id in Self::dependings_closure(&inner, &seeds) {
                let Some(depending) = inner.feature(&dep_id) else {
                    continue;
                };
                if !depending.is_enabled() || depending.force_disableable() {
                    continue;
                }
                let Some(owner) = inner.module_of_feature(&dep_id) else {
                    continue;
                };
                // 同批卸载或自身不可安装的模块不构成阻塞
                if uninstall_set.contains(owner.id.as_str()) || !owner.has_installer {
                    continue;
                }
                blockers.push(dep_id);
            }
            if !blockers.is_empty() {
                blockers.sort();
                return Err(CoreError::DependencyViolation {
                    id: module_id.clone(),
                    dependents: blockers,
                });
            }
        }
        Ok(())
    }

    async fn uninstall_pass(
        &self,
        ordered: &[String],
        tx: &mut ModulizeTransaction,
        events: &mut Vec<ContainerEvent>,
    ) -> Result<()> {
        for module_id in ordered {
            let snapshot = {
                let handle = self.registry.handle();
                let inner = handle.read().await;
                inner.module(module_id).map(|m| {
                    let enabled: Vec<String> = m
                        .features
                        .iter()
                        .filter(|f| f.is_enabled())
                        .map(|f| f.id.clone())
                        .collect();
                    (m.is_installed(), m.has_installer, m.version.clone(), enabled)
                })
            };
            let Some((installed, has_installer, version, enabled_features)) = snapshot else {
                continue;
            };
            if !has_installer {
                warn!(module_id = %module_id, "模块没有安装钩子，跳过卸载");
                continue;
            }
            if !installed {
                warn!(module_id = %module_id, "模块未处于已安装状态，跳过卸载");
                continue;
            }

            // 先强制停用：本模块已启用特性及其传递的已启用依赖方
            let affected = {
                let handle = self.registry.handle();
                let inner = handle.read().await;
                let mut affected: HashSet<String> = enabled_features.iter().cloned().collect();
                for dep_id in Self::dependings_closure(&inner, &enabled_features) {
                    if inner
                        .feature(&dep_id)
                        .map(|f| f.is_enabled())
                        .unwrap_or(false)
                    {
                        affected.insert(dep_id);
                    }
                }
                affected
            };
            self.disable_pass(&affected, tx, events).await?;

            // 卸载钩子内联调用
            if let Some(activator) = self.locator.module_activator(module_id) {
                activator
                    .uninstall()
                    .await
                    .map_err(|e| CoreError::UninstallHookFailed {
                        module_id: module_id.clone(),
                        reason: e.to_string(),
                    })?;
            }
            self.set_install_state(module_id, InstallState::RequireInstall).await;

            let commit = {
                let persist = self.persist.clone();
                let id = module_id.clone();
                Box::new(move || -> ActionFuture {
                    Box::pin(async move { persist.uninstall_module(&id).await })
                })
            };
            let rollback = {
                let persist = self.persist.clone();
                let handle = self.registry.handle();
                let id = module_id.clone();
                let version = version.clone();
                Box::new(move || -> ActionFuture {
                    Box::pin(async move {
                        {
                            let mut inner = handle.write().await;
                            inner.set_install_state(&id, InstallState::Installed);
                        }
                        persist.install_module(&id, &version).await
                    })
                })
            };
            tx.enlist(format!("uninstall:{}", module_id), commit, rollback);

            events.push(ContainerEvent::module_uninstalled(module_id));
            self.metrics.record_module_uninstalled();
            info!(module_id = %module_id, "模块卸载钩子完成");
        }
        Ok(())
    }

    // ==================== 内部方法 ====================

    /// 沿 `dependings` 反向边收集传递依赖方（不含种子自身）
    fn dependings_closure(inner: &RegistryInner, seeds: &[String]) -> Vec<String> {
        let mut visited: HashSet<String> = seeds.iter().cloned().collect();
        let mut queue: VecDeque<String> = seeds.iter().cloned().collect();
        let mut result = Vec::new();

        while let Some(id) = queue.pop_front() {
            let Some(feature) = inner.feature(&id) else {
                continue;
            };
            for dep in &feature.dependings {
                if visited.insert(dep.clone()) {
                    result.push(dep.clone());
                    queue.push_back(dep.clone());
                }
            }
        }
        result
    }

    async fn set_install_state(&self, module_id: &str, state: InstallState) {
        let handle = self.registry.handle();
        let mut inner = handle.write().await;
        inner.set_install_state(module_id, state);
    }

    async fn set_enable_state(&self, feature_id: &str, state: EnableState) {
        let handle = self.registry.handle();
        let mut inner = handle.write().await;
        inner.set_enable_state(feature_id, state);
    }

    /// 终结批次：成功则提交事务并发还事件，失败则回滚；
    /// 两条路径都重算健康位
    async fn finalize(
        &self,
        mut tx: ModulizeTransaction,
        result: Result<()>,
        events: Vec<ContainerEvent>,
    ) -> Result<Vec<ContainerEvent>> {
        let had_steps = !tx.is_empty();
        match result {
            Ok(()) => {
                tx.complete();
                match tx.finish().await {
                    Ok(()) => {
                        if had_steps {
                            self.metrics.record_transaction_committed();
                        }
                        self.refresh_health().await;
                        Ok(events)
                    }
                    Err(e) => {
                        self.metrics.record_transaction_rolled_back();
                        self.refresh_health().await;
                        Err(e)
                    }
                }
            }
            Err(e) => {
                if had_steps {
                    self.metrics.record_transaction_rolled_back();
                }
                if let Err(rollback_err) = tx.finish().await {
                    warn!(error = %rollback_err, "事务回滚报告错误");
                }
                self.refresh_health().await;
                Err(e)
            }
        }
    }
}
