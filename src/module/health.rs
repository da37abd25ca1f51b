//! 健康传播器
//!
//! 从依赖图推导每个特性/模块的健康错误位，并把阻断状态传播到
//! 依赖方与所属模块。传播是**单遍**的：按依赖序（叶在前）评估，
//! 依赖的健康先于依赖方确定，因此无需任何重入保护。
//! 每次发现或生命周期批次后整体重算一次，而不是反应式地增量推导。
//!
//! 规则（见 [`crate::module::descriptor`] 的位集定义）：
//!
//! - 模块的宿主版本要求拒绝当前宿主版本 -> `INCOMPATIBLE_HOST`
//! - 所属模块携带「全部特性被禁」以外的错误 -> 特性记 `FORBIDDEN_MODULE`
//! - 所属模块尚待安装 -> 特性记 `UNINSTALL_MODULE`
//! - 任一已解析依赖携带错误 -> 特性记 `FORBIDDEN_DEPENDENCY`
//! - 模块的全部特性（剔除 `FORBIDDEN_MODULE`/`UNINSTALL_MODULE` 后）
//!   仍各自携带错误 -> 模块记 `FORBIDDEN_FEATURES`

use tracing::{debug, trace};

use crate::module::descriptor::{FeatureErrors, InstallState, ModuleErrors};
use crate::module::registry::ComponentRegistry;
use crate::module::version::ComponentVersion;

/// 健康传播器
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthPropagator;

impl HealthPropagator {
    /// 执行一遍健康传播
    ///
    /// `topo_order` 必须是依赖先行的特性顺序（来自
    /// [`crate::module::graph::FeatureGraph::topological_order`]）。
    /// 图构建期写入的 `MISSING_DEPENDENCY` / `INCOMPATIBLE_DEPENDENCY`
    /// 保留，其余派生位全部重算。
    pub async fn propagate(
        registry: &ComponentRegistry,
        topo_order: &[String],
        host_version: &ComponentVersion,
    ) {
        let handle = registry.handle();
        let mut inner = handle.write().await;

        // 第一步：模块级宿主兼容性
        for module in inner.modules.iter_mut() {
            module.errors = ModuleErrors::empty();
            if let Some(ref requirement) = module.host_requirement {
                if !requirement.matches(host_version) {
                    module.errors |= ModuleErrors::INCOMPATIBLE_HOST;
                    debug!(module_id = %module.id, "宿主版本不满足模块要求");
                }
            }
            // 派生位重算前先复位
            for feature in module.features.iter_mut() {
                feature.errors -= FeatureErrors::FORBIDDEN_DEPENDENCY
                    | FeatureErrors::FORBIDDEN_MODULE
                    | FeatureErrors::UNINSTALL_MODULE;
            }
        }

        // 第二步：按依赖序评估特性位（叶在前，依赖的健康已知）
        for feature_id in topo_order {
            let mut flags = FeatureErrors::empty();

            {
                let Some(feature) = inner.feature(feature_id) else {
                    continue;
                };
                let Some(module) = inner.module_of_feature(feature_id) else {
                    continue;
                };

                // 所属模块携带「全部特性被禁」以外的错误
                if !(module.errors - ModuleErrors::FORBIDDEN_FEATURES).is_empty() {
                    flags |= FeatureErrors::FORBIDDEN_MODULE;
                }
                // 所属模块尚待安装
                if module.has_installer && module.install_state == InstallState::RequireInstall {
                    flags |= FeatureErrors::UNINSTALL_MODULE;
                }
                // 任一已解析依赖携带错误
                let forbidden_dep = feature
                    .dependencies
                    .iter()
                    .filter_map(|d| d.resolved.as_deref())
                    .any(|dep_id| {
                        inner
                            .feature(dep_id)
                            .map(|dep| !dep.errors.is_empty())
                            .unwrap_or(false)
                    });
                if forbidden_dep {
                    flags |= FeatureErrors::FORBIDDEN_DEPENDENCY;
                }
            }

            if let Some(feature) = inner.feature_mut(feature_id) {
                feature.errors |= flags;
                if !flags.is_empty() {
                    trace!(feature_id = %feature_id, errors = ?feature.errors, "特性健康位已更新");
                }
            }
        }

        // 第三步：全部特性被禁的模块
        for module in inner.modules.iter_mut() {
            if module.features.is_empty() {
                continue;
            }
            let all_forbidden = module.features.iter().all(|feature| {
                // 剔除模块归属类标志，避免「模块错 -> 特性错 -> 模块错」的平凡自证
                !(feature.errors
                    - (FeatureErrors::FORBIDDEN_MODULE | FeatureErrors::UNINSTALL_MODULE))
                    .is_empty()
            });
            if all_forbidden {
                module.errors |= ModuleErrors::FORBIDDEN_FEATURES;
                debug!(module_id = %module.id, "模块全部特性被禁");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::descriptor::{
        DependencyDescriptor, FeatureDescriptor, ModuleDescriptor,
    };
    use crate::module::graph::DependencyGraphBuilder;
    use crate::module::version::{ComponentVersion, VersionSpecifier};

    fn v(text: &str) -> ComponentVersion {
        ComponentVersion::parse(text).unwrap()
    }

    async fn propagate(registry: &ComponentRegistry, host: &str) {
        let graph = DependencyGraphBuilder::build(registry).await;
        let order = graph.topological_order().unwrap();
        HealthPropagator::propagate(registry, &order, &v(host)).await;
    }

    #[tokio::test]
    async fn test_incompatible_host_marks_module_and_features() {
        let registry = ComponentRegistry::new();
        registry
            .register(
                ModuleDescriptor::new("blog", "blog", v("1.0"))
                    .with_host_requirement(VersionSpecifier::parse(">=9.0").unwrap())
                    .with_feature(FeatureDescriptor::new("blog.post", "post")),
            )
            .await
            .unwrap();

        propagate(&registry, "1.0").await;

        let module = registry.get_module("blog").await.unwrap();
        assert!(module.errors.contains(ModuleErrors::INCOMPATIBLE_HOST));
        // 唯一特性仅剩模块归属类标志，模块不再记 FORBIDDEN_FEATURES
        assert!(!module.errors.contains(ModuleErrors::FORBIDDEN_FEATURES));

        let feature = registry.get_feature("blog.post").await.unwrap();
        assert!(feature.errors.contains(FeatureErrors::FORBIDDEN_MODULE));
    }

    #[tokio::test]
    async fn test_uninstall_module_flag_requires_installer() {
        let registry = ComponentRegistry::new();
        registry
            .register(
                ModuleDescriptor::new("blog", "blog", v("1.0"))
                    .with_feature(FeatureDescriptor::new("blog.post", "post")),
            )
            .await
            .unwrap();

        // 无安装钩子：不记 UNINSTALL_MODULE
        propagate(&registry, "1.0").await;
        let feature = registry.get_feature("blog.post").await.unwrap();
        assert!(!feature.errors.contains(FeatureErrors::UNINSTALL_MODULE));

        // 有安装钩子且待安装：记 UNINSTALL_MODULE
        {
            let handle = registry.handle();
            let mut inner = handle.write().await;
            inner.module_mut("blog").unwrap().has_installer = true;
        }
        propagate(&registry, "1.0").await;
        let feature = registry.get_feature("blog.post").await.unwrap();
        assert!(feature.errors.contains(FeatureErrors::UNINSTALL_MODULE));

        // 安装后标志清除
        {
            let handle = registry.handle();
            let mut inner = handle.write().await;
            inner.set_install_state("blog", InstallState::Installed);
        }
        propagate(&registry, "1.0").await;
        let feature = registry.get_feature("blog.post").await.unwrap();
        assert!(!feature.errors.contains(FeatureErrors::UNINSTALL_MODULE));
    }

    #[tokio::test]
    async fn test_forbidden_dependency_cascades_in_order() {
        // chain.c -> chain.b -> chain.a(missing ghost)
        let registry = ComponentRegistry::new();
        registry
            .register(
                ModuleDescriptor::new("chain", "chain", v("1.0"))
                    .with_feature(
                        FeatureDescriptor::new("chain.a", "a")
                            .with_dependency(DependencyDescriptor::new("ghost")),
                    )
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

        propagate(&registry, "1.0").await;

        let a = registry.get_feature("chain.a").await.unwrap();
        assert!(a.errors.contains(FeatureErrors::MISSING_DEPENDENCY));

        let b = registry.get_feature("chain.b").await.unwrap();
        assert!(b.errors.contains(FeatureErrors::FORBIDDEN_DEPENDENCY));

        // 级联：b 有错 -> c 也被禁
        let c = registry.get_feature("chain.c").await.unwrap();
        assert!(c.errors.contains(FeatureErrors::FORBIDDEN_DEPENDENCY));

        // 全部特性各自携带实质错误 -> 模块记 FORBIDDEN_FEATURES
        let module = registry.get_module("chain").await.unwrap();
        assert!(module.errors.contains(ModuleErrors::FORBIDDEN_FEATURES));
    }

    #[tokio::test]
    async fn test_cross_module_forbidden_dependency() {
        let registry = ComponentRegistry::new();
        registry
            .register(
                ModuleDescriptor::new("storage", "storage", v("1.0"))
                    .with_host_requirement(VersionSpecifier::parse(">=9.0").unwrap())
                    .with_feature(FeatureDescriptor::new("storage.kv", "kv")),
            )
            .await
            .unwrap();
        registry
            .register(
                ModuleDescriptor::new("blog", "blog", v("1.0")).with_feature(
                    FeatureDescriptor::new("blog.post", "post")
                        .with_dependency(DependencyDescriptor::new("storage.kv")),
                ),
            )
            .await
            .unwrap();

        propagate(&registry, "1.0").await;

        // storage 宿主不兼容 -> storage.kv 记 FORBIDDEN_MODULE
        // -> 跨模块依赖方 blog.post 记 FORBIDDEN_DEPENDENCY
        let post = registry.get_feature("blog.post").await.unwrap();
        assert!(post.errors.contains(FeatureErrors::FORBIDDEN_DEPENDENCY));
    }

    #[tokio::test]
    async fn test_healthy_graph_stays_clean() {
        let registry = ComponentRegistry::new();
        registry
            .register(
                ModuleDescriptor::new("blog", "blog", v("1.0"))
                    .with_host_requirement(VersionSpecifier::parse(">=1.0").unwrap())
                    .with_feature(FeatureDescriptor::new("blog.post", "post")),
            )
            .await
            .unwrap();

        propagate(&registry, "1.5").await;

        assert!(!registry.get_module("blog").await.unwrap().has_errors());
        assert!(!registry.get_feature("blog.post").await.unwrap().has_errors());
    }
}
