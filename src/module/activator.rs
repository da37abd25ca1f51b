//! 激活器接口
//!
//! 生命周期钩子的外部边界。反射式的钩子发现（扫描二进制找标记）
//! 属于宿主的职责；内核只消费定位器解析出的钩子引用，
//! 并据此在发现期固定每个组件的 `can_enable` / `can_disable` 能力位。
//!
//! 钩子调用可能执行阻塞 IO；编排器不会在一个事务内并行调用钩子，
//! 因为启用依赖先行、停用叶先行的顺序是正确性要求。

use std::sync::Arc;

use async_trait::async_trait;

use crate::utils::Result;

/// 模块激活器：安装/卸载钩子
#[async_trait]
pub trait ModuleActivator: Send + Sync {
    /// 执行安装钩子
    async fn install(&self) -> Result<()>;

    /// 执行卸载钩子
    async fn uninstall(&self) -> Result<()>;
}

/// 特性激活器：启用/停用钩子
#[async_trait]
pub trait FeatureActivator: Send + Sync {
    /// 执行启用钩子
    async fn enable(&self) -> Result<()>;

    /// 执行停用钩子
    async fn disable(&self) -> Result<()>;

    /// 是否提供停用钩子
    ///
    /// 返回 false 表示单向启用：该特性在启用状态下会阻塞
    /// 其依赖的停用与所属模块的卸载。
    fn supports_disable(&self) -> bool {
        true
    }
}

/// 激活器定位器
///
/// 宿主环境实现：按 ID 解析可选的钩子引用。
/// 未返回钩子的组件没有对应生命周期钩子，直接迁移状态。
pub trait ActivatorLocator: Send + Sync {
    /// 解析模块的安装/卸载钩子
    fn module_activator(&self, module_id: &str) -> Option<Arc<dyn ModuleActivator>>;

    /// 解析特性的启用/停用钩子
    fn feature_activator(&self, feature_id: &str) -> Option<Arc<dyn FeatureActivator>>;
}

/// 空定位器：任何组件都没有钩子
///
/// 适合纯声明式的宿主（所有组件直接迁移状态）与测试。
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyActivatorLocator;

impl ActivatorLocator for EmptyActivatorLocator {
    fn module_activator(&self, _module_id: &str) -> Option<Arc<dyn ModuleActivator>> {
        None
    }

    fn feature_activator(&self, _feature_id: &str) -> Option<Arc<dyn FeatureActivator>> {
        None
    }
}
