//! 组件注册表
//!
//! 管理所有已发现的模块与特性描述符：按发现顺序存放、
//! 维护全局 ID 索引、执行 ID 语法与唯一性校验。
//!
//! 模块/特性 ID 在注册后全局唯一且不可变；ID 重复是致命配置错误。

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tokio::sync::RwLock;
use tracing::debug;

use crate::module::descriptor::{
    EnableState, FeatureDescriptor, InstallState, ModuleDescriptor,
};
use crate::utils::{CoreError, Result};

/// 组件 ID 语法：字母或数字开头，允许 `_` `.` `-`
fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").expect("valid regex"))
}

/// 注册表内部状态
///
/// 模块按发现顺序存放；特性归属模块、按模块内顺序存放。
/// 生命周期编排器的提交/回滚闭包通过 [`ComponentRegistry::handle`]
/// 共享这一状态。
#[derive(Debug, Default)]
pub(crate) struct RegistryInner {
    /// 模块（发现顺序）
    pub(crate) modules: Vec<ModuleDescriptor>,
    /// 模块 ID -> 下标
    module_index: HashMap<String, usize>,
    /// 特性 ID -> (模块下标, 特性下标)
    feature_index: HashMap<String, (usize, usize)>,
}

impl RegistryInner {
    /// 查找模块
    pub(crate) fn module(&self, id: &str) -> Option<&ModuleDescriptor> {
        self.module_index.get(id).map(|&i| &self.modules[i])
    }

    /// 查找模块（可变）
    pub(crate) fn module_mut(&mut self, id: &str) -> Option<&mut ModuleDescriptor> {
        let index = *self.module_index.get(id)?;
        self.modules.get_mut(index)
    }

    /// 查找特性
    pub(crate) fn feature(&self, id: &str) -> Option<&FeatureDescriptor> {
        self.feature_index
            .get(id)
            .map(|&(m, f)| &self.modules[m].features[f])
    }

    /// 查找特性（可变）
    pub(crate) fn feature_mut(&mut self, id: &str) -> Option<&mut FeatureDescriptor> {
        let (m, f) = *self.feature_index.get(id)?;
        Some(&mut self.modules[m].features[f])
    }

    /// 查找特性所属的模块
    pub(crate) fn module_of_feature(&self, feature_id: &str) -> Option<&ModuleDescriptor> {
        self.feature_index
            .get(feature_id)
            .map(|&(m, _)| &self.modules[m])
    }

    /// 设置模块安装状态
    pub(crate) fn set_install_state(&mut self, id: &str, state: InstallState) {
        if let Some(module) = self.module_mut(id) {
            module.install_state = state;
            debug!(module_id = %id, state = ?state, "模块安装状态已更新");
        }
    }

    /// 设置特性启用状态
    pub(crate) fn set_enable_state(&mut self, id: &str, state: EnableState) {
        if let Some(feature) = self.feature_mut(id) {
            feature.enable_state = state;
            debug!(feature_id = %id, state = ?state, "特性启用状态已更新");
        }
    }

    /// 按发现顺序遍历全部特性
    pub(crate) fn features(&self) -> impl Iterator<Item = &FeatureDescriptor> {
        self.modules.iter().flat_map(|m| m.features.iter())
    }

    /// 按发现顺序收集全部特性 ID
    pub(crate) fn feature_ids(&self) -> Vec<String> {
        self.features().map(|f| f.id.clone()).collect()
    }

    /// 按发现顺序收集全部模块 ID
    pub(crate) fn module_ids(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.id.clone()).collect()
    }
}

/// 组件注册表
///
/// 注册阶段（容器启动前）接收外部清单源构造好的模块描述符，
/// 运行阶段为生命周期编排器提供共享的描述符状态。
#[derive(Debug, Clone, Default)]
pub struct ComponentRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ComponentRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册模块描述符
    ///
    /// 校验模块及其特性的 ID 语法与全局唯一性，并为每个特性
    /// 赋予所属模块 ID（独占归属，注册后不变）。
    ///
    /// # Errors
    ///
    /// - `InvalidDescriptor` - ID 语法非法
    /// - `DuplicateModuleId` / `DuplicateFeatureId` - ID 重复（致命）
    pub async fn register(&self, mut module: ModuleDescriptor) -> Result<String> {
        Self::validate_id(&module.id)?;
        for feature in &module.features {
            Self::validate_id(&feature.id)?;
        }

        let mut inner = self.inner.write().await;

        if inner.module_index.contains_key(&module.id) {
            return Err(CoreError::DuplicateModuleId(module.id));
        }
        // 同一批特性之间也不允许重复
        let mut batch_ids = std::collections::HashSet::new();
        for feature in &module.features {
            if inner.feature_index.contains_key(&feature.id) || !batch_ids.insert(&feature.id) {
                return Err(CoreError::DuplicateFeatureId(feature.id.clone()));
            }
        }

        let module_id = module.id.clone();
        for feature in &mut module.features {
            feature.module_id = module_id.clone();
        }

        let module_pos = inner.modules.len();
        inner.module_index.insert(module_id.clone(), module_pos);
        for (feature_pos, feature) in module.features.iter().enumerate() {
            inner
                .feature_index
                .insert(feature.id.clone(), (module_pos, feature_pos));
        }
        inner.modules.push(module);

        debug!(module_id = %module_id, "模块已注册");
        Ok(module_id)
    }

    /// 共享内部状态句柄（供编排器的提交/回滚闭包使用）
    pub(crate) fn handle(&self) -> Arc<RwLock<RegistryInner>> {
        self.inner.clone()
    }

    /// 获取模块描述符快照
    pub async fn get_module(&self, id: &str) -> Option<ModuleDescriptor> {
        self.inner.read().await.module(id).cloned()
    }

    /// 获取特性描述符快照
    pub async fn get_feature(&self, id: &str) -> Option<FeatureDescriptor> {
        self.inner.read().await.feature(id).cloned()
    }

    /// 按发现顺序获取全部模块快照
    pub async fn list_modules(&self) -> Vec<ModuleDescriptor> {
        self.inner.read().await.modules.clone()
    }

    /// 按发现顺序获取全部特性快照
    pub async fn list_features(&self) -> Vec<FeatureDescriptor> {
        self.inner.read().await.features().cloned().collect()
    }

    /// 模块数量
    pub async fn module_count(&self) -> usize {
        self.inner.read().await.modules.len()
    }

    /// 是否包含指定模块
    pub async fn contains_module(&self, id: &str) -> bool {
        self.inner.read().await.module(id).is_some()
    }

    /// 是否包含指定特性
    pub async fn contains_feature(&self, id: &str) -> bool {
        self.inner.read().await.feature(id).is_some()
    }

    /// 校验组件 ID 语法
    fn validate_id(id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(CoreError::InvalidDescriptor("组件 ID 不能为空".to_string()));
        }
        if !id_pattern().is_match(id) {
            return Err(CoreError::InvalidDescriptor(format!(
                "组件 ID 语法非法: '{}'",
                id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::version::ComponentVersion;

    fn v(text: &str) -> ComponentVersion {
        ComponentVersion::parse(text).unwrap()
    }

    fn module(id: &str, features: &[&str]) -> ModuleDescriptor {
        let mut m = ModuleDescriptor::new(id, id, v("1.0"));
        for f in features {
            m = m.with_feature(FeatureDescriptor::new(*f, *f));
        }
        m
    }

    #[tokio::test]
    async fn test_register_assigns_ownership() {
        let registry = ComponentRegistry::new();
        registry
            .register(module("blog", &["blog.post", "blog.comment"]))
            .await
            .unwrap();

        let feature = registry.get_feature("blog.post").await.unwrap();
        assert_eq!(feature.module_id, "blog");
        assert_eq!(registry.module_count().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_module_id_fatal() {
        let registry = ComponentRegistry::new();
        registry.register(module("blog", &[])).await.unwrap();

        let err = registry.register(module("blog", &[])).await.unwrap_err();
        assert!(matches!(err, CoreError::DuplicateModuleId(_)));
        assert!(err.is_fatal_config());
    }

    #[tokio::test]
    async fn test_duplicate_feature_id_fatal() {
        let registry = ComponentRegistry::new();
        registry
            .register(module("blog", &["shared.search"]))
            .await
            .unwrap();

        let err = registry
            .register(module("wiki", &["shared.search"]))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateFeatureId(_)));
    }

    #[tokio::test]
    async fn test_duplicate_feature_within_one_module() {
        let registry = ComponentRegistry::new();
        let err = registry
            .register(module("blog", &["blog.post", "blog.post"]))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateFeatureId(_)));
    }

    #[tokio::test]
    async fn test_invalid_id_rejected() {
        let registry = ComponentRegistry::new();
        assert!(registry.register(module("", &[])).await.is_err());
        assert!(registry.register(module("有空格 id", &[])).await.is_err());
        assert!(registry.register(module(".leading", &[])).await.is_err());
        assert!(registry.register(module("ok-id_1.2", &[])).await.is_ok());
    }

    #[tokio::test]
    async fn test_discovery_order_preserved() {
        let registry = ComponentRegistry::new();
        registry.register(module("m1", &["f1"])).await.unwrap();
        registry.register(module("m2", &["f2"])).await.unwrap();
        registry.register(module("m3", &["f3"])).await.unwrap();

        let ids: Vec<String> = registry
            .list_modules()
            .await
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn test_state_setters() {
        let registry = ComponentRegistry::new();
        registry.register(module("blog", &["blog.post"])).await.unwrap();

        {
            let handle = registry.handle();
            let mut inner = handle.write().await;
            inner.set_install_state("blog", InstallState::Installed);
            inner.set_enable_state("blog.post", EnableState::Enabled);
        }

        assert!(registry.get_module("blog").await.unwrap().is_installed());
        assert!(registry.get_feature("blog.post").await.unwrap().is_enabled());
    }
}
