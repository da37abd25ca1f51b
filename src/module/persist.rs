//! 持久化提供者契约
//!
//! 安装/启用状态的外部存储边界。所有调用都应是同步语义且幂等的：
//! 编排器把每次调用当作事务中的一个提交/回滚步骤，
//! 回滚路径可能对从未写入的记录调用逆操作。
//!
//! 本模块附带两个实现：进程内存实现（测试/演示用）
//! 和 JSON 文件实现（默认的持久存储）。

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::module::version::ComponentVersion;
use crate::utils::Result;

/// 持久化提供者接口
///
/// 实现必须幂等：重复安装同一模块、移除不存在的记录都不报错。
#[async_trait]
pub trait PersistProvider: Send + Sync {
    /// 写入模块安装记录
    async fn install_module(&self, module_id: &str, version: &ComponentVersion) -> Result<()>;

    /// 移除模块安装记录
    async fn uninstall_module(&self, module_id: &str) -> Result<()>;

    /// 查询模块安装记录，返回记录中的版本
    async fn module_installed(&self, module_id: &str) -> Result<Option<ComponentVersion>>;

    /// 写入特性启用记录
    async fn enable_feature(&self, feature_id: &str) -> Result<()>;

    /// 移除特性启用记录
    async fn disable_feature(&self, feature_id: &str) -> Result<()>;

    /// 查询特性启用记录
    async fn feature_enabled(&self, feature_id: &str) -> Result<bool>;
}

// ============================================================================
// 进程内存实现
// ============================================================================

/// 进程内存持久化提供者
///
/// 状态只存活于进程内，适合测试与演示。
#[derive(Debug, Default)]
pub struct MemoryPersistProvider {
    state: RwLock<PersistState>,
}

impl MemoryPersistProvider {
    /// 创建空的内存提供者
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建并包装为 trait 对象
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// 已安装模块 ID 快照（测试辅助）
    pub async fn installed_modules(&self) -> Vec<String> {
        self.state.read().await.modules.keys().cloned().collect()
    }

    /// 已启用特性 ID 快照（测试辅助）
    pub async fn enabled_features(&self) -> Vec<String> {
        self.state.read().await.features.iter().cloned().collect()
    }
}

#[async_trait]
impl PersistProvider for MemoryPersistProvider {
    async fn install_module(&self, module_id: &str, version: &ComponentVersion) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .modules
            .insert(module_id.to_string(), version.to_string());
        Ok(())
    }

    async fn uninstall_module(&self, module_id: &str) -> Result<()> {
        self.state.write().await.modules.remove(module_id);
        Ok(())
    }

    async fn module_installed(&self, module_id: &str) -> Result<Option<ComponentVersion>> {
        let state = self.state.read().await;
        match state.modules.get(module_id) {
            Some(version) => Ok(Some(ComponentVersion::parse(version)?)),
            None => Ok(None),
        }
    }

    async fn enable_feature(&self, feature_id: &str) -> Result<()> {
        self.state.write().await.features.insert(feature_id.to_string());
        Ok(())
    }

    async fn disable_feature(&self, feature_id: &str) -> Result<()> {
        self.state.write().await.features.remove(feature_id);
        Ok(())
    }

    async fn feature_enabled(&self, feature_id: &str) -> Result<bool> {
        Ok(self.state.read().await.features.contains(feature_id))
    }
}

// ============================================================================
// JSON 文件实现
// ============================================================================

/// 持久化状态（文件格式）
///
/// 使用有序容器保证文件内容稳定，便于差异比对。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistState {
    /// 模块 ID -> 安装版本
    #[serde(default)]
    modules: BTreeMap<String, String>,
    /// 已启用特性 ID
    #[serde(default)]
    features: BTreeSet<String>,
}

/// JSON 文件持久化提供者
///
/// 每次变更全量重写状态文件；文件不存在视为空状态。
#[derive(Debug)]
pub struct JsonFilePersistProvider {
    path: PathBuf,
    state: RwLock<PersistState>,
}

impl JsonFilePersistProvider {
    /// 打开（或初始化）状态文件
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistState::default(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), "持久化状态文件已打开");
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    /// 将当前状态写回文件
    async fn flush(&self, state: &PersistState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let content = serde_json::to_string_pretty(state)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}

#[async_trait]
impl PersistProvider for JsonFilePersistProvider {
    async fn install_module(&self, module_id: &str, version: &ComponentVersion) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .modules
            .insert(module_id.to_string(), version.to_string());
        self.flush(&state).await
    }

    async fn uninstall_module(&self, module_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.modules.remove(module_id);
        self.flush(&state).await
    }

    async fn module_installed(&self, module_id: &str) -> Result<Option<ComponentVersion>> {
        let state = self.state.read().await;
        match state.modules.get(module_id) {
            Some(version) => Ok(Some(ComponentVersion::parse(version)?)),
            None => Ok(None),
        }
    }

    async fn enable_feature(&self, feature_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.features.insert(feature_id.to_string());
        self.flush(&state).await
    }

    async fn disable_feature(&self, feature_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.features.remove(feature_id);
        self.flush(&state).await
    }

    async fn feature_enabled(&self, feature_id: &str) -> Result<bool> {
        Ok(self.state.read().await.features.contains(feature_id))
    }
}
