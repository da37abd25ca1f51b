//! 模块与特性描述符
//!
//! 定义组件运行时的核心数据模型：模块描述符、特性描述符、依赖引用、
//! 健康错误位集与安装/启用状态。
//!
//! 描述符由外部清单源构造（serde 反序列化即可），ID 在注册后不可变。
//! 运行期字段（错误位、状态、反向边）由图构建器和生命周期编排器维护，
//! 不参与序列化。

use std::path::PathBuf;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::module::loader::LoaderSpec;
use crate::module::version::{ComponentVersion, VersionSpecifier};

// ============================================================================
// 健康错误位集
// ============================================================================

bitflags! {
    /// 特性健康错误位集
    ///
    /// 健康错误不抛出，记录为状态并阻断后续生命周期迁移。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FeatureErrors: u32 {
        /// 依赖的特性未被发现
        const MISSING_DEPENDENCY = 1 << 0;
        /// 依赖存在但版本约束不满足
        const INCOMPATIBLE_DEPENDENCY = 1 << 1;
        /// 某个已解析依赖自身携带错误
        const FORBIDDEN_DEPENDENCY = 1 << 2;
        /// 所属模块携带错误
        const FORBIDDEN_MODULE = 1 << 3;
        /// 所属模块尚待安装
        const UNINSTALL_MODULE = 1 << 4;
    }
}

bitflags! {
    /// 模块健康错误位集
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ModuleErrors: u32 {
        /// 宿主版本不满足模块要求
        const INCOMPATIBLE_HOST = 1 << 0;
        /// 模块的全部特性均携带错误
        const FORBIDDEN_FEATURES = 1 << 1;
    }
}

// ============================================================================
// 生命周期状态
// ============================================================================

/// 模块安装状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallState {
    /// 待安装
    #[default]
    RequireInstall,
    /// 已安装
    Installed,
}

/// 特性启用状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnableState {
    /// 待启用
    #[default]
    RequireEnable,
    /// 已启用
    Enabled,
}

// ============================================================================
// 依赖引用
// ============================================================================

/// 依赖引用
///
/// 指向目标特性 ID；`resolved` 由图构建器填充，构建前为 None。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyDescriptor {
    /// 目标特性 ID
    pub feature_id: String,

    /// 对目标特性所属模块版本的约束
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub version: Option<VersionSpecifier>,

    /// 解析后的目标特性 ID（图构建成功绑定后与 `feature_id` 一致）
    #[serde(skip)]
    pub resolved: Option<String>,
}

impl DependencyDescriptor {
    /// 创建无版本约束的依赖引用
    pub fn new(feature_id: impl Into<String>) -> Self {
        Self {
            feature_id: feature_id.into(),
            version: None,
            resolved: None,
        }
    }

    /// 设置版本约束
    pub fn with_version(mut self, specifier: VersionSpecifier) -> Self {
        self.version = Some(specifier);
        self
    }

    /// 依赖是否已成功绑定
    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }
}

// ============================================================================
// 特性描述符
// ============================================================================

/// 特性描述符
///
/// 特性归属于唯一的模块（注册时由注册表赋值，终身不变）。
/// `dependings` 为反向边（依赖本特性的特性列表），仅在图构建期间写入，
/// 构建完成后只读 —— 级联停用和错误传播都依赖这一不变量。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureDescriptor {
    /// 特性唯一标识
    pub id: String,

    /// 特性显示名称
    #[serde(default)]
    pub name: String,

    /// 特性分类
    #[serde(default)]
    pub category: String,

    /// 所属模块 ID（注册时赋值）
    #[serde(skip)]
    pub module_id: String,

    /// 依赖引用（有序）
    #[serde(default)]
    pub dependencies: Vec<DependencyDescriptor>,

    /// 反向边：依赖本特性的特性 ID（图构建后只读）
    #[serde(skip)]
    pub dependings: Vec<String>,

    /// 健康错误位集
    #[serde(skip)]
    pub errors: FeatureErrors,

    /// 启用状态
    #[serde(skip)]
    pub enable_state: EnableState,

    /// 是否存在启用钩子（发现期由激活器定位器确定）
    #[serde(skip)]
    pub can_enable: bool,

    /// 是否存在停用钩子（发现期由激活器定位器确定）
    #[serde(skip)]
    pub can_disable: bool,
}

impl FeatureDescriptor {
    /// 创建特性描述符
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: String::new(),
            module_id: String::new(),
            dependencies: Vec::new(),
            dependings: Vec::new(),
            errors: FeatureErrors::empty(),
            enable_state: EnableState::RequireEnable,
            can_enable: false,
            can_disable: false,
        }
    }

    /// 设置分类
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// 追加依赖引用
    pub fn with_dependency(mut self, dependency: DependencyDescriptor) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// 是否处于启用状态
    pub fn is_enabled(&self) -> bool {
        self.enable_state == EnableState::Enabled
    }

    /// 是否携带任何健康错误
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// 是否允许强制停用
    ///
    /// 有启用钩子却没有停用钩子的特性是单向启用的，不允许强制停用；
    /// 它在启用状态下会阻塞其依赖的停用和所属模块的卸载。
    pub fn force_disableable(&self) -> bool {
        !(self.can_enable && !self.can_disable)
    }
}

// ============================================================================
// 模块描述符
// ============================================================================

/// 模块描述符
///
/// 模块独占地拥有其特性集合（有序）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// 模块唯一标识
    pub id: String,

    /// 模块显示名称
    #[serde(default)]
    pub name: String,

    /// 模块版本
    pub version: ComponentVersion,

    /// 对宿主版本的要求
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub host_requirement: Option<VersionSpecifier>,

    /// 模块拥有的特性（有序）
    #[serde(default)]
    pub features: Vec<FeatureDescriptor>,

    /// 模块自有可装载单元的装载器候选（有序）
    #[serde(default)]
    pub loaders: Vec<LoaderSpec>,

    /// 隔离/影子路径，用于解析相对的二进制位置
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub shadow_path: Option<PathBuf>,

    /// 健康错误位集
    #[serde(skip)]
    pub errors: ModuleErrors,

    /// 安装状态
    #[serde(skip)]
    pub install_state: InstallState,

    /// 是否存在安装钩子（发现期由激活器定位器确定）
    #[serde(skip)]
    pub has_installer: bool,
}

impl ModuleDescriptor {
    /// 创建模块描述符
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: ComponentVersion,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version,
            host_requirement: None,
            features: Vec::new(),
            loaders: Vec::new(),
            shadow_path: None,
            errors: ModuleErrors::empty(),
            install_state: InstallState::RequireInstall,
            has_installer: false,
        }
    }

    /// 设置宿主版本要求
    pub fn with_host_requirement(mut self, specifier: VersionSpecifier) -> Self {
        self.host_requirement = Some(specifier);
        self
    }

    /// 追加特性
    pub fn with_feature(mut self, feature: FeatureDescriptor) -> Self {
        self.features.push(feature);
        self
    }

    /// 追加装载器候选
    pub fn with_loader(mut self, spec: LoaderSpec) -> Self {
        self.loaders.push(spec);
        self
    }

    /// 设置影子路径
    pub fn with_shadow_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.shadow_path = Some(path.into());
        self
    }

    /// 是否处于已安装状态
    pub fn is_installed(&self) -> bool {
        self.install_state == InstallState::Installed
    }

    /// 是否携带任何健康错误
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
