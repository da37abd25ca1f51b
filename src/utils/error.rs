//! 马赛克运行时错误类型定义
//!
//! 本模块定义运行时中使用的所有错误类型，分为三个层级：
//!
//! 1. **致命配置错误** —— 发现/初始化阶段抛出，容器拒绝启动
//!    （重复 ID、循环依赖、描述符非法）
//! 2. **健康错误** —— 不抛出，作为描述符上的状态位记录，
//!    用于阻断后续生命周期迁移（见 [`crate::module::descriptor`]）
//! 3. **操作期错误** —— 生命周期批次执行中由守卫抛出，
//!    保证在任何可见变更之前失败

use thiserror::Error;

use crate::module::identity::ComponentIdentity;

/// 马赛克运行时核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    // ==================== 致命配置错误 ====================

    /// 模块 ID 重复
    #[error("模块 ID 重复: '{0}'")]
    DuplicateModuleId(String),

    /// 特性 ID 重复
    #[error("特性 ID 重复: '{0}'")]
    DuplicateFeatureId(String),

    /// 描述符非法
    #[error("描述符非法: {0}")]
    InvalidDescriptor(String),

    /// 循环依赖
    #[error("检测到循环依赖: {}", cycle.join(" -> "))]
    CircularDependency {
        /// 参与循环的特性 ID（最小环）
        cycle: Vec<String>,
    },

    /// 容器尚未启动
    #[error("容器尚未启动")]
    NotStarted,

    /// 容器已经启动
    #[error("容器已经启动")]
    AlreadyStarted,

    // ==================== 操作期错误 ====================

    /// 目标模块未发现
    #[error("模块未发现: '{0}'")]
    ModuleNotFound(String),

    /// 目标特性未发现
    #[error("特性未发现: '{0}'")]
    FeatureNotFound(String),

    /// 组件当前携带健康错误，显式激活被拒绝
    #[error("组件 '{id}' 携带健康错误，无法激活: {detail}")]
    ActivationBlocked {
        /// 被拒绝的模块或特性 ID
        id: String,
        /// 健康错误的文字描述
        detail: String,
    },

    /// 依赖约束阻止了停用/卸载
    #[error("组件 '{id}' 被以下已启用组件依赖，操作被拒绝: {dependents:?}")]
    DependencyViolation {
        /// 操作目标 ID
        id: String,
        /// 阻塞操作的依赖方特性 ID
        dependents: Vec<String>,
    },

    /// 安装钩子执行失败
    #[error("模块 '{module_id}' 安装钩子失败: {reason}")]
    InstallHookFailed {
        /// 模块 ID
        module_id: String,
        /// 失败原因
        reason: String,
    },

    /// 卸载钩子执行失败
    #[error("模块 '{module_id}' 卸载钩子失败: {reason}")]
    UninstallHookFailed {
        /// 模块 ID
        module_id: String,
        /// 失败原因
        reason: String,
    },

    /// 启用钩子执行失败
    #[error("特性 '{feature_id}' 启用钩子失败: {reason}")]
    EnableHookFailed {
        /// 特性 ID
        feature_id: String,
        /// 失败原因
        reason: String,
    },

    /// 停用钩子执行失败
    #[error("特性 '{feature_id}' 停用钩子失败: {reason}")]
    DisableHookFailed {
        /// 特性 ID
        feature_id: String,
        /// 失败原因
        reason: String,
    },

    /// 持久化提供者调用失败
    #[error("持久化操作失败: {0}")]
    PersistFailed(String),

    // ==================== 解析链错误 ====================

    /// 解析链没有任何装载器命中
    #[error("未找到可装载单元: {0}")]
    UnitNotFound(ComponentIdentity),

    /// 重定向次数超过上限
    #[error("重定向超出上限: {0}")]
    RedirectLoop(ComponentIdentity),

    /// 单元装载失败
    #[error("单元装载失败: '{identity}' - {reason}")]
    LoadFailed {
        /// 请求的身份
        identity: ComponentIdentity,
        /// 失败原因
        reason: String,
    },

    /// 版本或版本约束解析失败
    #[error("版本表达式非法: '{0}'")]
    VersionParse(String),

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 配置值无效
    #[error("配置值无效: '{key}' - {reason}")]
    InvalidConfigValue {
        /// 配置键
        key: String,
        /// 无效原因
        reason: String,
    },

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // ==================== 通用错误 ====================

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 运行时操作结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

/// 错误码常量
pub mod error_code {
    // 配置错误 (MODULIZE-0xx)

    /// 模块/特性 ID 重复
    pub const DUPLICATE_ID: &str = "MODULIZE-001";
    /// 依赖图存在环
    pub const CIRCULAR_DEPENDENCY: &str = "MODULIZE-002";
    /// 描述符非法
    pub const INVALID_DESCRIPTOR: &str = "MODULIZE-003";

    // 操作期错误 (MODULIZE-1xx)

    /// 组件未发现
    pub const COMPONENT_NOT_FOUND: &str = "MODULIZE-101";
    /// 健康错误阻断激活
    pub const ACTIVATION_BLOCKED: &str = "MODULIZE-102";
    /// 依赖约束阻断操作
    pub const DEPENDENCY_VIOLATION: &str = "MODULIZE-103";
    /// 生命周期钩子失败
    pub const HOOK_FAILED: &str = "MODULIZE-104";
    /// 持久化失败
    pub const PERSIST_FAILED: &str = "MODULIZE-105";

    // 解析链错误 (MODULIZE-2xx)

    /// 未找到可装载单元
    pub const UNIT_NOT_FOUND: &str = "MODULIZE-201";
    /// 重定向超出上限
    pub const REDIRECT_LOOP: &str = "MODULIZE-202";
    /// 单元装载失败
    pub const LOAD_FAILED: &str = "MODULIZE-203";

    // 配置错误 (MODULIZE-3xx)

    /// 配置加载失败
    pub const CONFIG_LOAD_FAILED: &str = "MODULIZE-301";
    /// 配置值无效
    pub const CONFIG_INVALID_VALUE: &str = "MODULIZE-302";
}

impl CoreError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::DuplicateModuleId(_) | CoreError::DuplicateFeatureId(_) => {
                error_code::DUPLICATE_ID
            }
            CoreError::CircularDependency { .. } => error_code::CIRCULAR_DEPENDENCY,
            CoreError::InvalidDescriptor(_) => error_code::INVALID_DESCRIPTOR,
            CoreError::ModuleNotFound(_) | CoreError::FeatureNotFound(_) => {
                error_code::COMPONENT_NOT_FOUND
            }
            CoreError::ActivationBlocked { .. } => error_code::ACTIVATION_BLOCKED,
            CoreError::DependencyViolation { .. } => error_code::DEPENDENCY_VIOLATION,
            CoreError::InstallHookFailed { .. }
            | CoreError::UninstallHookFailed { .. }
            | CoreError::EnableHookFailed { .. }
            | CoreError::DisableHookFailed { .. } => error_code::HOOK_FAILED,
            CoreError::PersistFailed(_) => error_code::PERSIST_FAILED,
            CoreError::UnitNotFound(_) => error_code::UNIT_NOT_FOUND,
            CoreError::RedirectLoop(_) => error_code::REDIRECT_LOOP,
            CoreError::LoadFailed { .. } => error_code::LOAD_FAILED,
            CoreError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            CoreError::InvalidConfigValue { .. } => error_code::CONFIG_INVALID_VALUE,
            _ => "UNKNOWN",
        }
    }

    /// 是否属于致命配置错误（容器拒绝启动的那一类）
    pub fn is_fatal_config(&self) -> bool {
        matches!(
            self,
            CoreError::DuplicateModuleId(_)
                | CoreError::DuplicateFeatureId(_)
                | CoreError::InvalidDescriptor(_)
                | CoreError::CircularDependency { .. }
        )
    }
}
