//! # Mosaic Core - 马赛克组件运行时内核
//!
//! 马赛克组件运行时是可扩展宿主应用的控制平面，提供以下核心功能：
//!
//! - **组件发现与注册**: 接收外部清单源构造的模块/特性描述符
//! - **依赖解析**: 依赖图构建、环检测、拓扑排序与版本兼容匹配
//! - **健康传播**: 缺失/不兼容/被禁依赖的级联阻断状态
//! - **生命周期编排**: 安装/卸载、启用/停用的事务化状态机，
//!   全有或全无的提交与回滚
//! - **单元解析链**: 按优先级与重定向规则把组件身份解析为
//!   具体可装载二进制
//! - **事件总线**: 事务提交后的生命周期事件通知
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use mosaic_core::{Container, CoreConfig, HostEnvironment};
//! use mosaic_core::module::descriptor::{FeatureDescriptor, ModuleDescriptor};
//! use mosaic_core::module::version::ComponentVersion;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let container = Container::new(CoreConfig::default());
//!
//!     container
//!         .add_module(
//!             ModuleDescriptor::new("blog", "博客", ComponentVersion::parse("1.0")?)
//!                 .with_feature(FeatureDescriptor::new("blog.post", "文章")),
//!         )
//!         .await?;
//!
//!     container
//!         .start(HostEnvironment::new(ComponentVersion::parse("1.0")?))
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `module` - 组件管理：描述符、依赖图、健康传播、生命周期、解析链
//! - `event` - 容器事件总线
//! - `core` - 运行时配置
//! - `utils` - 错误类型、日志系统、指标、ID 生成

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod core;
pub mod event;
pub mod module;
pub mod utils;

// 重导出常用类型，方便使用
pub use module::{
    ComponentIdentity, ComponentVersion, Container, ContainerState, DependencyDescriptor,
    EnableState, FeatureDescriptor, FeatureErrors, HostEnvironment, InstallState, LoadableUnit,
    ModuleDescriptor, ModuleErrors, ProcessorArchitecture, VersionSpecifier,
};

pub use event::{ContainerEvent, ContainerEventKind, EventBus, EventCallback};

pub use core::config::{CoreConfig, CoreConfigBuilder};

pub use utils::logger::{LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};
pub use utils::{error_code, CoreError, MetricsReport, Result};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 清单协议版本
pub const MANIFEST_VERSION: &str = "1.0";
