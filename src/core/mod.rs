//! 核心模块
//!
//! 包含运行时配置结构与加载逻辑。

pub mod config;

pub use config::{
    CoreConfig, CoreConfigBuilder, HostConfig, LogConfig, PersistConfig, ResolverConfig,
};
