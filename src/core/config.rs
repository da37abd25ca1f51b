//! 运行时配置
//!
//! 定义容器的配置结构、默认值与 YAML 加载逻辑。

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::module::version::ComponentVersion;
use crate::utils::{CoreError, Result};

/// 宿主配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// 宿主版本（模块的宿主版本要求据此评估）
    #[serde(default = "default_host_version")]
    pub version: String,

    /// 宿主处理器架构
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub architecture: Option<String>,
}

fn default_host_version() -> String {
    "1.0".to_string()
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            version: default_host_version(),
            architecture: None,
        }
    }
}

/// 持久化配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistConfig {
    /// 存储模式："memory" 或 "file"
    #[serde(default = "default_persist_mode")]
    pub mode: String,

    /// 文件模式下的状态文件路径
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<PathBuf>,
}

fn default_persist_mode() -> String {
    "memory".to_string()
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            mode: default_persist_mode(),
            path: None,
        }
    }
}

/// 解析链配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// 文件探测目录
    #[serde(default)]
    pub probe_dirs: Vec<PathBuf>,

    /// 重定向迭代上限
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// 查找缓存容量
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
}

fn default_max_redirects() -> usize {
    8
}

fn default_cache_size() -> usize {
    64
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            probe_dirs: Vec::new(),
            max_redirects: default_max_redirects(),
            cache_size: default_cache_size(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
        }
    }
}

/// 运行时配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    /// 宿主配置
    #[serde(default)]
    pub host: HostConfig,

    /// 持久化配置
    #[serde(default)]
    pub persist: PersistConfig,

    /// 解析链配置
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

impl CoreConfig {
    /// 创建配置构建器
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::new()
    }

    /// 从 YAML 文件加载配置
    pub async fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            CoreError::ConfigLoadFailed(format!("{}: {}", path.display(), e))
        })?;
        let config: CoreConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        ComponentVersion::parse(&self.host.version).map_err(|_| {
            CoreError::InvalidConfigValue {
                key: "host.version".to_string(),
                reason: format!("版本号格式无效: '{}'", self.host.version),
            }
        })?;

        match self.persist.mode.as_str() {
            "memory" => Ok(()),
            "file" => {
                if self.persist.path.is_none() {
                    Err(CoreError::InvalidConfigValue {
                        key: "persist.path".to_string(),
                        reason: "file 模式必须指定状态文件路径".to_string(),
                    })
                } else {
                    Ok(())
                }
            }
            other => Err(CoreError::InvalidConfigValue {
                key: "persist.mode".to_string(),
                reason: format!("未知存储模式: '{}'", other),
            }),
        }?;

        if self.resolver.max_redirects == 0 {
            return Err(CoreError::InvalidConfigValue {
                key: "resolver.max_redirects".to_string(),
                reason: "重定向上限必须大于 0".to_string(),
            });
        }
        Ok(())
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct CoreConfigBuilder {
    config: CoreConfig,
}

impl CoreConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self {
            config: CoreConfig::default(),
        }
    }

    /// 设置宿主版本
    pub fn host_version(mut self, version: impl Into<String>) -> Self {
        self.config.host.version = version.into();
        self
    }

    /// 设置宿主架构
    pub fn host_architecture(mut self, architecture: impl Into<String>) -> Self {
        self.config.host.architecture = Some(architecture.into());
        self
    }

    /// 使用文件持久化
    pub fn persist_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.persist.mode = "file".to_string();
        self.config.persist.path = Some(path.into());
        self
    }

    /// 追加探测目录
    pub fn probe_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.resolver.probe_dirs.push(dir.into());
        self
    }

    /// 设置重定向上限
    pub fn max_redirects(mut self, count: usize) -> Self {
        self.config.resolver.max_redirects = count;
        self
    }

    /// 设置查找缓存容量
    pub fn cache_size(mut self, size: usize) -> Self {
        self.config.resolver.cache_size = size;
        self
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log.level = level.into();
        self
    }

    /// 构建配置（含校验）
    pub fn build(self) -> Result<CoreConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
