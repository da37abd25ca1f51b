//! 组件身份
//!
//! 定义可装载单元的身份元组（名称、版本、区域、签名令牌、处理器架构）。
//! 身份用于解析链的装载器匹配与依赖匹配：查询侧缺失的字段按通配处理。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::module::version::ComponentVersion;
use crate::utils::{CoreError, Result};

/// 处理器架构
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorArchitecture {
    /// 32 位 x86
    X86,
    /// 64 位 x86
    Amd64,
    /// 64 位 ARM
    Arm64,
}

impl ProcessorArchitecture {
    /// 从字符串解析架构名
    pub fn parse(text: &str) -> Result<Self> {
        match text.to_lowercase().as_str() {
            "x86" => Ok(ProcessorArchitecture::X86),
            "amd64" | "x64" => Ok(ProcessorArchitecture::Amd64),
            "arm64" | "aarch64" => Ok(ProcessorArchitecture::Arm64),
            _ => Err(CoreError::InvalidDescriptor(format!(
                "未知处理器架构: '{}'",
                text
            ))),
        }
    }
}

impl fmt::Display for ProcessorArchitecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessorArchitecture::X86 => write!(f, "x86"),
            ProcessorArchitecture::Amd64 => write!(f, "amd64"),
            ProcessorArchitecture::Arm64 => write!(f, "arm64"),
        }
    }
}

/// 组件身份
///
/// 标识一个可装载二进制候选的不可变元组。
/// 仅 `name` 为必填；其余字段在查询侧缺失时按通配处理
/// （见 [`ComponentIdentity::satisfies`]）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentIdentity {
    /// 组件名称
    pub name: String,

    /// 版本
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub version: Option<ComponentVersion>,

    /// 区域（None 表示区域中立）
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub locale: Option<String>,

    /// 签名令牌
    #[serde(with = "hex_token", skip_serializing_if = "Option::is_none", default)]
    pub token: Option<Vec<u8>>,

    /// 处理器架构
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub architecture: Option<ProcessorArchitecture>,
}

impl ComponentIdentity {
    /// 创建只含名称的身份
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            locale: None,
            token: None,
            architecture: None,
        }
    }

    /// 设置版本
    pub fn with_version(mut self, version: ComponentVersion) -> Self {
        self.version = Some(version);
        self
    }

    /// 设置区域
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// 设置签名令牌
    pub fn with_token(mut self, token: Vec<u8>) -> Self {
        self.token = Some(token);
        self
    }

    /// 设置处理器架构
    pub fn with_architecture(mut self, architecture: ProcessorArchitecture) -> Self {
        self.architecture = Some(architecture);
        self
    }

    /// 本身份（具体候选）是否满足查询身份
    ///
    /// 名称必须精确一致；查询侧缺失的字段视为通配，
    /// 查询侧给出的字段必须与候选完全一致。
    pub fn satisfies(&self, query: &ComponentIdentity) -> bool {
        if self.name != query.name {
            return false;
        }
        if let Some(ref version) = query.version {
            if self.version.as_ref() != Some(version) {
                return false;
            }
        }
        if let Some(ref locale) = query.locale {
            if self.locale.as_ref() != Some(locale) {
                return false;
            }
        }
        if let Some(ref token) = query.token {
            if self.token.as_ref() != Some(token) {
                return false;
            }
        }
        if let Some(architecture) = query.architecture {
            if self.architecture != Some(architecture) {
                return false;
            }
        }
        true
    }

    /// 解析十六进制签名令牌（`"null"` 或空串表示无令牌）
    pub fn parse_token(text: &str) -> Result<Option<Vec<u8>>> {
        let text = text.trim();
        if text.is_empty() || text.eq_ignore_ascii_case("null") {
            return Ok(None);
        }
        if text.len() % 2 != 0 {
            return Err(CoreError::InvalidDescriptor(format!(
                "签名令牌长度非法: '{}'",
                text
            )));
        }
        (0..text.len())
            .step_by(2)
            .map(|i| {
                u8::from_str_radix(&text[i..i + 2], 16).map_err(|_| {
                    CoreError::InvalidDescriptor(format!("签名令牌非十六进制: '{}'", text))
                })
            })
            .collect::<Result<Vec<u8>>>()
            .map(Some)
    }
}

impl fmt::Display for ComponentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(ref version) = self.version {
            write!(f, ", version={}", version)?;
        }
        if let Some(ref locale) = self.locale {
            write!(f, ", locale={}", locale)?;
        }
        if let Some(ref token) = self.token {
            write!(f, ", token=")?;
            for byte in token {
                write!(f, "{:02x}", byte)?;
            }
        }
        if let Some(architecture) = self.architecture {
            write!(f, ", arch={}", architecture)?;
        }
        Ok(())
    }
}

/// 签名令牌的十六进制字符串序列化
mod hex_token {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        token: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match token {
            Some(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
                serializer.serialize_str(&hex)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let text: Option<String> = Option::deserialize(deserializer)?;
        match text {
            None => Ok(None),
            Some(text) => {
                super::ComponentIdentity::parse_token(&text).map_err(D::Error::custom)
            }
        }
    }
}
