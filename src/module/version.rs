//! 组件版本与版本约束
//!
//! 本模块提供组件版本号和版本兼容性表达式的解析与匹配。
//!
//! 支持的约束形式：
//!
//! - 字面版本：`"1.9"` —— 按段精确比较，较短字面量为前缀匹配
//!   （`"1.9"` 匹配所有 `1.9.*`）
//! - 尾部通配：`"1.9.x"` / `"1.9.*"` —— 通配段及其后所有段任意
//! - 单边比较：`">=1.9"`、`">1.0"`、`"<=2.0.x"` —— 按段字典序比较
//! - 双边范围：`">=1.0, <2.0"`（逗号或空格连接）或 `"1.0-1.5"`
//!   （短横线形式，两端含）
//!
//! 匹配是纯函数且全定义：[`VersionSpecifier::matches`] 永不失败。
//! 无法被任何版本满足的表达式在解析阶段即被拒绝。

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::utils::{CoreError, Result};

// ============================================================================
// 组件版本
// ============================================================================

/// 组件版本号
///
/// 由一个或多个十进制数字段组成，段数不限（`1.9`、`1.9.5.12` 均合法）。
/// 排序按段字典序，缺失的尾段按 0 处理；仅当各段完全一致时相等。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentVersion {
    segments: Vec<u64>,
}

impl ComponentVersion {
    /// 从数字段构造版本
    pub fn new(segments: Vec<u64>) -> Self {
        Self { segments }
    }

    /// 解析版本字符串
    ///
    /// # Errors
    ///
    /// 任一段为空或非数字时返回 `VersionParse`
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CoreError::VersionParse(text.to_string()));
        }
        let segments = text
            .split('.')
            .map(|seg| {
                seg.parse::<u64>()
                    .map_err(|_| CoreError::VersionParse(text.to_string()))
            })
            .collect::<Result<Vec<u64>>>()?;
        Ok(Self { segments })
    }

    /// 数字段视图
    pub fn segments(&self) -> &[u64] {
        &self.segments
    }

    /// 取第 `index` 段，缺失按 0 处理
    fn segment_or_zero(&self, index: usize) -> u64 {
        self.segments.get(index).copied().unwrap_or(0)
    }

    /// 按段字典序比较前 `depth` 段（缺失段按 0 处理）
    pub(crate) fn cmp_prefix(&self, other: &ComponentVersion, depth: usize) -> Ordering {
        for i in 0..depth {
            match self.segment_or_zero(i).cmp(&other.segment_or_zero(i)) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        Ordering::Equal
    }

    /// 是否以 `prefix` 的全部段开头
    pub(crate) fn starts_with(&self, prefix: &[u64]) -> bool {
        if self.segments.len() < prefix.len() {
            // 缺失段按 0 比较（"1.9" 可作为 "1.9.0.0" 的前缀持有者）
            return prefix
                .iter()
                .enumerate()
                .all(|(i, seg)| self.segment_or_zero(i) == *seg);
        }
        self.segments[..prefix.len()] == *prefix
    }
}

impl PartialOrd for ComponentVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ComponentVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let depth = self.segments.len().max(other.segments.len());
        self.cmp_prefix(other, depth)
            .then_with(|| self.segments.len().cmp(&other.segments.len()))
    }
}

impl fmt::Display for ComponentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self
            .segments
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(".");
        write!(f, "{}", text)
    }
}

impl FromStr for ComponentVersion {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ComponentVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ComponentVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(D::Error::custom)
    }
}

// ============================================================================
// 版本约束
// ============================================================================

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `>=`
    Ge,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `<`
    Lt,
}

impl CompareOp {
    fn as_str(self) -> &'static str {
        match self {
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Ge => ordering != Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Lt => ordering == Ordering::Less,
        }
    }

    fn is_lower(self) -> bool {
        matches!(self, CompareOp::Ge | CompareOp::Gt)
    }
}

/// 单边版本界
///
/// `wildcard` 为真时比较深度截断到字面段数（`">=1.9.x"` 只比较前两段）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionBound {
    /// 比较运算符
    pub op: CompareOp,
    /// 界的字面版本（不含通配段）
    pub version: ComponentVersion,
    /// 字面量是否带尾部通配
    pub wildcard: bool,
}

impl VersionBound {
    fn matches(&self, version: &ComponentVersion) -> bool {
        let depth = if self.wildcard {
            self.version.segments().len()
        } else {
            version.segments().len().max(self.version.segments().len())
        };
        self.op.holds(version.cmp_prefix(&self.version, depth))
    }
}

impl fmt::Display for VersionBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.as_str(), self.version)?;
        if self.wildcard {
            write!(f, ".x")?;
        }
        Ok(())
    }
}

/// 版本兼容性约束
///
/// 对具体版本的谓词。解析阶段保证：任何成功解析出的约束
/// 都存在至少一个可满足它的版本。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpecifier {
    /// 字面版本，按段精确比较；较短字面量为前缀匹配
    Exact(ComponentVersion),
    /// 尾部通配：保留非通配前缀段
    Wildcard(ComponentVersion),
    /// 单边比较界
    Bound(VersionBound),
    /// 双边范围（两界同时成立）
    Range {
        /// 下界
        lower: VersionBound,
        /// 上界
        upper: VersionBound,
        /// 是否来自 `lo-hi` 短横线写法（仅影响显示）
        dash: bool,
    },
}

impl VersionSpecifier {
    /// 解析版本约束表达式
    ///
    /// # Errors
    ///
    /// 段格式非法、通配段后出现数字段、范围无法被任何版本满足时
    /// 返回 `VersionParse`
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CoreError::VersionParse(text.to_string()));
        }

        // 双边范围：逗号/空格连接的两个比较界
        if text.contains(',') || text.contains(char::is_whitespace) {
            return Self::parse_bound_pair(text);
        }

        // 单边比较界
        if text.starts_with('>') || text.starts_with('<') {
            let bound = Self::parse_bound(text)?;
            return Ok(VersionSpecifier::Bound(bound));
        }

        // 短横线范围：lo-hi，两端含
        if let Some((lo, hi)) = text.split_once('-') {
            return Self::parse_dash_range(text, lo, hi);
        }

        // 字面量：精确或尾部通配
        Self::parse_literal(text)
    }

    /// 判断具体版本是否满足约束
    ///
    /// 纯函数，永不失败。
    pub fn matches(&self, version: &ComponentVersion) -> bool {
        match self {
            VersionSpecifier::Exact(literal) | VersionSpecifier::Wildcard(literal) => {
                version.starts_with(literal.segments())
            }
            VersionSpecifier::Bound(bound) => bound.matches(version),
            VersionSpecifier::Range { lower, upper, .. } => {
                lower.matches(version) && upper.matches(version)
            }
        }
    }

    /// 解析字面量（精确版本或尾部通配）
    fn parse_literal(text: &str) -> Result<Self> {
        let mut prefix = Vec::new();
        let mut saw_wildcard = false;
        for seg in text.split('.') {
            if seg == "x" || seg == "X" || seg == "*" {
                saw_wildcard = true;
                continue;
            }
            if saw_wildcard {
                // 通配段之后不允许再出现数字段
                return Err(CoreError::VersionParse(text.to_string()));
            }
            let value = seg
                .parse::<u64>()
                .map_err(|_| CoreError::VersionParse(text.to_string()))?;
            prefix.push(value);
        }
        if prefix.is_empty() {
            return Err(CoreError::VersionParse(text.to_string()));
        }
        let literal = ComponentVersion::new(prefix);
        if saw_wildcard {
            Ok(VersionSpecifier::Wildcard(literal))
        } else {
            Ok(VersionSpecifier::Exact(literal))
        }
    }

    /// 解析单个比较界（如 `">=1.9.x"`）
    fn parse_bound(text: &str) -> Result<VersionBound> {
        let (op, rest) = if let Some(rest) = text.strip_prefix(">=") {
            (CompareOp::Ge, rest)
        } else if let Some(rest) = text.strip_prefix("<=") {
            (CompareOp::Le, rest)
        } else if let Some(rest) = text.strip_prefix('>') {
            (CompareOp::Gt, rest)
        } else if let Some(rest) = text.strip_prefix('<') {
            (CompareOp::Lt, rest)
        } else {
            return Err(CoreError::VersionParse(text.to_string()));
        };

        match Self::parse_literal(rest.trim())? {
            VersionSpecifier::Exact(version) => Ok(VersionBound {
                op,
                version,
                wildcard: false,
            }),
            VersionSpecifier::Wildcard(version) => Ok(VersionBound {
                op,
                version,
                wildcard: true,
            }),
            _ => Err(CoreError::VersionParse(text.to_string())),
        }
    }

    /// 解析逗号/空格连接的双边范围
    fn parse_bound_pair(text: &str) -> Result<Self> {
        let parts: Vec<&str> = text
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|p| !p.is_empty())
            .collect();
        if parts.len() != 2 {
            return Err(CoreError::VersionParse(text.to_string()));
        }
        let first = Self::parse_bound(parts[0])?;
        let second = Self::parse_bound(parts[1])?;
        let (lower, upper) = if first.op.is_lower() {
            (first, second)
        } else {
            (second, first)
        };
        if lower.op.is_lower() == upper.op.is_lower() {
            return Err(CoreError::VersionParse(text.to_string()));
        }
        Self::check_satisfiable(text, &lower, &upper)?;
        Ok(VersionSpecifier::Range {
            lower,
            upper,
            dash: false,
        })
    }

    /// 解析短横线范围 `lo-hi`（两端含，比较深度截断到字面段数）
    fn parse_dash_range(text: &str, lo: &str, hi: &str) -> Result<Self> {
        let lower = VersionBound {
            op: CompareOp::Ge,
            version: ComponentVersion::parse(lo)?,
            wildcard: true,
        };
        let upper = VersionBound {
            op: CompareOp::Le,
            version: ComponentVersion::parse(hi)?,
            wildcard: true,
        };
        Self::check_satisfiable(text, &lower, &upper)?;
        Ok(VersionSpecifier::Range {
            lower,
            upper,
            dash: true,
        })
    }

    /// 拒绝无法被任何版本满足的范围
    fn check_satisfiable(text: &str, lower: &VersionBound, upper: &VersionBound) -> Result<()> {
        let depth = lower
            .version
            .segments()
            .len()
            .max(upper.version.segments().len());
        match lower.version.cmp_prefix(&upper.version, depth) {
            Ordering::Greater => Err(CoreError::VersionParse(text.to_string())),
            Ordering::Equal
                if lower.op == CompareOp::Gt || upper.op == CompareOp::Lt =>
            {
                Err(CoreError::VersionParse(text.to_string()))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for VersionSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpecifier::Exact(v) => write!(f, "{}", v),
            VersionSpecifier::Wildcard(v) => write!(f, "{}.x", v),
            VersionSpecifier::Bound(b) => write!(f, "{}", b),
            VersionSpecifier::Range { lower, upper, dash } => {
                if *dash {
                    write!(f, "{}-{}", lower.version, upper.version)
                } else {
                    write!(f, "{}, {}", lower, upper)
                }
            }
        }
    }
}

impl FromStr for VersionSpecifier {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for VersionSpecifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for VersionSpecifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(D::Error::custom)
    }
}
