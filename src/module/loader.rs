//! 可装载单元解析链
//!
//! 将抽象的组件身份解析为具体可装载二进制的机制。
//! 解析链按优先级从高到低尝试装载器：
//!
//! - 带具体二进制位置的声明式条目（codebase）优先级最高
//! - 仅声明重定向规则的条目次之
//! - 只按文件探测的装载器最低
//!
//! 重定向装载器会就地改写请求身份中的版本，并将改写后的身份
//! 重新提交给解析链（迭代有界，防止重定向回环）。
//! 已装载的单元总是优先于重新装载；单元缓存支持并发读写，
//! 重复装载被缓存去重而不是由锁阻止。

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::module::identity::{ComponentIdentity, ProcessorArchitecture};
use crate::module::version::{ComponentVersion, VersionSpecifier};
use crate::utils::{CoreError, MetricsCollector, Result};

/// 单元文件扩展名（文件探测装载器使用）
const UNIT_FILE_EXT: &str = "unit";

/// 声明式 codebase 条目优先级
pub const PRIORITY_CODEBASE: i32 = 300;
/// 声明式仅重定向条目优先级
pub const PRIORITY_REDIRECT: i32 = 200;
/// 文件探测装载器优先级
pub const PRIORITY_PROBE: i32 = 100;

// ============================================================================
// 装载器配置（外部清单边界）
// ============================================================================

/// 声明式装载器的身份元素
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySpec {
    /// 组件名称（必填）
    pub name: String,

    /// 区域（"neutral" 或缺失表示区域中立）
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub culture: Option<String>,

    /// 十六进制签名令牌（"null" 或缺失表示无令牌）
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub token: Option<String>,

    /// 处理器架构
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub architecture: Option<String>,
}

/// 版本重定向元素：旧版本范围替换为新的具体版本
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectSpec {
    /// 旧版本范围（版本约束表达式，如 "1.0-1.5"）
    pub old_version: String,

    /// 新的具体版本
    pub new_version: String,
}

/// codebase 元素：具体版本及其二进制位置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodebaseSpec {
    /// 具体版本
    pub version: String,

    /// 二进制位置：相对路径（相对模块影子路径）、绝对路径、
    /// UNC 路径或 http/https/ftp/file URI
    pub location: String,
}

/// 声明式装载器条目
///
/// 身份元素配合重定向元素、codebase 元素之一或两者。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderSpec {
    /// 身份元素
    pub identity: IdentitySpec,

    /// 重定向元素
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub redirect: Option<RedirectSpec>,

    /// codebase 元素
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub codebase: Option<CodebaseSpec>,
}

// ============================================================================
// 匹配结果与可装载单元
// ============================================================================

/// 装载器匹配结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// 不匹配
    Failed,
    /// 命中，可直接装载
    Success,
    /// 命中重定向规则，请求身份已被改写，需重新提交解析链
    Redirect,
    /// 命中重定向规则且本条目同时携带新版本的具体位置
    RedirectAndMatch,
}

/// 解析后的单元位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitLocation {
    /// 本地或 UNC 文件路径
    Path(PathBuf),
    /// http/https/ftp/file URI
    Url(url::Url),
}

impl std::fmt::Display for UnitLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitLocation::Path(path) => write!(f, "{}", path.display()),
            UnitLocation::Url(url) => write!(f, "{}", url),
        }
    }
}

/// 可装载单元
///
/// 解析链的产物：具体身份加上可获取的二进制位置。
#[derive(Debug, Clone)]
pub struct LoadableUnit {
    /// 单元的具体身份
    pub identity: ComponentIdentity,

    /// 解析后的位置
    pub location: UnitLocation,

    /// 拥有该单元的模块 ID（进程级单元为 None）
    pub owner: Option<String>,
}

/// 单次解析的结果
#[derive(Debug, Clone)]
pub struct Resolution {
    /// 解析出的单元
    pub unit: Arc<LoadableUnit>,
    /// 是否为新装载（false 表示命中已装载缓存）
    pub fresh: bool,
}

// ============================================================================
// 装载器接口
// ============================================================================

/// 可装载单元装载器接口
///
/// `match_identity` 在命中重定向规则时会就地改写传入的请求身份。
/// `match_identity` 与 `load` 必须幂等，允许多个调用方并发地对
/// 同一身份调用（重复装载由缓存去重）。
#[async_trait]
pub trait UnitLoader: Send + Sync {
    /// 本装载器装载成功后将产出的身份
    fn identity(&self) -> ComponentIdentity;

    /// 优先级，数值大者先试
    fn priority(&self) -> i32;

    /// 匹配请求身份，必要时就地改写（重定向）
    fn match_identity(&self, request: &mut ComponentIdentity) -> MatchOutcome;

    /// 装载请求对应的单元，解析出具体可获取的位置
    async fn load(&self, request: &ComponentIdentity) -> Result<LoadableUnit>;

    /// 拥有本装载器的模块 ID
    fn owner(&self) -> Option<&str> {
        None
    }
}

// ============================================================================
// 声明式装载器
// ============================================================================

/// 声明式装载器
///
/// 由清单中的 [`LoaderSpec`] 构造：重定向规则、codebase 位置或两者兼有。
pub struct DeclarativeLoader {
    /// 身份（版本取 codebase 的具体版本）
    identity: ComponentIdentity,
    /// 重定向规则：旧版本范围 -> 新版本
    redirect: Option<(VersionSpecifier, ComponentVersion)>,
    /// codebase：具体版本及位置
    codebase: Option<(ComponentVersion, String)>,
    /// 相对位置的基准目录（模块影子路径）
    base_dir: Option<PathBuf>,
    /// 拥有者模块 ID
    owner: Option<String>,
}

impl DeclarativeLoader {
    /// 从清单条目构造装载器
    ///
    /// # Errors
    ///
    /// 条目既无重定向又无 codebase、或任一版本/令牌/架构字段非法时
    /// 返回 `InvalidDescriptor`
    pub fn from_spec(
        spec: &LoaderSpec,
        base_dir: Option<PathBuf>,
        owner: Option<String>,
    ) -> Result<Self> {
        if spec.redirect.is_none() && spec.codebase.is_none() {
            return Err(CoreError::InvalidDescriptor(format!(
                "装载器条目 '{}' 缺少 redirect 与 codebase",
                spec.identity.name
            )));
        }

        let redirect = spec
            .redirect
            .as_ref()
            .map(|r| {
                Ok::<_, CoreError>((
                    VersionSpecifier::parse(&r.old_version)?,
                    ComponentVersion::parse(&r.new_version)?,
                ))
            })
            .transpose()?;

        let codebase = spec
            .codebase
            .as_ref()
            .map(|c| Ok::<_, CoreError>((ComponentVersion::parse(&c.version)?, c.location.clone())))
            .transpose()?;

        let mut identity = ComponentIdentity::new(spec.identity.name.clone());
        if let Some((ref version, _)) = codebase {
            identity.version = Some(version.clone());
        } else if let Some((_, ref new_version)) = redirect {
            identity.version = Some(new_version.clone());
        }
        if let Some(ref culture) = spec.identity.culture {
            if !culture.eq_ignore_ascii_case("neutral") {
                identity.locale = Some(culture.clone());
            }
        }
        if let Some(ref token) = spec.identity.token {
            identity.token = ComponentIdentity::parse_token(token)?;
        }
        if let Some(ref architecture) = spec.identity.architecture {
            identity.architecture = Some(ProcessorArchitecture::parse(architecture)?);
        }

        Ok(Self {
            identity,
            redirect,
            codebase,
            base_dir,
            owner,
        })
    }

    /// 将位置字符串解析为具体可获取的位置
    fn resolve_location(&self, location: &str) -> UnitLocation {
        // URI 形式
        if let Ok(url) = url::Url::parse(location) {
            if matches!(url.scheme(), "http" | "https" | "ftp" | "file") {
                return UnitLocation::Url(url);
            }
        }
        // UNC 路径
        if location.starts_with("\\\\") {
            return UnitLocation::Path(PathBuf::from(location));
        }
        let path = Path::new(location);
        if path.is_absolute() {
            return UnitLocation::Path(path.to_path_buf());
        }
        // 相对路径：相对模块影子路径
        match self.base_dir {
            Some(ref base) => UnitLocation::Path(base.join(path)),
            None => UnitLocation::Path(path.to_path_buf()),
        }
    }
}

#[async_trait]
impl UnitLoader for DeclarativeLoader {
    fn identity(&self) -> ComponentIdentity {
        self.identity.clone()
    }

    fn priority(&self) -> i32 {
        if self.codebase.is_some() {
            PRIORITY_CODEBASE
        } else {
            PRIORITY_REDIRECT
        }
    }

    fn match_identity(&self, request: &mut ComponentIdentity) -> MatchOutcome {
        if request.name != self.identity.name {
            return MatchOutcome::Failed;
        }
        // 装载器声明的区域/令牌/架构必须与请求精确一致（请求缺失按通配）
        if let (Some(locale), Some(requested)) = (&self.identity.locale, &request.locale) {
            if locale != requested {
                return MatchOutcome::Failed;
            }
        }
        if let (Some(token), Some(requested)) = (&self.identity.token, &request.token) {
            if token != requested {
                return MatchOutcome::Failed;
            }
        }
        if let (Some(arch), Some(requested)) = (self.identity.architecture, request.architecture) {
            if arch != requested {
                return MatchOutcome::Failed;
            }
        }

        // 重定向规则：旧版本范围命中则就地改写版本
        if let Some((ref old_range, ref new_version)) = self.redirect {
            if let Some(ref requested) = request.version {
                if requested != new_version && old_range.matches(requested) {
                    request.version = Some(new_version.clone());
                    trace!(
                        name = %request.name,
                        new_version = %new_version,
                        "重定向规则命中，版本已改写"
                    );
                    return match self.codebase {
                        Some((ref version, _)) if version == new_version => {
                            MatchOutcome::RedirectAndMatch
                        }
                        _ => MatchOutcome::Redirect,
                    };
                }
            }
        }

        // codebase：版本一致（或请求未指定版本）则命中
        if let Some((ref version, _)) = self.codebase {
            return match request.version {
                None => MatchOutcome::Success,
                Some(ref requested) if requested == version => MatchOutcome::Success,
                Some(_) => MatchOutcome::Failed,
            };
        }

        MatchOutcome::Failed
    }

    async fn load(&self, _request: &ComponentIdentity) -> Result<LoadableUnit> {
        let (_, ref location) = self.codebase.as_ref().ok_or_else(|| CoreError::LoadFailed {
            identity: self.identity.clone(),
            reason: "仅重定向条目不携带二进制位置".to_string(),
        })?;

        let resolved = self.resolve_location(location);
        debug!(identity = %self.identity, location = %resolved, "装载声明式单元");

        Ok(LoadableUnit {
            identity: self.identity.clone(),
            location: resolved,
            owner: self.owner.clone(),
        })
    }

    fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }
}

// ============================================================================
// 文件探测装载器
// ============================================================================

/// 文件探测装载器
///
/// 在探测目录中按文件名查找 `<name>-<version>.unit` 或 `<name>.unit`。
/// 探测型装载器的身份在匹配时才能确定，`identity()` 返回空名身份。
pub struct FileProbeLoader {
    /// 探测目录
    dirs: Vec<PathBuf>,
}

impl FileProbeLoader {
    /// 创建文件探测装载器
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// 在探测目录中查找请求对应的单元文件
    ///
    /// 返回 (文件路径, 从文件名解析出的版本)
    fn probe(&self, request: &ComponentIdentity) -> Option<(PathBuf, Option<ComponentVersion>)> {
        for dir in &self.dirs {
            // 带版本的文件名优先
            if let Some(ref version) = request.version {
                let candidate = dir.join(format!("{}-{}.{}", request.name, version, UNIT_FILE_EXT));
                if candidate.is_file() {
                    return Some((candidate, Some(version.clone())));
                }
            }
            let plain = dir.join(format!("{}.{}", request.name, UNIT_FILE_EXT));
            if plain.is_file() {
                return Some((plain, request.version.clone()));
            }
        }
        None
    }
}

#[async_trait]
impl UnitLoader for FileProbeLoader {
    fn identity(&self) -> ComponentIdentity {
        ComponentIdentity::new(String::new())
    }

    fn priority(&self) -> i32 {
        PRIORITY_PROBE
    }

    fn match_identity(&self, request: &mut ComponentIdentity) -> MatchOutcome {
        match self.probe(request) {
            Some(_) => MatchOutcome::Success,
            None => MatchOutcome::Failed,
        }
    }

    async fn load(&self, request: &ComponentIdentity) -> Result<LoadableUnit> {
        let (path, version) = self.probe(request).ok_or_else(|| CoreError::LoadFailed {
            identity: request.clone(),
            reason: "探测目录中未找到单元文件".to_string(),
        })?;

        let mut identity = ComponentIdentity::new(request.name.clone());
        identity.version = version;
        debug!(identity = %identity, path = %path.display(), "装载探测单元");

        Ok(LoadableUnit {
            identity,
            location: UnitLocation::Path(path),
            owner: None,
        })
    }

    fn owner(&self) -> Option<&str> {
        None
    }
}

// ============================================================================
// 解析链
// ============================================================================

/// 可装载单元解析链
///
/// 按优先级降序尝试装载器并缓存结果。单元缓存与查找缓存
/// 均支持并发读写；对同一身份的并发装载会产生重复装载，
/// 由缓存在插入时去重。
pub struct ResolutionChain {
    /// 装载器集合（按优先级降序，同优先级保持加入顺序）
    loaders: RwLock<Vec<Arc<dyn UnitLoader>>>,

    /// 已装载单元：具体身份 -> 单元
    units: RwLock<HashMap<ComponentIdentity, Arc<LoadableUnit>>>,

    /// 查找缓存：请求身份 -> 解析出的具体身份
    lookup_cache: Mutex<LruCache<ComponentIdentity, ComponentIdentity>>,

    /// 重定向迭代上限
    max_redirects: usize,

    /// 指标收集器
    metrics: Arc<MetricsCollector>,
}

impl ResolutionChain {
    /// 创建解析链
    pub fn new(max_redirects: usize, cache_size: usize, metrics: Arc<MetricsCollector>) -> Self {
        let cache_size = NonZeroUsize::new(cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            loaders: RwLock::new(Vec::new()),
            units: RwLock::new(HashMap::new()),
            lookup_cache: Mutex::new(LruCache::new(cache_size)),
            max_redirects,
            metrics,
        }
    }

    /// 加入装载器并按优先级降序重排（稳定排序保持同优先级的加入顺序）
    pub async fn add_loader(&self, loader: Arc<dyn UnitLoader>) {
        let mut loaders = self.loaders.write().await;
        loaders.push(loader);
        loaders.sort_by_key(|l| std::cmp::Reverse(l.priority()));
    }

    /// 当前装载器数量
    pub async fn loader_count(&self) -> usize {
        self.loaders.read().await.len()
    }

    /// 解析请求身份为可装载单元
    ///
    /// 已装载单元优先；`Redirect` 结果会改写身份并重新提交，
    /// 迭代次数超过上限返回 `RedirectLoop`。
    pub async fn resolve(&self, request: &ComponentIdentity) -> Result<Resolution> {
        // 查找缓存：请求 -> 具体身份
        {
            let mut cache = self.lookup_cache.lock().await;
            if let Some(resolved) = cache.get(request).cloned() {
                if let Some(unit) = self.units.read().await.get(&resolved) {
                    self.metrics.record_unit_loaded(true);
                    return Ok(Resolution {
                        unit: unit.clone(),
                        fresh: false,
                    });
                }
            }
        }

        // 已装载单元总是优先于重新装载
        if let Some(unit) = self.find_loaded(request).await {
            self.metrics.record_unit_loaded(true);
            return Ok(Resolution { unit, fresh: false });
        }

        let mut ident = request.clone();
        for _ in 0..=self.max_redirects {
            let loaders = self.loaders.read().await.clone();
            let mut redirected = false;

            for loader in &loaders {
                let mut candidate = ident.clone();
                match loader.match_identity(&mut candidate) {
                    MatchOutcome::Failed => continue,
                    MatchOutcome::Redirect => {
                        // 改写后的身份可能已有现成单元
                        if let Some(unit) = self.find_loaded(&candidate).await {
                            self.metrics.record_unit_loaded(true);
                            self.remember(request, &unit.identity).await;
                            return Ok(Resolution { unit, fresh: false });
                        }
                        ident = candidate;
                        redirected = true;
                        break;
                    }
                    MatchOutcome::Success | MatchOutcome::RedirectAndMatch => {
                        let unit = loader.load(&candidate).await?;
                        let (unit, fresh) = self.insert_unit(unit).await;
                        self.remember(request, &unit.identity).await;
                        self.metrics.record_unit_loaded(!fresh);
                        return Ok(Resolution { unit, fresh });
                    }
                }
            }

            if !redirected {
                warn!(identity = %ident, "解析链没有任何装载器命中");
                return Err(CoreError::UnitNotFound(ident));
            }
        }

        Err(CoreError::RedirectLoop(ident))
    }

    /// 移除某模块拥有的全部单元，返回被移除的身份
    pub async fn evict_owner(&self, module_id: &str) -> Vec<ComponentIdentity> {
        let mut units = self.units.write().await;
        let evicted: Vec<ComponentIdentity> = units
            .iter()
            .filter(|(_, unit)| unit.owner.as_deref() == Some(module_id))
            .map(|(identity, _)| identity.clone())
            .collect();
        for identity in &evicted {
            units.remove(identity);
        }
        drop(units);

        if !evicted.is_empty() {
            // 查找缓存可能指向被移除的单元，整体失效
            self.lookup_cache.lock().await.clear();
            info!(module_id, count = evicted.len(), "模块单元已从解析缓存移除");
        }
        evicted
    }

    /// 在已装载单元中查找满足请求的条目
    async fn find_loaded(&self, request: &ComponentIdentity) -> Option<Arc<LoadableUnit>> {
        let units = self.units.read().await;
        units
            .values()
            .find(|unit| unit.identity.satisfies(request))
            .cloned()
    }

    /// 插入单元缓存；并发装载的重复结果在此去重
    async fn insert_unit(&self, unit: LoadableUnit) -> (Arc<LoadableUnit>, bool) {
        let mut units = self.units.write().await;
        if let Some(existing) = units.get(&unit.identity) {
            return (existing.clone(), false);
        }
        let unit = Arc::new(unit);
        units.insert(unit.identity.clone(), unit.clone());
        (unit, true)
    }

    /// 记录请求身份到具体身份的映射
    async fn remember(&self, request: &ComponentIdentity, resolved: &ComponentIdentity) {
        self.lookup_cache
            .lock()
            .await
            .put(request.clone(), resolved.clone());
    }
}
