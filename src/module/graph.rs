//! 特性依赖图
//!
//! 本模块提供依赖图的构建与拓扑排序。
//!
//! # 主要组件
//!
//! - [`DependencyGraphBuilder`] - 消费描述符树，绑定依赖引用并构建反向边
//! - [`FeatureGraph`] - 构建结果，提供 Kahn 拓扑排序与最小环报告
//!
//! 图构建对缺失/不兼容依赖不抛错 —— 它们被记录为健康状态位；
//! 只有 ID 重复（注册阶段拦截）和依赖环（排序阶段报告）是致命错误。
//! 每个特性的 `dependings` 反向边仅在构建期间写入，构建完成后只读。

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, warn};

use crate::module::descriptor::FeatureErrors;
use crate::module::registry::ComponentRegistry;
use crate::utils::{CoreError, Result};

/// 特性依赖图
///
/// 节点为特性 ID（发现顺序），边为**已解析**的依赖引用。
/// 未解析的依赖无法参与环，不计入排序。
#[derive(Debug, Clone, Default)]
pub struct FeatureGraph {
    /// 节点（发现顺序）
    nodes: Vec<String>,
    /// 出边：特性 ID -> 已解析依赖的特性 ID
    edges: HashMap<String, Vec<String>>,
}

impl FeatureGraph {
    /// 节点数量
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// 图是否为空
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 特性的已解析依赖
    pub fn dependencies_of(&self, feature_id: &str) -> &[String] {
        self.edges
            .get(feature_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// 拓扑排序（Kahn 算法）
    ///
    /// 返回 `(ordered, cycle_members)`：
    ///
    /// - `ordered` - 依赖先行的特性顺序（每个特性位于其全部已解析依赖之后）
    /// - `cycle_members` - 若存在环，报告从滞留节点出发沿出边走到重复
    ///   所得的**最小环**成员；无环时为空
    pub fn sort(&self) -> (Vec<String>, Vec<String>) {
        // 入度 = 尚未就位的已解析依赖数
        let mut pending: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| (n.as_str(), self.dependencies_of(n).len()))
            .collect();

        // 反向邻接：依赖 -> 依赖方
        let mut dependers: HashMap<&str, Vec<&str>> = HashMap::new();
        for node in &self.nodes {
            for dep in self.dependencies_of(node) {
                dependers.entry(dep.as_str()).or_default().push(node.as_str());
            }
        }

        // 就绪队列按发现顺序初始化，保证排序结果确定
        let mut queue: VecDeque<&str> = self
            .nodes
            .iter()
            .filter(|n| pending[n.as_str()] == 0)
            .map(String::as_str)
            .collect();

        let mut ordered = Vec::with_capacity(self.nodes.len());
        while let Some(node) = queue.pop_front() {
            ordered.push(node.to_string());
            if let Some(list) = dependers.get(node) {
                for &depender in list {
                    if let Some(count) = pending.get_mut(depender) {
                        *count -= 1;
                        if *count == 0 {
                            queue.push_back(depender);
                        }
                    }
                }
            }
        }

        if ordered.len() == self.nodes.len() {
            return (ordered, Vec::new());
        }

        let placed: HashSet<&str> = ordered.iter().map(String::as_str).collect();
        let remaining: Vec<&str> = self
            .nodes
            .iter()
            .map(String::as_str)
            .filter(|n| !placed.contains(n))
            .collect();
        let cycle = self.find_minimal_cycle(&remaining);
        (ordered, cycle)
    }

    /// 拓扑顺序；存在环时返回 `CircularDependency`
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let (ordered, cycle) = self.sort();
        if cycle.is_empty() {
            Ok(ordered)
        } else {
            Err(CoreError::CircularDependency { cycle })
        }
    }

    /// 从任一滞留节点出发沿出边行走，遇到重复节点即得最小环
    ///
    /// 滞留集合中的每个节点都至少有一条指向滞留节点的出边，
    /// 行走必然在有限步内回到路径上的某个节点。
    fn find_minimal_cycle(&self, remaining: &[&str]) -> Vec<String> {
        let remaining_set: HashSet<&str> = remaining.iter().copied().collect();
        let Some(&start) = remaining.first() else {
            return Vec::new();
        };

        let mut path: Vec<&str> = Vec::new();
        let mut position: HashMap<&str, usize> = HashMap::new();
        let mut current = start;

        loop {
            if let Some(&pos) = position.get(current) {
                return path[pos..].iter().map(|s| s.to_string()).collect();
            }
            position.insert(current, path.len());
            path.push(current);

            match self
                .dependencies_of(current)
                .iter()
                .find(|dep| remaining_set.contains(dep.as_str()))
            {
                Some(next) => current = next.as_str(),
                None => {
                    // 不应发生：滞留节点必有滞留出边
                    warn!(feature_id = %current, "滞留节点缺少滞留出边");
                    return path.iter().map(|s| s.to_string()).collect();
                }
            }
        }
    }
}

/// 依赖图构建器
///
/// 对注册表执行一次构建：为每条依赖引用绑定目标特性或记录健康状态位，
/// 同时写入目标特性的 `dependings` 反向边并在构建结束时封存。
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyGraphBuilder;

/// 单条依赖引用的处理结论
enum EdgeOutcome {
    /// 目标缺失
    Missing,
    /// 目标存在但版本约束不满足
    Incompatible,
    /// 绑定成功
    Bind(String),
}

impl DependencyGraphBuilder {
    /// 构建依赖图
    ///
    /// 缺失依赖记 `MISSING_DEPENDENCY`，版本不符记
    /// `INCOMPATIBLE_DEPENDENCY`（版本约束针对目标特性所属模块的版本）。
    /// 本过程不抛错：健康状态位交由传播器与守卫消化。
    pub async fn build(registry: &ComponentRegistry) -> FeatureGraph {
        let handle = registry.handle();
        let mut inner = handle.write().await;

        // 重建前清除上一次构建的产物
        for module in inner.modules.iter_mut() {
            for feature in module.features.iter_mut() {
                feature.dependings.clear();
                feature.errors -= FeatureErrors::MISSING_DEPENDENCY
                    | FeatureErrors::INCOMPATIBLE_DEPENDENCY;
                for dependency in feature.dependencies.iter_mut() {
                    dependency.resolved = None;
                }
            }
        }

        // 第一遍：只读判定每条依赖引用的结论
        let mut planned: Vec<(String, usize, EdgeOutcome)> = Vec::new();
        for module in inner.modules.iter() {
            for feature in module.features.iter() {
                for (index, dependency) in feature.dependencies.iter().enumerate() {
                    let outcome = match inner.module_of_feature(&dependency.feature_id) {
                        None => EdgeOutcome::Missing,
                        Some(target_module) => match dependency.version {
                            Some(ref specifier)
                                if !specifier.matches(&target_module.version) =>
                            {
                                EdgeOutcome::Incompatible
                            }
                            _ => EdgeOutcome::Bind(dependency.feature_id.clone()),
                        },
                    };
                    planned.push((feature.id.clone(), index, outcome));
                }
            }
        }

        // 第二遍：落盘结论，写入反向边
        for (feature_id, index, outcome) in planned {
            match outcome {
                EdgeOutcome::Missing => {
                    if let Some(feature) = inner.feature_mut(&feature_id) {
                        feature.errors |= FeatureErrors::MISSING_DEPENDENCY;
                    }
                    debug!(feature_id = %feature_id, "依赖目标缺失");
                }
                EdgeOutcome::Incompatible => {
                    if let Some(feature) = inner.feature_mut(&feature_id) {
                        feature.errors |= FeatureErrors::INCOMPATIBLE_DEPENDENCY;
                    }
                    debug!(feature_id = %feature_id, "依赖版本不兼容");
                }
                EdgeOutcome::Bind(target_id) => {
                    if let Some(feature) = inner.feature_mut(&feature_id) {
                        feature.dependencies[index].resolved = Some(target_id.clone());
                    }
                    if let Some(target) = inner.feature_mut(&target_id) {
                        if !target.dependings.contains(&feature_id) {
                            target.dependings.push(feature_id.clone());
                        }
                    }
                }
            }
        }

        // 依赖图只收已解析的边；到此 dependings 封存，不再变更
        let mut graph = FeatureGraph::default();
        for module in inner.modules.iter() {
            for feature in module.features.iter() {
                graph.nodes.push(feature.id.clone());
                let resolved: Vec<String> = feature
                    .dependencies
                    .iter()
                    .filter_map(|d| d.resolved.clone())
                    .collect();
                graph.edges.insert(feature.id.clone(), resolved);
            }
        }

        debug!(features = graph.len(), "依赖图构建完成");
        graph
    }
}
