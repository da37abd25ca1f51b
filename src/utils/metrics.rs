//! 运行时指标收集
//!
//! 收集生命周期操作与解析链的计数指标，支持 JSON 导出。
//!
//! # 示例
//!
//! ```rust
//! use mosaic_core::utils::metrics::MetricsCollector;
//!
//! let collector = MetricsCollector::new();
//! collector.record_module_installed();
//! collector.record_unit_loaded(false);
//!
//! let report = collector.export();
//! assert_eq!(report.modules_installed, 1);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// 运行时指标收集器
///
/// 所有计数器使用 `AtomicU64`，可在多个任务间共享。
#[derive(Debug, Default)]
pub struct MetricsCollector {
    /// 成功安装的模块数
    modules_installed: AtomicU64,
    /// 成功卸载的模块数
    modules_uninstalled: AtomicU64,
    /// 成功启用的特性数
    features_enabled: AtomicU64,
    /// 成功停用的特性数
    features_disabled: AtomicU64,
    /// 装载的单元数
    units_loaded: AtomicU64,
    /// 解析缓存命中数
    unit_cache_hits: AtomicU64,
    /// 提交完成的事务数
    transactions_committed: AtomicU64,
    /// 回滚的事务数
    transactions_rolled_back: AtomicU64,
}

impl MetricsCollector {
    /// 创建新的指标收集器
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次模块安装
    pub fn record_module_installed(&self) {
        self.modules_installed.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录一次模块卸载
    pub fn record_module_uninstalled(&self) {
        self.modules_uninstalled.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录一次特性启用
    pub fn record_feature_enabled(&self) {
        self.features_enabled.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录一次特性停用
    pub fn record_feature_disabled(&self) {
        self.features_disabled.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录一次单元装载
    ///
    /// `cache_hit` 表示命中已装载缓存而非真实装载
    pub fn record_unit_loaded(&self, cache_hit: bool) {
        if cache_hit {
            self.unit_cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.units_loaded.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// 记录一次事务提交
    pub fn record_transaction_committed(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录一次事务回滚
    pub fn record_transaction_rolled_back(&self) {
        self.transactions_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    /// 导出指标快照
    pub fn export(&self) -> MetricsReport {
        MetricsReport {
            modules_installed: self.modules_installed.load(Ordering::Relaxed),
            modules_uninstalled: self.modules_uninstalled.load(Ordering::Relaxed),
            features_enabled: self.features_enabled.load(Ordering::Relaxed),
            features_disabled: self.features_disabled.load(Ordering::Relaxed),
            units_loaded: self.units_loaded.load(Ordering::Relaxed),
            unit_cache_hits: self.unit_cache_hits.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_rolled_back: self.transactions_rolled_back.load(Ordering::Relaxed),
            exported_at: Utc::now(),
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    /// 成功安装的模块数
    pub modules_installed: u64,
    /// 成功卸载的模块数
    pub modules_uninstalled: u64,
    /// 成功启用的特性数
    pub features_enabled: u64,
    /// 成功停用的特性数
    pub features_disabled: u64,
    /// 装载的单元数
    pub units_loaded: u64,
    /// 解析缓存命中数
    pub unit_cache_hits: u64,
    /// 提交完成的事务数
    pub transactions_committed: u64,
    /// 回滚的事务数
    pub transactions_rolled_back: u64,
    /// 导出时间
    pub exported_at: DateTime<Utc>,
}
