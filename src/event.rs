//! 容器事件系统
//!
//! 生命周期迁移与单元装载的事件通知。事件严格在对应事务提交之后
//! 发布；订阅回调必须线程安全，可能在任意任务上被调用。
//!
//! # 使用示例
//!
//! ```ignore
//! use std::sync::Arc;
//! use mosaic_core::event::{ContainerEventKind, EventBus};
//!
//! let bus = EventBus::new();
//! let id = bus.subscribe(Some(ContainerEventKind::ModuleInstalled), Arc::new(|event| {
//!     println!("模块已安装: {}", event.subject);
//! })).await;
//! # let _ = id;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::module::identity::ComponentIdentity;
use crate::module::loader::LoadableUnit;
use crate::utils::generate_id;

/// 容器事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerEventKind {
    /// 模块完成安装
    ModuleInstalled,
    /// 模块完成卸载
    ModuleUninstalled,
    /// 特性完成启用
    FeatureEnabled,
    /// 特性完成停用
    FeatureDisabled,
    /// 可装载单元完成装载
    ModuleLoaded,
    /// 可装载单元被移除
    ModuleUnloaded,
}

impl ContainerEventKind {
    /// 事件类型的字符串标识
    pub fn as_str(self) -> &'static str {
        match self {
            ContainerEventKind::ModuleInstalled => "module.installed",
            ContainerEventKind::ModuleUninstalled => "module.uninstalled",
            ContainerEventKind::FeatureEnabled => "feature.enabled",
            ContainerEventKind::FeatureDisabled => "feature.disabled",
            ContainerEventKind::ModuleLoaded => "module.loaded",
            ContainerEventKind::ModuleUnloaded => "module.unloaded",
        }
    }
}

impl std::fmt::Display for ContainerEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 容器事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerEvent {
    /// 事件 ID
    pub event_id: String,

    /// 事件类型
    pub kind: ContainerEventKind,

    /// 事件主体（模块/特性 ID 或组件身份）
    pub subject: String,

    /// 附加数据
    #[serde(default)]
    pub detail: serde_json::Value,

    /// 事件时间
    pub timestamp: DateTime<Utc>,
}

impl ContainerEvent {
    /// 构造事件
    pub fn new(kind: ContainerEventKind, subject: impl Into<String>) -> Self {
        Self {
            event_id: generate_id(),
            kind,
            subject: subject.into(),
            detail: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    /// 附加数据
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }

    /// 模块安装事件
    pub fn module_installed(module_id: &str) -> Self {
        Self::new(ContainerEventKind::ModuleInstalled, module_id)
    }

    /// 模块卸载事件
    pub fn module_uninstalled(module_id: &str) -> Self {
        Self::new(ContainerEventKind::ModuleUninstalled, module_id)
    }

    /// 特性启用事件
    pub fn feature_enabled(feature_id: &str) -> Self {
        Self::new(ContainerEventKind::FeatureEnabled, feature_id)
    }

    /// 特性停用事件
    pub fn feature_disabled(feature_id: &str) -> Self {
        Self::new(ContainerEventKind::FeatureDisabled, feature_id)
    }

    /// 单元装载事件
    pub fn module_loaded(unit: &LoadableUnit) -> Self {
        Self::new(ContainerEventKind::ModuleLoaded, unit.identity.to_string()).with_detail(
            serde_json::json!({
                "location": unit.location.to_string(),
                "owner": unit.owner,
            }),
        )
    }

    /// 单元移除事件
    pub fn module_unloaded(identity: &ComponentIdentity) -> Self {
        Self::new(ContainerEventKind::ModuleUnloaded, identity.to_string())
    }
}

/// 事件回调函数类型
///
/// 回调必须线程安全，可能被并发调用。
pub type EventCallback = Arc<dyn Fn(ContainerEvent) + Send + Sync>;

/// 内部订阅条目
#[derive(Clone)]
struct SubscriptionEntry {
    /// 订阅的事件类型（None 表示订阅全部）
    kind: Option<ContainerEventKind>,
    /// 回调函数
    callback: EventCallback,
}

/// 容器事件总线
///
/// 提供回调式的订阅/发布。发布时先在锁外复制命中的回调列表，
/// 回调执行不持有内部锁。
#[derive(Clone, Default)]
pub struct EventBus {
    subscriptions: Arc<RwLock<HashMap<String, SubscriptionEntry>>>,
}

impl EventBus {
    /// 创建事件总线
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅事件
    ///
    /// `kind` 为 None 时接收全部事件。返回订阅 ID。
    pub async fn subscribe(
        &self,
        kind: Option<ContainerEventKind>,
        callback: EventCallback,
    ) -> String {
        let subscription_id = generate_id();
        let entry = SubscriptionEntry { kind, callback };
        self.subscriptions
            .write()
            .await
            .insert(subscription_id.clone(), entry);
        debug!(subscription_id = %subscription_id, kind = ?kind, "事件订阅已登记");
        subscription_id
    }

    /// 取消订阅；订阅不存在返回 false
    pub async fn unsubscribe(&self, subscription_id: &str) -> bool {
        self.subscriptions
            .write()
            .await
            .remove(subscription_id)
            .is_some()
    }

    /// 当前订阅数量
    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// 发布事件
    pub async fn publish(&self, event: ContainerEvent) {
        let callbacks: Vec<EventCallback> = {
            let subscriptions = self.subscriptions.read().await;
            subscriptions
                .values()
                .filter(|entry| entry.kind.is_none() || entry.kind == Some(event.kind))
                .map(|entry| entry.callback.clone())
                .collect()
        };

        trace!(kind = %event.kind, subject = %event.subject, hits = callbacks.len(), "发布事件");
        for callback in callbacks {
            callback(event.clone());
        }
    }

    /// 依次发布一批事件
    pub async fn publish_all(&self, events: Vec<ContainerEvent>) {
        for event in events {
            self.publish(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (EventCallback, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_in = log.clone();
        let callback: EventCallback = Arc::new(move |event: ContainerEvent| {
            log_in
                .lock()
                .unwrap()
                .push(format!("{}:{}", event.kind, event.subject));
        });
        (callback, log)
    }

    #[tokio::test]
    async fn test_subscribe_and_publish() {
        let bus = EventBus::new();
        let (callback, log) = recorder();
        bus.subscribe(None, callback).await;

        bus.publish(ContainerEvent::module_installed("blog")).await;
        bus.publish(ContainerEvent::feature_enabled("blog.post")).await;

        let entries = log.lock().unwrap().clone();
        assert_eq!(
            entries,
            vec!["module.installed:blog", "feature.enabled:blog.post"]
        );
    }

    #[tokio::test]
    async fn test_kind_filter() {
        let bus = EventBus::new();
        let (callback, log) = recorder();
        bus.subscribe(Some(ContainerEventKind::ModuleInstalled), callback)
            .await;

        bus.publish(ContainerEvent::module_installed("blog")).await;
        bus.publish(ContainerEvent::feature_enabled("blog.post")).await;

        let entries = log.lock().unwrap().clone();
        assert_eq!(entries, vec!["module.installed:blog"]);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = EventBus::new();
        let (callback, log) = recorder();
        let id = bus.subscribe(None, callback).await;

        assert!(bus.unsubscribe(&id).await);
        assert!(!bus.unsubscribe(&id).await);

        bus.publish(ContainerEvent::module_installed("blog")).await;
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_event_serialization() {
        let event = ContainerEvent::module_installed("blog");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("module_installed"));
        assert!(json.contains("blog"));
    }
}
