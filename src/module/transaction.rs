//! 生命周期事务
//!
//! [`ModulizeTransaction`] 为一次生命周期批次收集有序的
//! （提交动作, 回滚动作）对，提供全有或全无的语义：
//!
//! - 批次内的守卫全部通过、钩子全部成功后调用 [`complete`]，
//!   随后 [`finish`] 依登记顺序执行全部提交动作；
//! - 任一提交动作失败时，按登记的**逆序**执行回滚动作，再向上抛错；
//! - 未调用 `complete` 即 `finish`（守卫或钩子失败）时，不执行任何
//!   提交动作，同样按逆序执行回滚动作，撤销批次内已就地发生的
//!   状态变更 —— 持久化回滚动作依赖提供者的幂等性，对从未写入的
//!   记录执行逆操作是无害的。
//!
//! 事务对象仅在单次编排操作内存活，不持久化。
//!
//! [`complete`]: ModulizeTransaction::complete
//! [`finish`]: ModulizeTransaction::finish

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::utils::{generate_id, Result};

/// 事务动作返回的装箱 Future
pub type ActionFuture = BoxFuture<'static, Result<()>>;

/// 事务动作：一次性调用，产出装箱 Future
pub type TransactionAction = Box<dyn FnOnce() -> ActionFuture + Send>;

/// 一对提交/回滚动作
struct TransactionStep {
    /// 动作标签（日志用）
    label: String,
    /// 提交动作
    commit: TransactionAction,
    /// 回滚动作
    rollback: TransactionAction,
}

/// 生命周期事务
pub struct ModulizeTransaction {
    id: String,
    steps: Vec<TransactionStep>,
    completed: bool,
}

impl ModulizeTransaction {
    /// 创建空事务
    pub fn new() -> Self {
        Self {
            id: generate_id(),
            steps: Vec::new(),
            completed: false,
        }
    }

    /// 事务 ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 登记一对（提交, 回滚）动作
    pub fn enlist(
        &mut self,
        label: impl Into<String>,
        commit: TransactionAction,
        rollback: TransactionAction,
    ) {
        let label = label.into();
        debug!(transaction_id = %self.id, step = %label, "事务步骤已登记");
        self.steps.push(TransactionStep {
            label,
            commit,
            rollback,
        });
    }

    /// 标记批次成功：守卫全部通过且钩子全部成功后调用
    pub fn complete(&mut self) {
        self.completed = true;
    }

    /// 是否已标记完成
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// 已登记的步骤数
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// 是否没有任何步骤
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// 终结事务
    ///
    /// 已完成：依登记顺序执行提交动作；第 i 个提交失败时按逆序执行
    /// 全部回滚动作，然后返回该错误。
    /// 未完成：不执行任何提交，按逆序执行全部回滚动作后返回 Ok。
    pub async fn finish(mut self) -> Result<()> {
        let id = self.id.clone();
        let steps = std::mem::take(&mut self.steps);

        if !self.completed {
            if !steps.is_empty() {
                warn!(transaction_id = %id, steps = steps.len(), "事务未完成，逆序回滚");
                Self::run_rollbacks(&id, steps).await;
            }
            return Ok(());
        }

        let mut iter = steps.into_iter();
        let mut walked: Vec<TransactionStep> = Vec::new();
        let mut failure = None;

        for step in iter.by_ref() {
            let TransactionStep {
                label,
                commit,
                rollback,
            } = step;
            let outcome = commit().await;
            walked.push(TransactionStep {
                label: label.clone(),
                commit: Box::new(|| Box::pin(async { Ok(()) })),
                rollback,
            });
            match outcome {
                Ok(()) => {
                    debug!(transaction_id = %id, step = %label, "提交动作完成");
                }
                Err(e) => {
                    warn!(transaction_id = %id, step = %label, error = %e, "提交动作失败，逆序回滚");
                    failure = Some(e);
                    break;
                }
            }
        }

        match failure {
            None => Ok(()),
            Some(e) => {
                // 其后未执行的提交不再运行，但其步骤的就地变更一并回滚；
                // 幂等的持久化逆操作保证对未写入记录的回滚无害
                walked.extend(iter);
                Self::run_rollbacks(&id, walked).await;
                Err(e)
            }
        }
    }

    /// 按逆序执行回滚动作，失败仅记录日志
    async fn run_rollbacks(id: &str, steps: Vec<TransactionStep>) {
        for step in steps.into_iter().rev() {
            if let Err(e) = (step.rollback)().await {
                warn!(transaction_id = %id, step = %step.label, error = %e, "回滚动作失败");
            } else {
                debug!(transaction_id = %id, step = %step.label, "回滚动作完成");
            }
        }
    }
}

impl Default for ModulizeTransaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ModulizeTransaction {
    fn drop(&mut self) {
        if !self.steps.is_empty() {
            // finish 会清空步骤；走到这里说明事务被直接丢弃
            warn!(transaction_id = %self.id, steps = self.steps.len(), "事务未经 finish 即被丢弃");
        }
    }
}
