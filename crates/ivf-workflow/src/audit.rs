//! 审计投递
//!
//! 业务操作只把审计条目写入发件箱；`AuditRelay` 定期取出未投递的条目
//! 按写入顺序交给 `AuditSink`。投递失败不影响已提交的业务数据，下次重试。

use crate::engine::finish;
use async_trait::async_trait;
use chrono::Utc;
use ivf_core::store::{CycleStore, CycleTransaction};
use ivf_core::{AuditEntry, Result};
use std::sync::Arc;
use std::time::Duration;

/// 审计日志接收端
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn deliver(&self, entry: &AuditEntry) -> Result<()>;
}

/// 以结构化日志形式输出审计条目
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn deliver(&self, entry: &AuditEntry) -> Result<()> {
        tracing::info!(
            target: "ivf::audit",
            clinic_id = %entry.clinic_id,
            user_id = %entry.user_id,
            action = %entry.action,
            entity_table = %entry.entity_table,
            entity_id = %entry.entity_id,
            changes = ?entry.changes,
            "audit"
        );
        Ok(())
    }
}

/// 发件箱投递器
pub struct AuditRelay {
    store: Arc<dyn CycleStore>,
    sink: Arc<dyn AuditSink>,
    batch_size: i64,
}

impl AuditRelay {
    pub fn new(store: Arc<dyn CycleStore>, sink: Arc<dyn AuditSink>, batch_size: i64) -> Self {
        Self {
            store,
            sink,
            batch_size: batch_size.max(1),
        }
    }

    /// 投递一批未投递条目，返回成功投递的数量
    ///
    /// 遇到第一次失败即停止，保证条目按顺序到达接收端。
    pub async fn relay_once(&self) -> Result<usize> {
        let mut tx = self.store.begin().await?;
        let result = self.deliver_pending(&mut *tx).await;
        finish(tx, result).await
    }

    async fn deliver_pending(&self, tx: &mut dyn CycleTransaction) -> Result<usize> {
        let pending = tx.pending_audit(self.batch_size).await?;

        let mut delivered = Vec::with_capacity(pending.len());
        for entry in &pending {
            if let Err(e) = self.sink.deliver(entry).await {
                tracing::warn!("Audit delivery failed for entry {}: {}", entry.id, e);
                break;
            }
            delivered.push(entry.id);
        }

        tx.mark_audit_delivered(&delivered, Utc::now()).await?;
        Ok(delivered.len())
    }

    /// 按固定间隔持续投递，直到任务被取消
    pub async fn run(self, interval: Duration) {
        tracing::info!("Audit relay started (interval={:?}, batch_size={})", interval, self.batch_size);

        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            // 一批满额时立即继续，直到积压清空
            loop {
                match self.relay_once().await {
                    Ok(n) if n as i64 == self.batch_size => continue,
                    Ok(n) => {
                        if n > 0 {
                            tracing::debug!("Delivered {} audit entries", n);
                        }
                        break;
                    }
                    Err(e) => {
                        tracing::error!("Audit relay error: {}", e);
                        break;
                    }
                }
            }
        }
    }
}
