//! 工作流指标
//!
//! 统计各业务操作的结果以及周期阶段变更，以Prometheus文本格式导出。

use anyhow::{Context, Result};
use ivf_core::{IvfError, Stage};
use ivf_workflow::TransitionListener;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::time::Instant;
use uuid::Uuid;

/// 工作流指标集合
#[derive(Clone)]
pub struct WorkflowMetrics {
    registry: Registry,
    /// 按操作和结果计数
    operations_total: IntCounterVec,
    /// 按目标阶段计数
    stage_transitions_total: IntCounterVec,
    uptime_seconds: IntGauge,
    started_at: Instant,
}

/// 操作结果标签
pub fn outcome_label<T>(result: &ivf_core::Result<T>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(IvfError::Validation(_)) => "validation",
        Err(IvfError::NotFound(_)) => "not_found",
        Err(IvfError::Conflict(_)) => "conflict",
        Err(IvfError::InvalidStateTransition { .. }) => "invalid_transition",
        Err(_) => "error",
    }
}

impl WorkflowMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let operations_total = IntCounterVec::new(
            Opts::new("ivf_operations_total", "Workflow operations by name and result"),
            &["operation", "result"],
        )?;
        let stage_transitions_total = IntCounterVec::new(
            Opts::new("ivf_stage_transitions_total", "Committed cycle stage changes by target stage"),
            &["stage"],
        )?;
        let uptime_seconds = IntGauge::with_opts(Opts::new("ivf_uptime_seconds", "Seconds since process start"))?;

        registry.register(Box::new(operations_total.clone()))?;
        registry.register(Box::new(stage_transitions_total.clone()))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry,
            operations_total,
            stage_transitions_total,
            uptime_seconds,
            started_at: Instant::now(),
        })
    }

    /// 记录一次操作结果
    pub fn record<T>(&self, operation: &str, result: &ivf_core::Result<T>) {
        self.operations_total
            .with_label_values(&[operation, outcome_label(result)])
            .inc();
    }

    pub fn operation_count(&self, operation: &str, outcome: &str) -> u64 {
        self.operations_total.with_label_values(&[operation, outcome]).get()
    }

    pub fn transition_count(&self, to: Stage) -> u64 {
        self.stage_transitions_total.with_label_values(&[to.as_str()]).get()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// 导出Prometheus文本格式
    pub fn export(&self) -> Result<String> {
        self.uptime_seconds.set(self.uptime_secs() as i64);

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .context("Failed to encode metrics")?;
        String::from_utf8(buffer).context("Metrics output is not UTF-8")
    }
}

impl TransitionListener for WorkflowMetrics {
    fn stage_changed(&self, cycle_id: Uuid, from: Stage, to: Stage) {
        tracing::debug!("Cycle {} moved from {} to {}", cycle_id, from, to);
        self.stage_transitions_total.with_label_values(&[to.as_str()]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_results_are_labelled() {
        let metrics = WorkflowMetrics::new().unwrap();
        metrics.record("start_cycle", &Ok::<_, IvfError>(()));
        metrics.record::<()>("start_cycle", &Err(IvfError::validation("patientId is required")));
        metrics.record::<()>("start_cycle", &Err(IvfError::validation("cycleType is required")));

        assert_eq!(metrics.operation_count("start_cycle", "ok"), 1);
        assert_eq!(metrics.operation_count("start_cycle", "validation"), 2);
        assert_eq!(metrics.operation_count("start_cycle", "conflict"), 0);
    }

    #[test]
    fn test_transitions_are_exported() {
        let metrics = WorkflowMetrics::new().unwrap();
        metrics.stage_changed(Uuid::new_v4(), Stage::Stimulation, Stage::Monitoring);

        metrics.stage_changed(Uuid::new_v4(), Stage::Consultation, Stage::Monitoring);

        assert_eq!(metrics.transition_count(Stage::Monitoring), 2);
        assert_eq!(metrics.transition_count(Stage::Waiting), 0);
        let text = metrics.export().unwrap();
        assert!(text.contains("ivf_stage_transitions_total"));
        assert!(text.contains("stage=\"monitoring\""));
        assert!(text.contains("ivf_uptime_seconds"));
    }
}
