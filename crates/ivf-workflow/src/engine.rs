//! 工作流引擎
//!
//! 协调状态机、存储事务与审计发件箱。每个操作在单个存储事务内完成：
//! 成功则提交，任何错误都回滚，审计条目与业务修改同生共死。

use crate::embryo::EmbryoStatusPolicy;
use crate::state_machine::{CycleEvent, CycleStateMachine};
use chrono::Utc;
use ivf_core::store::{CycleStore, CycleTransaction, PatientDirectory};
use ivf_core::utils::{cycle_code, merge_notes, non_blank};
use ivf_core::{
    AuditEntry, Cycle, CycleDetail, CycleOutcome, Embryo, IvfError, PatientRef, Result, SetStageRequest,
    Stage, StartCycleRequest, TenantContext,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// 引擎运行参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSettings {
    pub embryo_status_policy: EmbryoStatusPolicy,
    /// 周期序号冲突时的最大尝试次数（含首次）
    pub max_cycle_number_attempts: u32,
    /// 首次 β-hCG 严格大于该值判为阳性
    pub positive_beta_threshold: f64,
    /// 单次受精批次的授精卵数上限
    pub max_eggs_per_fertilization: i32,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            embryo_status_policy: EmbryoStatusPolicy::Unrestricted,
            max_cycle_number_attempts: 3,
            positive_beta_threshold: 5.0,
            max_eggs_per_fertilization: 100,
        }
    }
}

/// 阶段变更的旁路通知（指标等），在事务提交后调用
pub trait TransitionListener: Send + Sync {
    fn stage_changed(&self, cycle_id: Uuid, from: Stage, to: Stage);
}

/// 一次已应用但尚未提交的阶段变更
#[derive(Debug, Clone, Copy)]
pub(crate) struct StageChange {
    pub cycle_id: Uuid,
    pub from: Stage,
    pub to: Stage,
}

/// IVF周期工作流引擎
pub struct CycleWorkflow {
    pub(crate) store: Arc<dyn CycleStore>,
    pub(crate) patients: Arc<dyn PatientDirectory>,
    pub(crate) state_machine: CycleStateMachine,
    pub(crate) settings: WorkflowSettings,
    listener: Option<Arc<dyn TransitionListener>>,
}

impl CycleWorkflow {
    /// 创建新的工作流引擎
    pub fn new(store: Arc<dyn CycleStore>, patients: Arc<dyn PatientDirectory>, settings: WorkflowSettings) -> Self {
        Self {
            store,
            patients,
            state_machine: CycleStateMachine::new(),
            settings,
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn TransitionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    pub fn state_machine(&self) -> &CycleStateMachine {
        &self.state_machine
    }

    /// 新建周期
    pub async fn start_cycle(&self, ctx: &TenantContext, req: StartCycleRequest) -> Result<Cycle> {
        let patient_id = req
            .patient_id
            .ok_or_else(|| IvfError::validation("patientId is required"))?;
        let cycle_type = non_blank(req.cycle_type.as_deref())
            .ok_or_else(|| IvfError::validation("cycleType is required"))?;
        req.start_date
            .ok_or_else(|| IvfError::validation("startDate is required"))?;

        let patient = self
            .patients
            .find_by_id(ctx.clinic_id, patient_id)
            .await?
            .ok_or_else(|| IvfError::not_found(format!("patient {}", patient_id)))?;

        let attempts = self.settings.max_cycle_number_attempts.max(1);
        let mut attempt = 1;
        loop {
            let mut tx = self.store.begin().await?;
            let result = self.insert_cycle(&mut *tx, ctx, &patient, &cycle_type, &req).await;
            match finish(tx, result).await {
                Err(IvfError::Conflict(msg)) if attempt < attempts => {
                    tracing::warn!(
                        "Cycle number conflict for patient {} (attempt {}/{}): {}",
                        patient.id,
                        attempt,
                        attempts,
                        msg
                    );
                    attempt += 1;
                }
                Ok(cycle) => {
                    tracing::info!("Started cycle {} ({}) for patient {}", cycle.id, cycle.cycle_code, patient.id);
                    return Ok(cycle);
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn insert_cycle(
        &self,
        tx: &mut dyn CycleTransaction,
        ctx: &TenantContext,
        patient: &PatientRef,
        cycle_type: &str,
        req: &StartCycleRequest,
    ) -> Result<Cycle> {
        let start_date = req
            .start_date
            .ok_or_else(|| IvfError::validation("startDate is required"))?;
        let cycle_number = tx.next_cycle_number(ctx.clinic_id, patient.id).await?;
        let now = Utc::now();

        let cycle = Cycle {
            id: Uuid::new_v4(),
            clinic_id: ctx.clinic_id,
            patient_id: patient.id,
            cycle_number,
            cycle_code: cycle_code(&patient.patient_code, cycle_number),
            cycle_type: cycle_type.to_string(),
            protocol: non_blank(req.protocol.as_deref()),
            start_date,
            expected_egg_retrieval: req.expected_egg_retrieval,
            actual_egg_retrieval: None,
            embryo_transfer_date: None,
            current_stage: Stage::Consultation,
            cycle_outcome: None,
            pregnancy_result: None,
            doctor_id: req.doctor_id,
            embryologist_id: req.embryologist_id,
            notes: non_blank(req.notes.as_deref()),
            created_by: ctx.user_id,
            created_at: now,
            updated_at: now,
        };

        tx.insert_cycle(&cycle).await?;
        tx.enqueue_audit(&AuditEntry::new(
            ctx,
            "cycle.created",
            "ivf_cycles",
            cycle.id,
            Some(serde_json::json!({
                "cycle_number": cycle.cycle_number,
                "cycle_code": cycle.cycle_code,
                "cycle_type": cycle.cycle_type,
                "current_stage": cycle.current_stage,
            })),
        ))
        .await?;

        Ok(cycle)
    }

    /// 显式设置阶段
    pub async fn set_stage(&self, ctx: &TenantContext, cycle_id: Uuid, req: SetStageRequest) -> Result<Cycle> {
        let target: Stage = req.stage.trim().parse()?;

        let mut tx = self.store.begin().await?;
        let result = self.apply_stage(&mut *tx, ctx, cycle_id, target, req.notes.as_deref()).await;
        let (cycle, change) = finish(tx, result).await?;
        self.notify(change);
        Ok(cycle)
    }

    async fn apply_stage(
        &self,
        tx: &mut dyn CycleTransaction,
        ctx: &TenantContext,
        cycle_id: Uuid,
        target: Stage,
        notes: Option<&str>,
    ) -> Result<(Cycle, Option<StageChange>)> {
        let mut cycle = load_cycle(tx, ctx, cycle_id).await?;
        if let Err(err) = self.state_machine.check_override(&cycle.current_stage, &target) {
            tracing::warn!("Rejected stage change for cycle {}: {}", cycle.id, err);
            return Err(err);
        }

        let from = cycle.current_stage;
        let merged = merge_notes(cycle.notes.as_deref(), notes);
        let noop = from == target && merged == cycle.notes;

        cycle.updated_at = Utc::now();
        if noop {
            tracing::debug!("Cycle {} already in stage {}", cycle.id, target);
            tx.update_cycle(&cycle).await?;
            return Ok((cycle, None));
        }

        cycle.current_stage = target;
        cycle.notes = merged;
        if target == Stage::Cancelled {
            cycle.cycle_outcome = Some(CycleOutcome::Cancelled);
        }
        tx.update_cycle(&cycle).await?;
        tx.enqueue_audit(&AuditEntry::new(
            ctx,
            "cycle.stage_changed",
            "ivf_cycles",
            cycle.id,
            Some(serde_json::json!({ "from": from, "to": target })),
        ))
        .await?;

        tracing::info!("Cycle {} stage set from {} to {}", cycle.id, from, target);
        let change = (from != target).then_some(StageChange { cycle_id: cycle.id, from, to: target });
        Ok((cycle, change))
    }

    /// 患者的全部周期，按序号升序
    pub async fn list_patient_cycles(&self, ctx: &TenantContext, patient_id: Uuid) -> Result<Vec<Cycle>> {
        self.patients
            .find_by_id(ctx.clinic_id, patient_id)
            .await?
            .ok_or_else(|| IvfError::not_found(format!("patient {}", patient_id)))?;

        let mut tx = self.store.begin().await?;
        let result = tx.list_cycles_for_patient(ctx.clinic_id, patient_id).await;
        let cycles = finish(tx, result).await?;
        tracing::debug!("Listed {} cycles for patient {}", cycles.len(), patient_id);
        Ok(cycles)
    }

    /// 周期详情
    pub async fn get_cycle_detail(&self, ctx: &TenantContext, cycle_id: Uuid) -> Result<CycleDetail> {
        let mut tx = self.store.begin().await?;
        let result = load_detail(&mut *tx, ctx, cycle_id).await;
        finish(tx, result).await
    }

    /// 周期内的胚胎，按编号升序
    pub async fn list_cycle_embryos(&self, ctx: &TenantContext, cycle_id: Uuid) -> Result<Vec<Embryo>> {
        let mut tx = self.store.begin().await?;
        let result = async {
            load_cycle(&mut *tx, ctx, cycle_id).await?;
            tx.list_embryos(cycle_id).await
        }
        .await;
        finish(tx, result).await
    }

    /// 通过转换表推进阶段；终止阶段没有表项，返回 `InvalidStateTransition`
    pub(crate) fn advance(&self, cycle: &mut Cycle, event: CycleEvent) -> Result<Option<StageChange>> {
        let from = cycle.current_stage;
        let to = match self.state_machine.transition(&from, &event) {
            Ok(to) => to,
            Err(err) => {
                tracing::warn!("Rejected {} for cycle {} in stage {}", event, cycle.id, from);
                return Err(err);
            }
        };

        cycle.current_stage = to;
        if from == to {
            return Ok(None);
        }
        tracing::info!("Cycle {} advanced from {} to {} on {}", cycle.id, from, to, event);
        Ok(Some(StageChange { cycle_id: cycle.id, from, to }))
    }

    pub(crate) fn notify(&self, change: Option<StageChange>) {
        if let (Some(listener), Some(change)) = (&self.listener, change) {
            listener.stage_changed(change.cycle_id, change.from, change.to);
        }
    }
}

/// 按租户读取周期；跨诊所与不存在同样返回 `NotFound`
pub(crate) async fn load_cycle(tx: &mut dyn CycleTransaction, ctx: &TenantContext, cycle_id: Uuid) -> Result<Cycle> {
    tx.find_cycle(ctx.clinic_id, cycle_id)
        .await?
        .ok_or_else(|| IvfError::not_found(format!("cycle {}", cycle_id)))
}

async fn load_detail(tx: &mut dyn CycleTransaction, ctx: &TenantContext, cycle_id: Uuid) -> Result<CycleDetail> {
    let cycle = load_cycle(tx, ctx, cycle_id).await?;
    Ok(CycleDetail {
        monitoring: tx.list_monitoring(cycle_id).await?,
        egg_retrieval: tx.latest_egg_retrieval(cycle_id).await?,
        sperm_samples: tx.list_sperm_samples(cycle_id).await?,
        fertilizations: tx.list_fertilizations(cycle_id).await?,
        embryos: tx.list_embryos(cycle_id).await?,
        transfers: tx.list_transfers(cycle_id).await?,
        cryopreservations: tx.list_cryopreservations(cycle_id).await?,
        outcome: tx.find_outcome(cycle_id).await?,
        cycle,
    })
}

/// 结束事务：成功提交，失败回滚并返回原始错误
pub(crate) async fn finish<T>(tx: Box<dyn CycleTransaction>, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!("Rollback failed after '{}': {}", err, rollback_err);
            }
            if matches!(err, IvfError::Database(_)) {
                tracing::error!("Transaction aborted: {}", err);
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_sequential_cycle_numbers() {
        let fx = Fixture::new().await;

        let first = fx.start().await;
        let second = fx.start().await;

        assert_eq!(first.cycle_number, 1);
        assert_eq!(first.cycle_code, "P0042-C01");
        assert_eq!(first.current_stage, Stage::Consultation);
        assert_eq!(second.cycle_number, 2);
        assert_eq!(second.cycle_code, "P0042-C02");

        let cycles = fx.workflow.list_patient_cycles(&fx.ctx, fx.patient_id).await.unwrap();
        assert_eq!(cycles.iter().map(|c| c.cycle_number).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_start_cycle_validation() {
        let fx = Fixture::new().await;

        let missing_type = StartCycleRequest {
            patient_id: Some(fx.patient_id),
            cycle_type: Some("   ".to_string()),
            start_date: Some(date(2026, 3, 1)),
            ..Default::default()
        };
        let err = fx.workflow.start_cycle(&fx.ctx, missing_type).await.unwrap_err();
        assert!(matches!(err, IvfError::Validation(_)));

        let missing_date = StartCycleRequest {
            patient_id: Some(fx.patient_id),
            cycle_type: Some("ivf".to_string()),
            ..Default::default()
        };
        let err = fx.workflow.start_cycle(&fx.ctx, missing_date).await.unwrap_err();
        assert!(matches!(err, IvfError::Validation(_)));

        assert!(fx.store.audit_entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_cycle_unknown_or_foreign_patient() {
        let fx = Fixture::new().await;

        let mut req = fx.start_request();
        req.patient_id = Some(Uuid::new_v4());
        let err = fx.workflow.start_cycle(&fx.ctx, req).await.unwrap_err();
        assert!(matches!(err, IvfError::NotFound(_)));

        let other_clinic = TenantContext::new(Uuid::new_v4(), fx.ctx.user_id);
        let err = fx.workflow.start_cycle(&other_clinic, fx.start_request()).await.unwrap_err();
        assert!(matches!(err, IvfError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_start_cycle_retries_number_conflicts() {
        let fx = Fixture::new().await;

        fx.store.inject_cycle_conflicts(2);
        let cycle = fx.start().await;
        assert_eq!(cycle.cycle_number, 1);

        fx.store.inject_cycle_conflicts(3);
        let err = fx.workflow.start_cycle(&fx.ctx, fx.start_request()).await.unwrap_err();
        assert!(matches!(err, IvfError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_start_cycle_writes_audit_entry() {
        let fx = Fixture::new().await;
        let cycle = fx.start().await;

        let audit = fx.store.audit_entries().await;
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, "cycle.created");
        assert_eq!(audit[0].entity_table, "ivf_cycles");
        assert_eq!(audit[0].entity_id, cycle.id);
        assert_eq!(audit[0].user_id, fx.ctx.user_id);
    }

    #[tokio::test]
    async fn test_set_stage_merges_notes_and_audits() {
        let fx = Fixture::new().await;
        let cycle = fx.start().await;

        let updated = fx
            .workflow
            .set_stage(
                &fx.ctx,
                cycle.id,
                SetStageRequest { stage: "stimulation".to_string(), notes: Some("Start FSH".to_string()) },
            )
            .await
            .unwrap();
        assert_eq!(updated.current_stage, Stage::Stimulation);
        assert_eq!(updated.notes.as_deref(), Some("Start FSH"));

        let updated = fx
            .workflow
            .set_stage(
                &fx.ctx,
                cycle.id,
                SetStageRequest { stage: "monitoring".to_string(), notes: Some("Day 5 scan".to_string()) },
            )
            .await
            .unwrap();
        assert_eq!(updated.notes.as_deref(), Some("Start FSH\nDay 5 scan"));

        let actions: Vec<String> = fx.store.audit_entries().await.into_iter().map(|a| a.action).collect();
        assert_eq!(actions, vec!["cycle.created", "cycle.stage_changed", "cycle.stage_changed"]);
    }

    #[tokio::test]
    async fn test_set_stage_same_target_only_touches_timestamp() {
        let fx = Fixture::new().await;
        let cycle = fx.start().await;

        let first = fx.set_stage(cycle.id, "stimulation").await.unwrap();
        let second = fx.set_stage(cycle.id, "stimulation").await.unwrap();

        assert_eq!(second.current_stage, first.current_stage);
        assert_eq!(second.notes, first.notes);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(fx.store.audit_entries().await.len(), 2);
    }

    #[tokio::test]
    async fn test_set_stage_rejects_unknown_stage() {
        let fx = Fixture::new().await;
        let cycle = fx.start().await;

        let err = fx.set_stage(cycle.id, "transfer").await.unwrap_err();
        assert!(matches!(err, IvfError::Validation(_)));
    }

    #[tokio::test]
    async fn test_cancel_sets_outcome_and_is_terminal() {
        let fx = Fixture::new().await;
        let cycle = fx.start().await;

        let cancelled = fx.set_stage(cycle.id, "cancelled").await.unwrap();
        assert_eq!(cancelled.current_stage, Stage::Cancelled);
        assert_eq!(cancelled.cycle_outcome, Some(CycleOutcome::Cancelled));

        let err = fx.set_stage(cycle.id, "consultation").await.unwrap_err();
        assert!(matches!(err, IvfError::InvalidStateTransition { .. }));
        assert!(fx.set_stage(cycle.id, "cancelled").await.is_ok());
    }

    #[tokio::test]
    async fn test_cross_clinic_cycle_is_not_found() {
        let fx = Fixture::new().await;
        let cycle = fx.start().await;

        let other_clinic = TenantContext::new(Uuid::new_v4(), fx.ctx.user_id);
        let err = fx.workflow.get_cycle_detail(&other_clinic, cycle.id).await.unwrap_err();
        assert!(matches!(err, IvfError::NotFound(_)));
    }

    #[derive(Default)]
    struct RecordingListener {
        changes: Mutex<Vec<(Stage, Stage)>>,
    }

    impl TransitionListener for RecordingListener {
        fn stage_changed(&self, _cycle_id: Uuid, from: Stage, to: Stage) {
            self.changes.lock().unwrap().push((from, to));
        }
    }

    #[tokio::test]
    async fn test_listener_sees_committed_changes_only() {
        let listener = Arc::new(RecordingListener::default());
        let fx = Fixture::with_listener(listener.clone()).await;
        let cycle = fx.start().await;

        fx.set_stage(cycle.id, "stimulation").await.unwrap();
        fx.set_stage(cycle.id, "stimulation").await.unwrap();
        fx.set_stage(cycle.id, "cancelled").await.unwrap();
        assert!(fx.set_stage(cycle.id, "waiting").await.is_err());

        let changes = listener.changes.lock().unwrap().clone();
        assert_eq!(
            changes,
            vec![(Stage::Consultation, Stage::Stimulation), (Stage::Stimulation, Stage::Cancelled)]
        );
    }
}
