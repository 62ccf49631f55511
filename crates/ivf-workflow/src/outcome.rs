//! 妊娠结局：β-hCG 倍增时间、阴阳性判定、周期结束

use crate::engine::{finish, load_cycle, CycleWorkflow, StageChange};
use crate::state_machine::CycleEvent;
use chrono::Utc;
use ivf_core::store::CycleTransaction;
use ivf_core::utils::{beta_doubling_time_hours, classify_beta, non_blank};
use ivf_core::{
    AuditEntry, BetaReading, CycleOutcome, IvfError, OutcomeRequest, PregnancyOutcome, Result, TenantContext,
};
use uuid::Uuid;

/// 两次检测都有值和日期时才计算倍增时间
fn doubling_time(req: &OutcomeRequest) -> Option<f64> {
    let first = BetaReading {
        value: req.first_beta_value?,
        date: req.first_beta_date?,
    };
    let second = BetaReading {
        value: req.second_beta_value?,
        date: req.second_beta_date?,
    };
    beta_doubling_time_hours(&first, &second)
}

impl CycleWorkflow {
    /// 记录妊娠结局并结束周期
    pub async fn record_outcome(
        &self,
        ctx: &TenantContext,
        cycle_id: Uuid,
        req: OutcomeRequest,
    ) -> Result<PregnancyOutcome> {
        if req.birth_weights_grams.iter().any(|w| *w <= 0) {
            return Err(IvfError::validation("birth weights must be positive"));
        }

        let mut tx = self.store.begin().await?;
        let result = self.insert_outcome(&mut *tx, ctx, cycle_id, req).await;
        let (outcome, change) = finish(tx, result).await?;
        self.notify(change);
        tracing::info!(
            "Cycle {} completed with outcome {}",
            cycle_id,
            outcome.cycle_outcome.as_str()
        );
        Ok(outcome)
    }

    async fn insert_outcome(
        &self,
        tx: &mut dyn CycleTransaction,
        ctx: &TenantContext,
        cycle_id: Uuid,
        req: OutcomeRequest,
    ) -> Result<(PregnancyOutcome, Option<StageChange>)> {
        let mut cycle = load_cycle(tx, ctx, cycle_id).await?;
        let change = self.advance(&mut cycle, CycleEvent::OutcomeRecorded)?;

        let cycle_outcome = classify_beta(req.first_beta_value, self.settings.positive_beta_threshold);
        let now = Utc::now();

        let outcome = PregnancyOutcome {
            id: Uuid::new_v4(),
            cycle_id,
            beta_doubling_time_hours: doubling_time(&req),
            first_beta_value: req.first_beta_value,
            first_beta_date: req.first_beta_date,
            second_beta_value: req.second_beta_value,
            second_beta_date: req.second_beta_date,
            cycle_outcome,
            clinical_pregnancy: req.clinical_pregnancy,
            gestational_sacs: req.gestational_sacs,
            fetal_heartbeats: req.fetal_heartbeats,
            ultrasound_date: req.ultrasound_date,
            delivery_date: req.delivery_date,
            delivery_type: non_blank(req.delivery_type.as_deref()),
            live_births: req.live_births,
            birth_weights_grams: req.birth_weights_grams,
            notes: non_blank(req.notes.as_deref()),
            created_at: now,
        };
        tx.insert_outcome(&outcome).await?;

        cycle.cycle_outcome = Some(cycle_outcome);
        cycle.pregnancy_result = Some(cycle_outcome == CycleOutcome::Positive);
        cycle.updated_at = now;
        tx.update_cycle(&cycle).await?;
        tx.enqueue_audit(&AuditEntry::new(
            ctx,
            "pregnancy_outcome.recorded",
            "pregnancy_outcomes",
            outcome.id,
            Some(serde_json::json!({
                "cycle_id": cycle_id,
                "cycle_outcome": cycle_outcome,
                "beta_doubling_time_hours": outcome.beta_doubling_time_hours,
            })),
        ))
        .await?;

        Ok((outcome, change))
    }
}
