//! 临床事件记录：监测、取卵、精液样本、受精

use crate::engine::{finish, load_cycle, CycleWorkflow, StageChange};
use crate::state_machine::CycleEvent;
use chrono::Utc;
use ivf_core::store::CycleTransaction;
use ivf_core::utils::{fertilization_rate, non_blank, total_eggs};
use ivf_core::{
    AuditEntry, EggRetrieval, EggRetrievalRequest, Embryo, EmbryoGrading, EmbryoStatus, Fertilization,
    FertilizationRequest, FertilizationResult, IvfError, MonitoringEntry, MonitoringRequest, Result,
    SpermSample, SpermSampleRequest, TenantContext,
};
use uuid::Uuid;

impl CycleWorkflow {
    /// 记录促排卵监测；促排卵阶段的首条记录推进到监测阶段
    pub async fn record_monitoring(
        &self,
        ctx: &TenantContext,
        cycle_id: Uuid,
        req: MonitoringRequest,
    ) -> Result<MonitoringEntry> {
        let mut tx = self.store.begin().await?;
        let result = self.insert_monitoring(&mut *tx, ctx, cycle_id, req).await;
        let (entry, change) = finish(tx, result).await?;
        self.notify(change);
        Ok(entry)
    }

    async fn insert_monitoring(
        &self,
        tx: &mut dyn CycleTransaction,
        ctx: &TenantContext,
        cycle_id: Uuid,
        req: MonitoringRequest,
    ) -> Result<(MonitoringEntry, Option<StageChange>)> {
        let mut cycle = load_cycle(tx, ctx, cycle_id).await?;
        let change = self.advance(&mut cycle, CycleEvent::MonitoringRecorded)?;
        let now = Utc::now();

        let entry = MonitoringEntry {
            id: Uuid::new_v4(),
            cycle_id,
            monitoring_date: req.monitoring_date.unwrap_or_else(|| now.date_naive()),
            stimulation_day: req.stimulation_day,
            estradiol_pg_ml: req.estradiol_pg_ml,
            lh_iu_l: req.lh_iu_l,
            progesterone_ng_ml: req.progesterone_ng_ml,
            fsh_iu_l: req.fsh_iu_l,
            endometrial_thickness_mm: req.endometrial_thickness_mm,
            right_ovary_follicles: req.right_ovary_follicles,
            left_ovary_follicles: req.left_ovary_follicles,
            medications: req.medications,
            next_visit: req.next_visit,
            notes: non_blank(req.notes.as_deref()),
            recorded_by: ctx.user_id,
            created_at: now,
        };
        tx.insert_monitoring(&entry).await?;

        if change.is_some() {
            cycle.updated_at = now;
            tx.update_cycle(&cycle).await?;
        }
        tx.enqueue_audit(&AuditEntry::new(
            ctx,
            "monitoring.recorded",
            "stimulation_monitoring",
            entry.id,
            Some(serde_json::json!({
                "cycle_id": cycle_id,
                "monitoring_date": entry.monitoring_date,
                "current_stage": cycle.current_stage,
            })),
        ))
        .await?;

        Ok((entry, change))
    }

    /// 记录取卵：计算总数，推进到受精阶段并写入实际取卵日期
    pub async fn record_egg_retrieval(
        &self,
        ctx: &TenantContext,
        cycle_id: Uuid,
        req: EggRetrievalRequest,
    ) -> Result<EggRetrieval> {
        let mut tx = self.store.begin().await?;
        let result = self.insert_egg_retrieval(&mut *tx, ctx, cycle_id, req).await;
        let (retrieval, change) = finish(tx, result).await?;
        self.notify(change);
        Ok(retrieval)
    }

    async fn insert_egg_retrieval(
        &self,
        tx: &mut dyn CycleTransaction,
        ctx: &TenantContext,
        cycle_id: Uuid,
        req: EggRetrievalRequest,
    ) -> Result<(EggRetrieval, Option<StageChange>)> {
        for (name, value) in [
            ("rightOvaryEggs", req.right_ovary_eggs),
            ("leftOvaryEggs", req.left_ovary_eggs),
            ("matureEggs", req.mature_eggs),
        ] {
            if value.is_some_and(|v| v < 0) {
                return Err(IvfError::validation(format!("{} must not be negative", name)));
            }
        }

        let mut cycle = load_cycle(tx, ctx, cycle_id).await?;
        if tx.latest_egg_retrieval(cycle_id).await?.is_some() {
            return Err(IvfError::Conflict(format!("egg retrieval already recorded for cycle {}", cycle_id)));
        }
        let change = self.advance(&mut cycle, CycleEvent::EggRetrievalRecorded)?;
        let now = Utc::now();

        let retrieval = EggRetrieval {
            id: Uuid::new_v4(),
            cycle_id,
            retrieval_date: req.retrieval_date.unwrap_or_else(|| now.date_naive()),
            right_ovary_eggs: req.right_ovary_eggs.unwrap_or(0),
            left_ovary_eggs: req.left_ovary_eggs.unwrap_or(0),
            total_eggs_retrieved: total_eggs(req.right_ovary_eggs, req.left_ovary_eggs),
            mature_eggs: req.mature_eggs,
            anesthesia_type: non_blank(req.anesthesia_type.as_deref()),
            complications: non_blank(req.complications.as_deref()),
            performed_by: req.performed_by,
            notes: non_blank(req.notes.as_deref()),
            created_at: now,
        };
        tx.insert_egg_retrieval(&retrieval).await?;

        cycle.actual_egg_retrieval = Some(retrieval.retrieval_date);
        cycle.updated_at = now;
        tx.update_cycle(&cycle).await?;
        tx.enqueue_audit(&AuditEntry::new(
            ctx,
            "egg_retrieval.recorded",
            "egg_retrievals",
            retrieval.id,
            Some(serde_json::json!({
                "cycle_id": cycle_id,
                "total_eggs_retrieved": retrieval.total_eggs_retrieved,
                "current_stage": cycle.current_stage,
            })),
        ))
        .await?;

        Ok((retrieval, change))
    }

    /// 记录精液样本，不影响阶段
    pub async fn record_sperm_sample(
        &self,
        ctx: &TenantContext,
        cycle_id: Uuid,
        req: SpermSampleRequest,
    ) -> Result<SpermSample> {
        let mut tx = self.store.begin().await?;
        let result = insert_sperm_sample(&mut *tx, ctx, cycle_id, req).await;
        let sample = finish(tx, result).await?;
        tracing::info!("Recorded sperm sample {} for cycle {}", sample.id, cycle_id);
        Ok(sample)
    }

    /// 记录受精：生成 2PN 数量的胚胎并推进到胚胎培养阶段
    pub async fn record_fertilization(
        &self,
        ctx: &TenantContext,
        cycle_id: Uuid,
        req: FertilizationRequest,
    ) -> Result<FertilizationResult> {
        if req.eggs_inseminated < 0 || req.two_pn_normal < 0 {
            return Err(IvfError::validation("egg and 2PN counts must not be negative"));
        }
        if req.two_pn_normal > req.eggs_inseminated {
            return Err(IvfError::validation("twoPnNormal cannot exceed eggsInseminated"));
        }
        let cap = self.settings.max_eggs_per_fertilization;
        if req.eggs_inseminated > cap {
            return Err(IvfError::validation(format!("eggsInseminated cannot exceed {}", cap)));
        }

        let mut tx = self.store.begin().await?;
        let result = self.insert_fertilization(&mut *tx, ctx, cycle_id, req).await;
        let (outcome, change) = finish(tx, result).await?;
        self.notify(change);
        tracing::info!(
            "Recorded fertilization {} for cycle {} with {} embryos",
            outcome.fertilization.id,
            cycle_id,
            outcome.embryos.len()
        );
        Ok(outcome)
    }

    async fn insert_fertilization(
        &self,
        tx: &mut dyn CycleTransaction,
        ctx: &TenantContext,
        cycle_id: Uuid,
        req: FertilizationRequest,
    ) -> Result<(FertilizationResult, Option<StageChange>)> {
        let mut cycle = load_cycle(tx, ctx, cycle_id).await?;
        let change = self.advance(&mut cycle, CycleEvent::FertilizationRecorded)?;

        let egg_retrieval_id = match req.egg_retrieval_id {
            Some(id) => Some(
                tx.find_egg_retrieval(cycle_id, id)
                    .await?
                    .ok_or_else(|| IvfError::not_found(format!("egg retrieval {}", id)))?
                    .id,
            ),
            None => tx.latest_egg_retrieval(cycle_id).await?.map(|r| r.id),
        };
        if let Some(id) = req.sperm_sample_id {
            tx.find_sperm_sample(cycle_id, id)
                .await?
                .ok_or_else(|| IvfError::not_found(format!("sperm sample {}", id)))?;
        }

        let now = Utc::now();
        let fertilization = Fertilization {
            id: Uuid::new_v4(),
            cycle_id,
            egg_retrieval_id,
            sperm_sample_id: req.sperm_sample_id,
            fertilization_date: req.fertilization_date.unwrap_or_else(|| now.date_naive()),
            method: non_blank(req.method.as_deref()),
            eggs_inseminated: req.eggs_inseminated,
            two_pn_normal: req.two_pn_normal,
            one_pn: req.one_pn,
            three_pn: req.three_pn,
            degenerated: req.degenerated,
            fertilization_rate: fertilization_rate(req.eggs_inseminated, req.two_pn_normal),
            notes: non_blank(req.notes.as_deref()),
            created_at: now,
        };
        tx.insert_fertilization(&fertilization).await?;

        // 追加批次从已有最大编号之后继续编号
        let first_number = tx.max_embryo_number(cycle_id).await? + 1;
        let end = first_number
            .checked_add(fertilization.two_pn_normal)
            .ok_or_else(|| IvfError::validation("embryo numbers exhausted for this cycle"))?;
        let mut embryos = Vec::with_capacity(fertilization.two_pn_normal as usize);
        for embryo_number in first_number..end {
            let embryo = Embryo {
                id: Uuid::new_v4(),
                clinic_id: ctx.clinic_id,
                cycle_id,
                fertilization_id: fertilization.id,
                embryo_number,
                status: EmbryoStatus::Developing,
                grading: EmbryoGrading::default(),
                transfer_date: None,
                freeze_date: None,
                discard_date: None,
                discard_reason: None,
                notes: None,
                created_at: now,
                updated_at: now,
            };
            tx.insert_embryo(&embryo).await?;
            embryos.push(embryo);
        }

        cycle.updated_at = now;
        tx.update_cycle(&cycle).await?;
        tx.enqueue_audit(&AuditEntry::new(
            ctx,
            "fertilization.recorded",
            "fertilizations",
            fertilization.id,
            Some(serde_json::json!({
                "cycle_id": cycle_id,
                "fertilization_rate": fertilization.fertilization_rate,
                "embryos_created": embryos.len(),
                "current_stage": cycle.current_stage,
            })),
        ))
        .await?;

        let result = FertilizationResult {
            fertilization,
            embryos,
            current_stage: cycle.current_stage,
        };
        Ok((result, change))
    }
}

async fn insert_sperm_sample(
    tx: &mut dyn CycleTransaction,
    ctx: &TenantContext,
    cycle_id: Uuid,
    req: SpermSampleRequest,
) -> Result<SpermSample> {
    load_cycle(tx, ctx, cycle_id).await?;
    let now = Utc::now();

    let sample = SpermSample {
        id: Uuid::new_v4(),
        cycle_id,
        collection_date: req.collection_date.unwrap_or_else(|| now.date_naive()),
        sample_source: non_blank(req.sample_source.as_deref()),
        volume_ml: req.volume_ml,
        concentration_m_per_ml: req.concentration_m_per_ml,
        total_motility_pct: req.total_motility_pct,
        progressive_motility_pct: req.progressive_motility_pct,
        normal_morphology_pct: req.normal_morphology_pct,
        preparation_method: non_blank(req.preparation_method.as_deref()),
        notes: non_blank(req.notes.as_deref()),
        created_at: now,
    };
    tx.insert_sperm_sample(&sample).await?;
    tx.enqueue_audit(&AuditEntry::new(
        ctx,
        "sperm_sample.recorded",
        "sperm_samples",
        sample.id,
        Some(serde_json::json!({ "cycle_id": cycle_id })),
    ))
    .await?;

    Ok(sample)
}
