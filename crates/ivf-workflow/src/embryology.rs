//! 胚胎操作：逐日评分、状态变更、批量移植与冷冻

use crate::embryo::{apply_development, apply_status};
use crate::engine::{finish, load_cycle, CycleWorkflow, StageChange};
use crate::state_machine::CycleEvent;
use chrono::Utc;
use ivf_core::store::CycleTransaction;
use ivf_core::utils::{merge_notes, non_blank};
use ivf_core::{
    AuditEntry, CryopreservationRecord, DevelopmentRequest, Embryo, EmbryoStatus, EmbryoStatusRequest,
    EmbryoTransfer, FreezeRequest, FrozenSpecimen, IvfError, Result, SpecimenType, TenantContext,
    TransferRequest,
};
use std::collections::HashSet;
use uuid::Uuid;

impl CycleWorkflow {
    /// 更新某一天的发育评分，只写入提供的字段
    pub async fn update_embryo_development(
        &self,
        ctx: &TenantContext,
        embryo_id: Uuid,
        req: DevelopmentRequest,
    ) -> Result<Embryo> {
        let mut tx = self.store.begin().await?;
        let result = update_development(&mut *tx, ctx, embryo_id, req).await;
        let embryo = finish(tx, result).await?;
        tracing::info!("Updated development of embryo {}", embryo.id);
        Ok(embryo)
    }

    /// 设置胚胎状态，同时写入对应日期
    pub async fn set_embryo_status(
        &self,
        ctx: &TenantContext,
        embryo_id: Uuid,
        req: EmbryoStatusRequest,
    ) -> Result<Embryo> {
        let status: EmbryoStatus = req.status.trim().parse()?;

        let mut tx = self.store.begin().await?;
        let result = self.update_status(&mut *tx, ctx, embryo_id, status, req).await;
        let embryo = finish(tx, result).await?;
        tracing::info!("Embryo {} status set to {}", embryo.id, embryo.status);
        Ok(embryo)
    }

    async fn update_status(
        &self,
        tx: &mut dyn CycleTransaction,
        ctx: &TenantContext,
        embryo_id: Uuid,
        status: EmbryoStatus,
        req: EmbryoStatusRequest,
    ) -> Result<Embryo> {
        let mut embryo = load_embryo(tx, ctx, embryo_id).await?;
        let from = embryo.status;
        self.settings.embryo_status_policy.check(from, status)?;

        let now = Utc::now();
        apply_status(&mut embryo, status, now.date_naive(), non_blank(req.discard_reason.as_deref()));
        embryo.notes = merge_notes(embryo.notes.as_deref(), req.notes.as_deref());
        embryo.updated_at = now;
        tx.update_embryo(&embryo).await?;
        tx.enqueue_audit(&AuditEntry::new(
            ctx,
            "embryo.status_changed",
            "embryos",
            embryo.id,
            Some(serde_json::json!({ "from": from, "to": status })),
        ))
        .await?;

        Ok(embryo)
    }

    /// 批量移植：创建移植记录，所有胚胎置为已移植，周期进入等待验孕
    pub async fn transfer_embryos(
        &self,
        ctx: &TenantContext,
        cycle_id: Uuid,
        req: TransferRequest,
    ) -> Result<EmbryoTransfer> {
        check_embryo_ids(&req.embryo_ids)?;

        let mut tx = self.store.begin().await?;
        let result = self.insert_transfer(&mut *tx, ctx, cycle_id, req).await;
        let (transfer, change) = finish(tx, result).await?;
        self.notify(change);
        tracing::info!(
            "Transferred {} embryos for cycle {}",
            transfer.number_of_embryos,
            cycle_id
        );
        Ok(transfer)
    }

    async fn insert_transfer(
        &self,
        tx: &mut dyn CycleTransaction,
        ctx: &TenantContext,
        cycle_id: Uuid,
        req: TransferRequest,
    ) -> Result<(EmbryoTransfer, Option<StageChange>)> {
        let mut cycle = load_cycle(tx, ctx, cycle_id).await?;
        let change = self.advance(&mut cycle, CycleEvent::EmbryosTransferred)?;
        let now = Utc::now();
        let transfer_date = req.transfer_date.unwrap_or_else(|| now.date_naive());

        let transfer = EmbryoTransfer {
            id: Uuid::new_v4(),
            cycle_id,
            transfer_date,
            number_of_embryos: req.embryo_ids.len() as i32,
            embryo_ids: req.embryo_ids,
            catheter_type: non_blank(req.catheter_type.as_deref()),
            ultrasound_guided: req.ultrasound_guided,
            difficulty: req.difficulty,
            complications: non_blank(req.complications.as_deref()),
            performed_by: req.performed_by,
            notes: non_blank(req.notes.as_deref()),
            created_at: now,
        };
        tx.insert_transfer(&transfer).await?;

        for embryo_id in &transfer.embryo_ids {
            let mut embryo = load_cycle_embryo(tx, ctx, cycle_id, *embryo_id).await?;
            self.settings
                .embryo_status_policy
                .check(embryo.status, EmbryoStatus::Transferred)?;
            apply_status(&mut embryo, EmbryoStatus::Transferred, transfer_date, None);
            embryo.updated_at = now;
            tx.update_embryo(&embryo).await?;
        }

        cycle.embryo_transfer_date = Some(transfer_date);
        cycle.updated_at = now;
        tx.update_cycle(&cycle).await?;
        tx.enqueue_audit(&AuditEntry::new(
            ctx,
            "embryo_transfer.recorded",
            "embryo_transfers",
            transfer.id,
            Some(serde_json::json!({
                "cycle_id": cycle_id,
                "embryo_ids": transfer.embryo_ids,
                "current_stage": cycle.current_stage,
            })),
        ))
        .await?;

        Ok((transfer, change))
    }

    /// 批量冷冻：记录存放位置与每个胚胎冷冻时的评分，不影响周期阶段
    pub async fn freeze_embryos(
        &self,
        ctx: &TenantContext,
        cycle_id: Uuid,
        req: FreezeRequest,
    ) -> Result<CryopreservationRecord> {
        check_embryo_ids(&req.embryo_ids)?;
        if req.location.tank.trim().is_empty() {
            return Err(IvfError::validation("storage tank is required"));
        }

        let mut tx = self.store.begin().await?;
        let result = self.insert_cryopreservation(&mut *tx, ctx, cycle_id, req).await;
        let record = finish(tx, result).await?;
        tracing::info!(
            "Cryopreserved {} embryos for cycle {} in tank {}",
            record.specimens.len(),
            cycle_id,
            record.location.tank
        );
        Ok(record)
    }

    async fn insert_cryopreservation(
        &self,
        tx: &mut dyn CycleTransaction,
        ctx: &TenantContext,
        cycle_id: Uuid,
        req: FreezeRequest,
    ) -> Result<CryopreservationRecord> {
        let cycle = load_cycle(tx, ctx, cycle_id).await?;
        let now = Utc::now();
        let freeze_date = req.freeze_date.unwrap_or_else(|| now.date_naive());

        let mut embryos = Vec::with_capacity(req.embryo_ids.len());
        for embryo_id in &req.embryo_ids {
            let embryo = load_cycle_embryo(tx, ctx, cycle_id, *embryo_id).await?;
            self.settings
                .embryo_status_policy
                .check(embryo.status, EmbryoStatus::Frozen)?;
            embryos.push(embryo);
        }

        let record = CryopreservationRecord {
            id: Uuid::new_v4(),
            clinic_id: ctx.clinic_id,
            patient_id: cycle.patient_id,
            cycle_id,
            specimen_type: SpecimenType::Embryo,
            freeze_date,
            location: req.location,
            expiry_date: req.expiry_date,
            consent_signed: req.consent_signed,
            specimens: embryos
                .iter()
                .map(|e| FrozenSpecimen {
                    embryo_id: e.id,
                    embryo_number: e.embryo_number,
                    grade: e.best_grade(),
                })
                .collect(),
            notes: non_blank(req.notes.as_deref()),
            created_by: ctx.user_id,
            created_at: now,
        };
        tx.insert_cryopreservation(&record).await?;

        for mut embryo in embryos {
            apply_status(&mut embryo, EmbryoStatus::Frozen, freeze_date, None);
            embryo.updated_at = now;
            tx.update_embryo(&embryo).await?;
        }

        tx.enqueue_audit(&AuditEntry::new(
            ctx,
            "cryopreservation.recorded",
            "cryopreservations",
            record.id,
            Some(serde_json::json!({
                "cycle_id": cycle_id,
                "tank": record.location.tank,
                "specimens": record.specimens,
            })),
        ))
        .await?;

        Ok(record)
    }
}

fn check_embryo_ids(ids: &[Uuid]) -> Result<()> {
    if ids.is_empty() {
        return Err(IvfError::validation("embryoIds must not be empty"));
    }
    let mut seen = HashSet::with_capacity(ids.len());
    if let Some(dup) = ids.iter().find(|id| !seen.insert(**id)) {
        return Err(IvfError::validation(format!("duplicate embryo id {}", dup)));
    }
    Ok(())
}

async fn load_embryo(tx: &mut dyn CycleTransaction, ctx: &TenantContext, embryo_id: Uuid) -> Result<Embryo> {
    tx.find_embryo(ctx.clinic_id, embryo_id)
        .await?
        .ok_or_else(|| IvfError::not_found(format!("embryo {}", embryo_id)))
}

/// 读取胚胎并确认其属于该周期
async fn load_cycle_embryo(
    tx: &mut dyn CycleTransaction,
    ctx: &TenantContext,
    cycle_id: Uuid,
    embryo_id: Uuid,
) -> Result<Embryo> {
    let embryo = load_embryo(tx, ctx, embryo_id).await?;
    if embryo.cycle_id != cycle_id {
        return Err(IvfError::not_found(format!("embryo {} in cycle {}", embryo_id, cycle_id)));
    }
    Ok(embryo)
}

async fn update_development(
    tx: &mut dyn CycleTransaction,
    ctx: &TenantContext,
    embryo_id: Uuid,
    req: DevelopmentRequest,
) -> Result<Embryo> {
    let mut embryo = load_embryo(tx, ctx, embryo_id).await?;

    let mut written = apply_development(&mut embryo.grading, &req)?;
    if non_blank(req.notes.as_deref()).is_some() {
        embryo.notes = merge_notes(embryo.notes.as_deref(), req.notes.as_deref());
        written.push("notes");
    }
    if written.is_empty() {
        return Err(IvfError::validation("no fields to update"));
    }

    embryo.updated_at = Utc::now();
    tx.update_embryo(&embryo).await?;
    tx.enqueue_audit(&AuditEntry::new(
        ctx,
        "embryo.development_updated",
        "embryos",
        embryo.id,
        Some(serde_json::json!({ "day": req.day, "fields": written })),
    ))
    .await?;

    Ok(embryo)
}
