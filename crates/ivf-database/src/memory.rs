//! 内存存储
//!
//! 单进程部署与测试使用。`begin` 持有全局锁并复制一份工作副本，
//! 提交时整体写回，丢弃或回滚时工作副本直接作废，因此事务语义与数据库一致。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ivf_core::models::*;
use ivf_core::store::{CycleStore, CycleTransaction, PatientDirectory};
use ivf_core::{IvfError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    cycles: Vec<Cycle>,
    monitoring: Vec<MonitoringEntry>,
    egg_retrievals: Vec<EggRetrieval>,
    sperm_samples: Vec<SpermSample>,
    fertilizations: Vec<Fertilization>,
    embryos: Vec<Embryo>,
    transfers: Vec<EmbryoTransfer>,
    cryopreservations: Vec<CryopreservationRecord>,
    outcomes: Vec<PregnancyOutcome>,
    audit_outbox: Vec<AuditEntry>,
}

/// 内存存储
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    patients: Arc<RwLock<HashMap<Uuid, PatientRef>>>,
    injected_cycle_conflicts: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记患者，替代外部患者登记处
    pub async fn seed_patient(&self, patient: PatientRef) {
        self.patients.write().await.insert(patient.id, patient);
    }

    /// 让接下来 `count` 次周期插入返回序号冲突，用于模拟并发创建
    pub fn inject_cycle_conflicts(&self, count: usize) {
        self.injected_cycle_conflicts.store(count, Ordering::SeqCst);
    }

    /// 发件箱中尚未投递的审计条目，按写入顺序
    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.state.lock().await.audit_outbox.clone()
    }
}

#[async_trait]
impl CycleStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn CycleTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            injected_cycle_conflicts: self.injected_cycle_conflicts.clone(),
        }))
    }
}

#[async_trait]
impl PatientDirectory for MemoryStore {
    async fn find_by_id(&self, clinic_id: Uuid, patient_id: Uuid) -> Result<Option<PatientRef>> {
        let patients = self.patients.read().await;
        Ok(patients
            .get(&patient_id)
            .filter(|p| p.clinic_id == clinic_id)
            .cloned())
    }
}

/// 内存事务
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    injected_cycle_conflicts: Arc<AtomicUsize>,
}

impl MemoryTransaction {
    fn take_injected_conflict(&self) -> bool {
        self.injected_cycle_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn sorted_by<T, K: Ord>(mut items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    items.sort_by_key(key);
    items
}

#[async_trait]
impl CycleTransaction for MemoryTransaction {
    async fn next_cycle_number(&mut self, clinic_id: Uuid, patient_id: Uuid) -> Result<i32> {
        let max = self
            .working
            .cycles
            .iter()
            .filter(|c| c.clinic_id == clinic_id && c.patient_id == patient_id)
            .map(|c| c.cycle_number)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    async fn insert_cycle(&mut self, cycle: &Cycle) -> Result<()> {
        if self.take_injected_conflict() {
            return Err(IvfError::Conflict("duplicate cycle number".to_string()));
        }
        let duplicate = self
            .working
            .cycles
            .iter()
            .any(|c| c.patient_id == cycle.patient_id && c.cycle_number == cycle.cycle_number);
        if duplicate {
            return Err(IvfError::Conflict(format!(
                "cycle number {} already exists for patient",
                cycle.cycle_number
            )));
        }
        self.working.cycles.push(cycle.clone());
        Ok(())
    }

    async fn find_cycle(&mut self, clinic_id: Uuid, cycle_id: Uuid) -> Result<Option<Cycle>> {
        Ok(self
            .working
            .cycles
            .iter()
            .find(|c| c.id == cycle_id && c.clinic_id == clinic_id)
            .cloned())
    }

    async fn update_cycle(&mut self, cycle: &Cycle) -> Result<()> {
        if let Some(existing) = self
            .working
            .cycles
            .iter_mut()
            .find(|c| c.id == cycle.id && c.clinic_id == cycle.clinic_id)
        {
            *existing = cycle.clone();
        }
        Ok(())
    }

    async fn list_cycles_for_patient(&mut self, clinic_id: Uuid, patient_id: Uuid) -> Result<Vec<Cycle>> {
        let cycles = self
            .working
            .cycles
            .iter()
            .filter(|c| c.clinic_id == clinic_id && c.patient_id == patient_id)
            .cloned()
            .collect();
        Ok(sorted_by(cycles, |c: &Cycle| c.cycle_number))
    }

    async fn insert_monitoring(&mut self, entry: &MonitoringEntry) -> Result<()> {
        self.working.monitoring.push(entry.clone());
        Ok(())
    }

    async fn list_monitoring(&mut self, cycle_id: Uuid) -> Result<Vec<MonitoringEntry>> {
        let entries = self
            .working
            .monitoring
            .iter()
            .filter(|m| m.cycle_id == cycle_id)
            .cloned()
            .collect();
        Ok(sorted_by(entries, |m: &MonitoringEntry| m.monitoring_date))
    }

    async fn insert_egg_retrieval(&mut self, retrieval: &EggRetrieval) -> Result<()> {
        self.working.egg_retrievals.push(retrieval.clone());
        Ok(())
    }

    async fn find_egg_retrieval(&mut self, cycle_id: Uuid, retrieval_id: Uuid) -> Result<Option<EggRetrieval>> {
        Ok(self
            .working
            .egg_retrievals
            .iter()
            .find(|r| r.id == retrieval_id && r.cycle_id == cycle_id)
            .cloned())
    }

    async fn latest_egg_retrieval(&mut self, cycle_id: Uuid) -> Result<Option<EggRetrieval>> {
        Ok(self
            .working
            .egg_retrievals
            .iter()
            .filter(|r| r.cycle_id == cycle_id)
            .last()
            .cloned())
    }

    async fn insert_sperm_sample(&mut self, sample: &SpermSample) -> Result<()> {
        self.working.sperm_samples.push(sample.clone());
        Ok(())
    }

    async fn find_sperm_sample(&mut self, cycle_id: Uuid, sample_id: Uuid) -> Result<Option<SpermSample>> {
        Ok(self
            .working
            .sperm_samples
            .iter()
            .find(|s| s.id == sample_id && s.cycle_id == cycle_id)
            .cloned())
    }

    async fn list_sperm_samples(&mut self, cycle_id: Uuid) -> Result<Vec<SpermSample>> {
        let samples = self
            .working
            .sperm_samples
            .iter()
            .filter(|s| s.cycle_id == cycle_id)
            .cloned()
            .collect();
        Ok(sorted_by(samples, |s: &SpermSample| s.collection_date))
    }

    async fn insert_fertilization(&mut self, fertilization: &Fertilization) -> Result<()> {
        self.working.fertilizations.push(fertilization.clone());
        Ok(())
    }

    async fn list_fertilizations(&mut self, cycle_id: Uuid) -> Result<Vec<Fertilization>> {
        Ok(self
            .working
            .fertilizations
            .iter()
            .filter(|f| f.cycle_id == cycle_id)
            .cloned()
            .collect())
    }

    async fn insert_embryo(&mut self, embryo: &Embryo) -> Result<()> {
        let duplicate = self
            .working
            .embryos
            .iter()
            .any(|e| e.cycle_id == embryo.cycle_id && e.embryo_number == embryo.embryo_number);
        if duplicate {
            return Err(IvfError::Conflict(format!(
                "embryo number {} already exists in cycle",
                embryo.embryo_number
            )));
        }
        self.working.embryos.push(embryo.clone());
        Ok(())
    }

    async fn find_embryo(&mut self, clinic_id: Uuid, embryo_id: Uuid) -> Result<Option<Embryo>> {
        Ok(self
            .working
            .embryos
            .iter()
            .find(|e| e.id == embryo_id && e.clinic_id == clinic_id)
            .cloned())
    }

    async fn update_embryo(&mut self, embryo: &Embryo) -> Result<()> {
        if let Some(existing) = self
            .working
            .embryos
            .iter_mut()
            .find(|e| e.id == embryo.id && e.clinic_id == embryo.clinic_id)
        {
            *existing = embryo.clone();
        }
        Ok(())
    }

    async fn list_embryos(&mut self, cycle_id: Uuid) -> Result<Vec<Embryo>> {
        let embryos = self
            .working
            .embryos
            .iter()
            .filter(|e| e.cycle_id == cycle_id)
            .cloned()
            .collect();
        Ok(sorted_by(embryos, |e: &Embryo| e.embryo_number))
    }

    async fn max_embryo_number(&mut self, cycle_id: Uuid) -> Result<i32> {
        Ok(self
            .working
            .embryos
            .iter()
            .filter(|e| e.cycle_id == cycle_id)
            .map(|e| e.embryo_number)
            .max()
            .unwrap_or(0))
    }

    async fn insert_transfer(&mut self, transfer: &EmbryoTransfer) -> Result<()> {
        self.working.transfers.push(transfer.clone());
        Ok(())
    }

    async fn list_transfers(&mut self, cycle_id: Uuid) -> Result<Vec<EmbryoTransfer>> {
        let transfers = self
            .working
            .transfers
            .iter()
            .filter(|t| t.cycle_id == cycle_id)
            .cloned()
            .collect();
        Ok(sorted_by(transfers, |t: &EmbryoTransfer| t.transfer_date))
    }

    async fn insert_cryopreservation(&mut self, record: &CryopreservationRecord) -> Result<()> {
        self.working.cryopreservations.push(record.clone());
        Ok(())
    }

    async fn list_cryopreservations(&mut self, cycle_id: Uuid) -> Result<Vec<CryopreservationRecord>> {
        let records = self
            .working
            .cryopreservations
            .iter()
            .filter(|r| r.cycle_id == cycle_id)
            .cloned()
            .collect();
        Ok(sorted_by(records, |r: &CryopreservationRecord| r.freeze_date))
    }

    async fn insert_outcome(&mut self, outcome: &PregnancyOutcome) -> Result<()> {
        if self.working.outcomes.iter().any(|o| o.cycle_id == outcome.cycle_id) {
            return Err(IvfError::Conflict("outcome already recorded for cycle".to_string()));
        }
        self.working.outcomes.push(outcome.clone());
        Ok(())
    }

    async fn find_outcome(&mut self, cycle_id: Uuid) -> Result<Option<PregnancyOutcome>> {
        Ok(self
            .working
            .outcomes
            .iter()
            .find(|o| o.cycle_id == cycle_id)
            .cloned())
    }

    async fn enqueue_audit(&mut self, entry: &AuditEntry) -> Result<()> {
        self.working.audit_outbox.push(entry.clone());
        Ok(())
    }

    async fn pending_audit(&mut self, limit: i64) -> Result<Vec<AuditEntry>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .working
            .audit_outbox
            .iter()
            .filter(|a| a.delivered_at.is_none())
            .take(limit)
            .cloned()
            .collect())
    }

    /// 已投递条目直接移出发件箱，快照只保留待投递部分
    async fn mark_audit_delivered(&mut self, ids: &[Uuid], _delivered_at: DateTime<Utc>) -> Result<()> {
        self.working.audit_outbox.retain(|entry| !ids.contains(&entry.id));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction { mut guard, working, .. } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_cycle(clinic_id: Uuid, patient_id: Uuid, number: i32) -> Cycle {
        let now = Utc::now();
        Cycle {
            id: Uuid::new_v4(),
            clinic_id,
            patient_id,
            cycle_number: number,
            cycle_code: format!("P-C{:02}", number),
            cycle_type: "ivf".to_string(),
            protocol: None,
            start_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            expected_egg_retrieval: None,
            actual_egg_retrieval: None,
            embryo_transfer_date: None,
            current_stage: Stage::Consultation,
            cycle_outcome: None,
            pregnancy_result: None,
            doctor_id: None,
            embryologist_id: None,
            notes: None,
            created_by: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_commit_persists_changes() {
        let store = MemoryStore::new();
        let (clinic, patient) = (Uuid::new_v4(), Uuid::new_v4());
        let cycle = sample_cycle(clinic, patient, 1);

        let mut tx = store.begin().await.unwrap();
        tx.insert_cycle(&cycle).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.find_cycle(clinic, cycle.id).await.unwrap(), Some(cycle));
        assert_eq!(tx.next_cycle_number(clinic, patient).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_changes() {
        let store = MemoryStore::new();
        let (clinic, patient) = (Uuid::new_v4(), Uuid::new_v4());
        let cycle = sample_cycle(clinic, patient, 1);

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_cycle(&cycle).await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        assert!(tx.find_cycle(clinic, cycle.id).await.unwrap().is_none());
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_cycle_number_conflicts() {
        let store = MemoryStore::new();
        let (clinic, patient) = (Uuid::new_v4(), Uuid::new_v4());

        let mut tx = store.begin().await.unwrap();
        tx.insert_cycle(&sample_cycle(clinic, patient, 1)).await.unwrap();
        let err = tx.insert_cycle(&sample_cycle(clinic, patient, 1)).await.unwrap_err();
        assert!(matches!(err, IvfError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_cross_clinic_lookup_is_hidden() {
        let store = MemoryStore::new();
        let (clinic, patient) = (Uuid::new_v4(), Uuid::new_v4());
        let cycle = sample_cycle(clinic, patient, 1);

        let mut tx = store.begin().await.unwrap();
        tx.insert_cycle(&cycle).await.unwrap();
        assert!(tx.find_cycle(Uuid::new_v4(), cycle.id).await.unwrap().is_none());

        store
            .seed_patient(PatientRef {
                id: patient,
                clinic_id: clinic,
                full_name: "Test Patient".to_string(),
                patient_code: "P".to_string(),
            })
            .await;
        assert!(store.find_by_id(clinic, patient).await.unwrap().is_some());
        assert!(store.find_by_id(Uuid::new_v4(), patient).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_injected_conflicts_are_consumed() {
        let store = MemoryStore::new();
        let (clinic, patient) = (Uuid::new_v4(), Uuid::new_v4());
        store.inject_cycle_conflicts(1);

        let mut tx = store.begin().await.unwrap();
        assert!(tx.insert_cycle(&sample_cycle(clinic, patient, 1)).await.is_err());
        assert!(tx.insert_cycle(&sample_cycle(clinic, patient, 1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_delivered_audit_entries_leave_the_outbox() {
        let store = MemoryStore::new();
        let ctx = TenantContext::new(Uuid::new_v4(), Uuid::new_v4());
        let first = AuditEntry::new(&ctx, "cycle.created", "ivf_cycles", Uuid::new_v4(), None);
        let second = AuditEntry::new(&ctx, "cycle.stage_changed", "ivf_cycles", Uuid::new_v4(), None);

        let mut tx = store.begin().await.unwrap();
        tx.enqueue_audit(&first).await.unwrap();
        tx.enqueue_audit(&second).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.mark_audit_delivered(&[first.id], Utc::now()).await.unwrap();
        tx.commit().await.unwrap();

        let remaining = store.audit_entries().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, second.id);

        let mut tx = store.begin().await.unwrap();
        let pending = tx.pending_audit(10).await.unwrap();
        assert_eq!(pending.iter().map(|a| a.id).collect::<Vec<_>>(), vec![second.id]);
    }
}
