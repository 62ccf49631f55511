//! 测试夹具

use crate::engine::{CycleWorkflow, TransitionListener, WorkflowSettings};
use chrono::NaiveDate;
use ivf_core::*;
use ivf_database::MemoryStore;
use std::sync::Arc;
use uuid::Uuid;

pub(crate) fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub(crate) struct Fixture {
    pub store: MemoryStore,
    pub workflow: CycleWorkflow,
    pub ctx: TenantContext,
    pub patient_id: Uuid,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::build(WorkflowSettings::default(), None).await
    }

    pub async fn with_settings(settings: WorkflowSettings) -> Self {
        Self::build(settings, None).await
    }

    pub async fn with_listener(listener: Arc<dyn TransitionListener>) -> Self {
        Self::build(WorkflowSettings::default(), Some(listener)).await
    }

    async fn build(settings: WorkflowSettings, listener: Option<Arc<dyn TransitionListener>>) -> Self {
        let store = MemoryStore::new();
        let ctx = TenantContext::new(Uuid::new_v4(), Uuid::new_v4());
        let patient_id = Uuid::new_v4();
        store
            .seed_patient(PatientRef {
                id: patient_id,
                clinic_id: ctx.clinic_id,
                full_name: "Jane Roe".to_string(),
                patient_code: "P0042".to_string(),
            })
            .await;

        let mut workflow = CycleWorkflow::new(Arc::new(store.clone()), Arc::new(store.clone()), settings);
        if let Some(listener) = listener {
            workflow = workflow.with_listener(listener);
        }

        Self { store, workflow, ctx, patient_id }
    }

    pub fn start_request(&self) -> StartCycleRequest {
        StartCycleRequest {
            patient_id: Some(self.patient_id),
            cycle_type: Some("ivf".to_string()),
            start_date: Some(date(2026, 3, 1)),
            protocol: Some("antagonist".to_string()),
            ..Default::default()
        }
    }

    pub async fn start(&self) -> Cycle {
        self.workflow.start_cycle(&self.ctx, self.start_request()).await.unwrap()
    }

    pub async fn set_stage(&self, cycle_id: Uuid, stage: &str) -> Result<Cycle> {
        let req = SetStageRequest { stage: stage.to_string(), notes: None };
        self.workflow.set_stage(&self.ctx, cycle_id, req).await
    }

    pub async fn cycle(&self, cycle_id: Uuid) -> Cycle {
        self.workflow.get_cycle_detail(&self.ctx, cycle_id).await.unwrap().cycle
    }

    pub async fn retrieve(&self, cycle_id: Uuid, right: i32, left: i32) -> EggRetrieval {
        let req = EggRetrievalRequest {
            retrieval_date: Some(date(2026, 3, 14)),
            right_ovary_eggs: Some(right),
            left_ovary_eggs: Some(left),
            ..Default::default()
        };
        self.workflow.record_egg_retrieval(&self.ctx, cycle_id, req).await.unwrap()
    }

    pub async fn fertilize(&self, cycle_id: Uuid, inseminated: i32, two_pn: i32) -> FertilizationResult {
        let req = FertilizationRequest {
            fertilization_date: Some(date(2026, 3, 14)),
            method: Some("icsi".to_string()),
            eggs_inseminated: inseminated,
            two_pn_normal: two_pn,
            ..Default::default()
        };
        self.workflow.record_fertilization(&self.ctx, cycle_id, req).await.unwrap()
    }

    /// 新周期，完成取卵与受精，停在胚胎培养阶段
    pub async fn cycle_in_culture(&self, two_pn: i32) -> (Cycle, Vec<Embryo>) {
        let cycle = self.start().await;
        self.retrieve(cycle.id, two_pn, two_pn).await;
        let result = self.fertilize(cycle.id, two_pn * 2, two_pn).await;
        (self.cycle(cycle.id).await, result.embryos)
    }
}
