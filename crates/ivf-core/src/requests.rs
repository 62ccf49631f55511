//! 操作请求模型
//!
//! 请求字段统一使用 camelCase，必填字段以 `Option` 表示，
//! 以便缺失时由业务层返回验证错误而不是反序列化失败。

use crate::models::{FollicleMeasurement, MedicationDose, StorageLocation, TransferDifficulty};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 新建周期
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCycleRequest {
    pub patient_id: Option<Uuid>,
    pub cycle_type: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub protocol: Option<String>,
    pub expected_egg_retrieval: Option<NaiveDate>,
    pub doctor_id: Option<Uuid>,
    pub embryologist_id: Option<Uuid>,
    pub notes: Option<String>,
}

/// 显式设置阶段
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetStageRequest {
    pub stage: String,
    pub notes: Option<String>,
}

/// 监测记录
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitoringRequest {
    pub monitoring_date: Option<NaiveDate>,
    pub stimulation_day: Option<i32>,
    pub estradiol_pg_ml: Option<f64>,
    pub lh_iu_l: Option<f64>,
    pub progesterone_ng_ml: Option<f64>,
    pub fsh_iu_l: Option<f64>,
    pub endometrial_thickness_mm: Option<f64>,
    pub right_ovary_follicles: Vec<FollicleMeasurement>,
    pub left_ovary_follicles: Vec<FollicleMeasurement>,
    pub medications: Vec<MedicationDose>,
    pub next_visit: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// 取卵
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EggRetrievalRequest {
    pub retrieval_date: Option<NaiveDate>,
    pub right_ovary_eggs: Option<i32>,
    pub left_ovary_eggs: Option<i32>,
    pub mature_eggs: Option<i32>,
    pub anesthesia_type: Option<String>,
    pub complications: Option<String>,
    pub performed_by: Option<Uuid>,
    pub notes: Option<String>,
}

/// 精液样本
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpermSampleRequest {
    pub collection_date: Option<NaiveDate>,
    pub sample_source: Option<String>,
    pub volume_ml: Option<f64>,
    pub concentration_m_per_ml: Option<f64>,
    pub total_motility_pct: Option<f64>,
    pub progressive_motility_pct: Option<f64>,
    pub normal_morphology_pct: Option<f64>,
    pub preparation_method: Option<String>,
    pub notes: Option<String>,
}

/// 受精
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FertilizationRequest {
    pub egg_retrieval_id: Option<Uuid>,
    pub sperm_sample_id: Option<Uuid>,
    pub fertilization_date: Option<NaiveDate>,
    pub method: Option<String>,
    pub eggs_inseminated: i32,
    pub two_pn_normal: i32,
    pub one_pn: Option<i32>,
    pub three_pn: Option<i32>,
    pub degenerated: Option<i32>,
    pub notes: Option<String>,
}

/// 逐日发育评分更新；仅当天相关字段生效
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevelopmentRequest {
    pub day: u8,
    pub cell_count: Option<i32>,
    pub grade: Option<String>,
    pub fragmentation: Option<String>,
    pub symmetry: Option<String>,
    pub stage: Option<String>,
    pub icm_grade: Option<String>,
    pub te_grade: Option<String>,
    pub expansion: Option<i32>,
    pub overall_grade: Option<String>,
    pub notes: Option<String>,
}

/// 设置胚胎状态
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbryoStatusRequest {
    pub status: String,
    pub discard_reason: Option<String>,
    pub notes: Option<String>,
}

/// 批量移植
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransferRequest {
    pub embryo_ids: Vec<Uuid>,
    pub transfer_date: Option<NaiveDate>,
    pub catheter_type: Option<String>,
    pub ultrasound_guided: bool,
    pub difficulty: Option<TransferDifficulty>,
    pub complications: Option<String>,
    pub performed_by: Option<Uuid>,
    pub notes: Option<String>,
}

/// 批量冷冻
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FreezeRequest {
    pub embryo_ids: Vec<Uuid>,
    pub freeze_date: Option<NaiveDate>,
    pub location: StorageLocation,
    pub expiry_date: Option<NaiveDate>,
    pub consent_signed: bool,
    pub notes: Option<String>,
}

/// 妊娠结局
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutcomeRequest {
    pub first_beta_value: Option<f64>,
    pub first_beta_date: Option<NaiveDate>,
    pub second_beta_value: Option<f64>,
    pub second_beta_date: Option<NaiveDate>,
    pub clinical_pregnancy: Option<bool>,
    pub gestational_sacs: Option<i32>,
    pub fetal_heartbeats: Option<i32>,
    pub ultrasound_date: Option<NaiveDate>,
    pub delivery_date: Option<NaiveDate>,
    pub delivery_type: Option<String>,
    pub live_births: Option<i32>,
    pub birth_weights_grams: Vec<i32>,
    pub notes: Option<String>,
}
