//! 核心数据模型定义

use crate::error::IvfError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 请求上下文：由外部认证/租户层解析后传入，核心逻辑不再校验
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    pub clinic_id: Uuid,
    pub user_id: Uuid,
}

impl TenantContext {
    pub fn new(clinic_id: Uuid, user_id: Uuid) -> Self {
        Self { clinic_id, user_id }
    }
}

/// 患者登记处返回的患者摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRef {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub full_name: String,
    pub patient_code: String, // 诊所内部患者编号
}

/// 周期阶段
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Consultation,   // 初诊
    Stimulation,    // 促排卵
    Monitoring,     // 卵泡监测
    EggRetrieval,   // 取卵
    Fertilization,  // 受精
    EmbryoCulture,  // 胚胎培养
    EmbryoTransfer, // 胚胎移植
    Waiting,        // 等待验孕
    Completed,      // 已完成
    Cancelled,      // 已取消
}

impl Stage {
    pub const ALL: [Stage; 10] = [
        Stage::Consultation,
        Stage::Stimulation,
        Stage::Monitoring,
        Stage::EggRetrieval,
        Stage::Fertilization,
        Stage::EmbryoCulture,
        Stage::EmbryoTransfer,
        Stage::Waiting,
        Stage::Completed,
        Stage::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Consultation => "consultation",
            Stage::Stimulation => "stimulation",
            Stage::Monitoring => "monitoring",
            Stage::EggRetrieval => "egg_retrieval",
            Stage::Fertilization => "fertilization",
            Stage::EmbryoCulture => "embryo_culture",
            Stage::EmbryoTransfer => "embryo_transfer",
            Stage::Waiting => "waiting",
            Stage::Completed => "completed",
            Stage::Cancelled => "cancelled",
        }
    }

    /// 终止状态不可再被任何操作重新打开
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Cancelled)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = IvfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| IvfError::Validation(format!("invalid stage: {}", s)))
    }
}

/// 周期结局
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    Positive,
    Negative,
    Cancelled,
}

impl CycleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleOutcome::Positive => "positive",
            CycleOutcome::Negative => "negative",
            CycleOutcome::Cancelled => "cancelled",
        }
    }
}

impl FromStr for CycleOutcome {
    type Err = IvfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positive" => Ok(CycleOutcome::Positive),
            "negative" => Ok(CycleOutcome::Negative),
            "cancelled" => Ok(CycleOutcome::Cancelled),
            other => Err(IvfError::Validation(format!("invalid cycle outcome: {}", other))),
        }
    }
}

/// 治疗周期
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cycle {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub cycle_number: i32,
    pub cycle_code: String, // {patient_code}-C{nn}，创建后不可变
    pub cycle_type: String,
    pub protocol: Option<String>,
    pub start_date: NaiveDate,
    pub expected_egg_retrieval: Option<NaiveDate>,
    pub actual_egg_retrieval: Option<NaiveDate>,
    pub embryo_transfer_date: Option<NaiveDate>,
    pub current_stage: Stage,
    pub cycle_outcome: Option<CycleOutcome>,
    pub pregnancy_result: Option<bool>,
    pub doctor_id: Option<Uuid>,
    pub embryologist_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 单个卵泡测量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollicleMeasurement {
    pub size_mm: f64,
    #[serde(default = "default_follicle_count")]
    pub count: i32,
}

fn default_follicle_count() -> i32 {
    1
}

/// 用药记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationDose {
    pub name: String,
    pub dose: Option<String>,
    pub route: Option<String>,
}

/// 促排卵监测记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringEntry {
    pub id: Uuid,
    pub cycle_id: Uuid,
    pub monitoring_date: NaiveDate,
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
    pub recorded_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// 取卵记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EggRetrieval {
    pub id: Uuid,
    pub cycle_id: Uuid,
    pub retrieval_date: NaiveDate,
    pub right_ovary_eggs: i32,
    pub left_ovary_eggs: i32,
    pub total_eggs_retrieved: i32,
    pub mature_eggs: Option<i32>,
    pub anesthesia_type: Option<String>,
    pub complications: Option<String>,
    pub performed_by: Option<Uuid>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 精液样本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpermSample {
    pub id: Uuid,
    pub cycle_id: Uuid,
    pub collection_date: NaiveDate,
    pub sample_source: Option<String>,
    pub volume_ml: Option<f64>,
    pub concentration_m_per_ml: Option<f64>,
    pub total_motility_pct: Option<f64>,
    pub progressive_motility_pct: Option<f64>,
    pub normal_morphology_pct: Option<f64>,
    pub preparation_method: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 受精记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fertilization {
    pub id: Uuid,
    pub cycle_id: Uuid,
    pub egg_retrieval_id: Option<Uuid>,
    pub sperm_sample_id: Option<Uuid>,
    pub fertilization_date: NaiveDate,
    pub method: Option<String>,
    pub eggs_inseminated: i32,
    pub two_pn_normal: i32,
    pub one_pn: Option<i32>,
    pub three_pn: Option<i32>,
    pub degenerated: Option<i32>,
    pub fertilization_rate: f64,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 胚胎状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EmbryoStatus {
    Developing,  // 培养中
    Transferred, // 已移植
    Frozen,      // 已冷冻
    Arrested,    // 发育停滞
    Discarded,   // 已废弃
}

impl EmbryoStatus {
    pub const ALL: [EmbryoStatus; 5] = [
        EmbryoStatus::Developing,
        EmbryoStatus::Transferred,
        EmbryoStatus::Frozen,
        EmbryoStatus::Arrested,
        EmbryoStatus::Discarded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmbryoStatus::Developing => "developing",
            EmbryoStatus::Transferred => "transferred",
            EmbryoStatus::Frozen => "frozen",
            EmbryoStatus::Arrested => "arrested",
            EmbryoStatus::Discarded => "discarded",
        }
    }
}

impl fmt::Display for EmbryoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmbryoStatus {
    type Err = IvfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EmbryoStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| IvfError::Validation(format!("invalid embryo status: {}", s)))
    }
}

/// 卵裂期评分（第2/3天）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleavageGrade {
    pub cell_count: Option<i32>,
    pub grade: Option<String>,
    pub fragmentation: Option<String>,
    pub symmetry: Option<String>,
}

/// 阶段+评分（第4/6天）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageGrade {
    pub stage: Option<String>,
    pub grade: Option<String>,
}

/// 囊胚评分（第5天）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlastocystGrade {
    pub stage: Option<String>,
    pub icm_grade: Option<String>,
    pub te_grade: Option<String>,
    pub expansion: Option<i32>,
    pub overall_grade: Option<String>,
}

/// 逐日发育评分
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbryoGrading {
    pub day2: CleavageGrade,
    pub day3: CleavageGrade,
    pub day4: StageGrade,
    pub day5: BlastocystGrade,
    pub day6: StageGrade,
}

/// 胚胎
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embryo {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub cycle_id: Uuid,
    pub fertilization_id: Uuid,
    pub embryo_number: i32,
    pub status: EmbryoStatus,
    pub grading: EmbryoGrading,
    pub transfer_date: Option<NaiveDate>,
    pub freeze_date: Option<NaiveDate>,
    pub discard_date: Option<NaiveDate>,
    pub discard_reason: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Embryo {
    /// 冷冻时记录的最佳评分：第5天总评，其次第3天评分
    pub fn best_grade(&self) -> String {
        self.grading
            .day5
            .overall_grade
            .clone()
            .or_else(|| self.grading.day3.grade.clone())
            .unwrap_or_else(|| "N/A".to_string())
    }
}

/// 移植难度
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferDifficulty {
    Easy,
    Moderate,
    Difficult,
}

impl TransferDifficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferDifficulty::Easy => "easy",
            TransferDifficulty::Moderate => "moderate",
            TransferDifficulty::Difficult => "difficult",
        }
    }
}

impl FromStr for TransferDifficulty {
    type Err = IvfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "easy" => Ok(TransferDifficulty::Easy),
            "moderate" => Ok(TransferDifficulty::Moderate),
            "difficult" => Ok(TransferDifficulty::Difficult),
            other => Err(IvfError::Validation(format!("invalid transfer difficulty: {}", other))),
        }
    }
}

/// 胚胎移植记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbryoTransfer {
    pub id: Uuid,
    pub cycle_id: Uuid,
    pub transfer_date: NaiveDate,
    pub embryo_ids: Vec<Uuid>,
    pub number_of_embryos: i32,
    pub catheter_type: Option<String>,
    pub ultrasound_guided: bool,
    pub difficulty: Option<TransferDifficulty>,
    pub complications: Option<String>,
    pub performed_by: Option<Uuid>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 冷冻标本类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpecimenType {
    Embryo,
    Oocyte,
    Sperm,
}

impl SpecimenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecimenType::Embryo => "embryo",
            SpecimenType::Oocyte => "oocyte",
            SpecimenType::Sperm => "sperm",
        }
    }
}

impl FromStr for SpecimenType {
    type Err = IvfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "embryo" => Ok(SpecimenType::Embryo),
            "oocyte" => Ok(SpecimenType::Oocyte),
            "sperm" => Ok(SpecimenType::Sperm),
            other => Err(IvfError::Validation(format!("invalid specimen type: {}", other))),
        }
    }
}

/// 液氮罐存放位置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageLocation {
    pub tank: String,
    pub canister: Option<String>,
    pub cane: Option<String>,
    pub position: Option<String>,
}

/// 冷冻时的标本快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrozenSpecimen {
    pub embryo_id: Uuid,
    pub embryo_number: i32,
    pub grade: String,
}

/// 冷冻保存记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CryopreservationRecord {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub cycle_id: Uuid,
    pub specimen_type: SpecimenType,
    pub freeze_date: NaiveDate,
    pub location: StorageLocation,
    pub expiry_date: Option<NaiveDate>,
    pub consent_signed: bool,
    pub specimens: Vec<FrozenSpecimen>,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// 一次β-hCG检测
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BetaReading {
    pub value: f64,
    pub date: NaiveDate,
}

/// 妊娠结局
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PregnancyOutcome {
    pub id: Uuid,
    pub cycle_id: Uuid,
    pub first_beta_value: Option<f64>,
    pub first_beta_date: Option<NaiveDate>,
    pub second_beta_value: Option<f64>,
    pub second_beta_date: Option<NaiveDate>,
    pub beta_doubling_time_hours: Option<f64>,
    pub cycle_outcome: CycleOutcome,
    pub clinical_pregnancy: Option<bool>,
    pub gestational_sacs: Option<i32>,
    pub fetal_heartbeats: Option<i32>,
    pub ultrasound_date: Option<NaiveDate>,
    pub delivery_date: Option<NaiveDate>,
    pub delivery_type: Option<String>,
    pub live_births: Option<i32>,
    pub birth_weights_grams: Vec<i32>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 审计发件箱条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub user_id: Uuid,
    pub action: String,
    pub entity_table: String,
    pub entity_id: Uuid,
    pub changes: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl AuditEntry {
    pub fn new(
        ctx: &TenantContext,
        action: &str,
        entity_table: &str,
        entity_id: Uuid,
        changes: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            clinic_id: ctx.clinic_id,
            user_id: ctx.user_id,
            action: action.to_string(),
            entity_table: entity_table.to_string(),
            entity_id,
            changes,
            created_at: Utc::now(),
            delivered_at: None,
        }
    }
}

/// 受精操作的结果：受精记录及新建的胚胎
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FertilizationResult {
    pub fertilization: Fertilization,
    pub embryos: Vec<Embryo>,
    pub current_stage: Stage,
}

/// 周期详情视图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleDetail {
    pub cycle: Cycle,
    pub monitoring: Vec<MonitoringEntry>,
    pub egg_retrieval: Option<EggRetrieval>,
    pub sperm_samples: Vec<SpermSample>,
    pub fertilizations: Vec<Fertilization>,
    pub embryos: Vec<Embryo>,
    pub transfers: Vec<EmbryoTransfer>,
    pub cryopreservations: Vec<CryopreservationRecord>,
    pub outcome: Option<PregnancyOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_round_trip_names() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
        assert!("transfer".parse::<Stage>().is_err());
    }

    #[test]
    fn test_stage_serde_matches_column_value() {
        let json = serde_json::to_string(&Stage::EmbryoCulture).unwrap();
        assert_eq!(json, "\"embryo_culture\"");
    }

    #[test]
    fn test_terminal_stages() {
        let terminal: Vec<Stage> = Stage::ALL.into_iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal, vec![Stage::Completed, Stage::Cancelled]);
    }

    #[test]
    fn test_best_grade_fallbacks() {
        let now = Utc::now();
        let mut embryo = Embryo {
            id: Uuid::new_v4(),
            clinic_id: Uuid::new_v4(),
            cycle_id: Uuid::new_v4(),
            fertilization_id: Uuid::new_v4(),
            embryo_number: 1,
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
        assert_eq!(embryo.best_grade(), "N/A");

        embryo.grading.day3.grade = Some("8A".to_string());
        assert_eq!(embryo.best_grade(), "8A");

        embryo.grading.day5.overall_grade = Some("4AA".to_string());
        assert_eq!(embryo.best_grade(), "4AA");
    }
}
