//! 数据库模型

use chrono::{DateTime, NaiveDate, Utc};
use ivf_core::models::*;
use ivf_core::IvfError;
use sqlx::types::Json;
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

// 数据库表模型 - 使用FromRow trait用于SQL查询，枚举以文本存储

/// 存储中的枚举值无法识别时视为数据库错误
fn parse_column<T>(column: &str, value: &str) -> Result<T, IvfError>
where
    T: FromStr<Err = IvfError>,
{
    value
        .parse()
        .map_err(|_| IvfError::Database(format!("unexpected value '{}' in column {}", value, column)))
}

/// 数据库患者表
#[derive(Debug, FromRow)]
pub struct DbPatient {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub full_name: String,
    pub patient_code: String,
}

impl From<DbPatient> for PatientRef {
    fn from(db_patient: DbPatient) -> Self {
        PatientRef {
            id: db_patient.id,
            clinic_id: db_patient.clinic_id,
            full_name: db_patient.full_name,
            patient_code: db_patient.patient_code,
        }
    }
}

/// 数据库周期表
#[derive(Debug, FromRow)]
pub struct DbCycle {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub cycle_number: i32,
    pub cycle_code: String,
    pub cycle_type: String,
    pub protocol: Option<String>,
    pub start_date: NaiveDate,
    pub expected_egg_retrieval: Option<NaiveDate>,
    pub actual_egg_retrieval: Option<NaiveDate>,
    pub embryo_transfer_date: Option<NaiveDate>,
    pub current_stage: String,
    pub cycle_outcome: Option<String>,
    pub pregnancy_result: Option<bool>,
    pub doctor_id: Option<Uuid>,
    pub embryologist_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbCycle> for Cycle {
    type Error = IvfError;

    fn try_from(db: DbCycle) -> Result<Self, Self::Error> {
        Ok(Cycle {
            id: db.id,
            clinic_id: db.clinic_id,
            patient_id: db.patient_id,
            cycle_number: db.cycle_number,
            cycle_code: db.cycle_code,
            cycle_type: db.cycle_type,
            protocol: db.protocol,
            start_date: db.start_date,
            expected_egg_retrieval: db.expected_egg_retrieval,
            actual_egg_retrieval: db.actual_egg_retrieval,
            embryo_transfer_date: db.embryo_transfer_date,
            current_stage: parse_column("current_stage", &db.current_stage)?,
            cycle_outcome: db
                .cycle_outcome
                .as_deref()
                .map(|v| parse_column("cycle_outcome", v))
                .transpose()?,
            pregnancy_result: db.pregnancy_result,
            doctor_id: db.doctor_id,
            embryologist_id: db.embryologist_id,
            notes: db.notes,
            created_by: db.created_by,
            created_at: db.created_at,
            updated_at: db.updated_at,
        })
    }
}

/// 数据库监测表
#[derive(Debug, FromRow)]
pub struct DbMonitoringEntry {
    pub id: Uuid,
    pub cycle_id: Uuid,
    pub monitoring_date: NaiveDate,
    pub stimulation_day: Option<i32>,
    pub estradiol_pg_ml: Option<f64>,
    pub lh_iu_l: Option<f64>,
    pub progesterone_ng_ml: Option<f64>,
    pub fsh_iu_l: Option<f64>,
    pub endometrial_thickness_mm: Option<f64>,
    pub right_ovary_follicles: Json<Vec<FollicleMeasurement>>,
    pub left_ovary_follicles: Json<Vec<FollicleMeasurement>>,
    pub medications: Json<Vec<MedicationDose>>,
    pub next_visit: Option<NaiveDate>,
    pub notes: Option<String>,
    pub recorded_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl From<DbMonitoringEntry> for MonitoringEntry {
    fn from(db: DbMonitoringEntry) -> Self {
        MonitoringEntry {
            id: db.id,
            cycle_id: db.cycle_id,
            monitoring_date: db.monitoring_date,
            stimulation_day: db.stimulation_day,
            estradiol_pg_ml: db.estradiol_pg_ml,
            lh_iu_l: db.lh_iu_l,
            progesterone_ng_ml: db.progesterone_ng_ml,
            fsh_iu_l: db.fsh_iu_l,
            endometrial_thickness_mm: db.endometrial_thickness_mm,
            right_ovary_follicles: db.right_ovary_follicles.0,
            left_ovary_follicles: db.left_ovary_follicles.0,
            medications: db.medications.0,
            next_visit: db.next_visit,
            notes: db.notes,
            recorded_by: db.recorded_by,
            created_at: db.created_at,
        }
    }
}

/// 数据库取卵表
#[derive(Debug, FromRow)]
pub struct DbEggRetrieval {
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

impl From<DbEggRetrieval> for EggRetrieval {
    fn from(db: DbEggRetrieval) -> Self {
        EggRetrieval {
            id: db.id,
            cycle_id: db.cycle_id,
            retrieval_date: db.retrieval_date,
            right_ovary_eggs: db.right_ovary_eggs,
            left_ovary_eggs: db.left_ovary_eggs,
            total_eggs_retrieved: db.total_eggs_retrieved,
            mature_eggs: db.mature_eggs,
            anesthesia_type: db.anesthesia_type,
            complications: db.complications,
            performed_by: db.performed_by,
            notes: db.notes,
            created_at: db.created_at,
        }
    }
}

/// 数据库精液样本表
#[derive(Debug, FromRow)]
pub struct DbSpermSample {
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

impl From<DbSpermSample> for SpermSample {
    fn from(db: DbSpermSample) -> Self {
        SpermSample {
            id: db.id,
            cycle_id: db.cycle_id,
            collection_date: db.collection_date,
            sample_source: db.sample_source,
            volume_ml: db.volume_ml,
            concentration_m_per_ml: db.concentration_m_per_ml,
            total_motility_pct: db.total_motility_pct,
            progressive_motility_pct: db.progressive_motility_pct,
            normal_morphology_pct: db.normal_morphology_pct,
            preparation_method: db.preparation_method,
            notes: db.notes,
            created_at: db.created_at,
        }
    }
}

/// 数据库受精表
#[derive(Debug, FromRow)]
pub struct DbFertilization {
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

impl From<DbFertilization> for Fertilization {
    fn from(db: DbFertilization) -> Self {
        Fertilization {
            id: db.id,
            cycle_id: db.cycle_id,
            egg_retrieval_id: db.egg_retrieval_id,
            sperm_sample_id: db.sperm_sample_id,
            fertilization_date: db.fertilization_date,
            method: db.method,
            eggs_inseminated: db.eggs_inseminated,
            two_pn_normal: db.two_pn_normal,
            one_pn: db.one_pn,
            three_pn: db.three_pn,
            degenerated: db.degenerated,
            fertilization_rate: db.fertilization_rate,
            notes: db.notes,
            created_at: db.created_at,
        }
    }
}

/// 数据库胚胎表（逐日评分展开为列）
#[derive(Debug, FromRow)]
pub struct DbEmbryo {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub cycle_id: Uuid,
    pub fertilization_id: Uuid,
    pub embryo_number: i32,
    pub status: String,
    pub day2_cell_count: Option<i32>,
    pub day2_grade: Option<String>,
    pub day2_fragmentation: Option<String>,
    pub day2_symmetry: Option<String>,
    pub day3_cell_count: Option<i32>,
    pub day3_grade: Option<String>,
    pub day3_fragmentation: Option<String>,
    pub day3_symmetry: Option<String>,
    pub day4_stage: Option<String>,
    pub day4_grade: Option<String>,
    pub day5_stage: Option<String>,
    pub day5_icm_grade: Option<String>,
    pub day5_te_grade: Option<String>,
    pub day5_expansion: Option<i32>,
    pub day5_overall_grade: Option<String>,
    pub day6_stage: Option<String>,
    pub day6_grade: Option<String>,
    pub transfer_date: Option<NaiveDate>,
    pub freeze_date: Option<NaiveDate>,
    pub discard_date: Option<NaiveDate>,
    pub discard_reason: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbEmbryo> for Embryo {
    type Error = IvfError;

    fn try_from(db: DbEmbryo) -> Result<Self, Self::Error> {
        Ok(Embryo {
            id: db.id,
            clinic_id: db.clinic_id,
            cycle_id: db.cycle_id,
            fertilization_id: db.fertilization_id,
            embryo_number: db.embryo_number,
            status: parse_column("status", &db.status)?,
            grading: EmbryoGrading {
                day2: CleavageGrade {
                    cell_count: db.day2_cell_count,
                    grade: db.day2_grade,
                    fragmentation: db.day2_fragmentation,
                    symmetry: db.day2_symmetry,
                },
                day3: CleavageGrade {
                    cell_count: db.day3_cell_count,
                    grade: db.day3_grade,
                    fragmentation: db.day3_fragmentation,
                    symmetry: db.day3_symmetry,
                },
                day4: StageGrade {
                    stage: db.day4_stage,
                    grade: db.day4_grade,
                },
                day5: BlastocystGrade {
                    stage: db.day5_stage,
                    icm_grade: db.day5_icm_grade,
                    te_grade: db.day5_te_grade,
                    expansion: db.day5_expansion,
                    overall_grade: db.day5_overall_grade,
                },
                day6: StageGrade {
                    stage: db.day6_stage,
                    grade: db.day6_grade,
                },
            },
            transfer_date: db.transfer_date,
            freeze_date: db.freeze_date,
            discard_date: db.discard_date,
            discard_reason: db.discard_reason,
            notes: db.notes,
            created_at: db.created_at,
            updated_at: db.updated_at,
        })
    }
}

/// 数据库移植表
#[derive(Debug, FromRow)]
pub struct DbEmbryoTransfer {
    pub id: Uuid,
    pub cycle_id: Uuid,
    pub transfer_date: NaiveDate,
    pub embryo_ids: Vec<Uuid>,
    pub number_of_embryos: i32,
    pub catheter_type: Option<String>,
    pub ultrasound_guided: bool,
    pub difficulty: Option<String>,
    pub complications: Option<String>,
    pub performed_by: Option<Uuid>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbEmbryoTransfer> for EmbryoTransfer {
    type Error = IvfError;

    fn try_from(db: DbEmbryoTransfer) -> Result<Self, Self::Error> {
        Ok(EmbryoTransfer {
            id: db.id,
            cycle_id: db.cycle_id,
            transfer_date: db.transfer_date,
            embryo_ids: db.embryo_ids,
            number_of_embryos: db.number_of_embryos,
            catheter_type: db.catheter_type,
            ultrasound_guided: db.ultrasound_guided,
            difficulty: db
                .difficulty
                .as_deref()
                .map(|v| parse_column("difficulty", v))
                .transpose()?,
            complications: db.complications,
            performed_by: db.performed_by,
            notes: db.notes,
            created_at: db.created_at,
        })
    }
}

/// 数据库冷冻保存表
#[derive(Debug, FromRow)]
pub struct DbCryopreservation {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub cycle_id: Uuid,
    pub specimen_type: String,
    pub freeze_date: NaiveDate,
    pub storage_tank: String,
    pub storage_canister: Option<String>,
    pub storage_cane: Option<String>,
    pub storage_position: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub consent_signed: bool,
    pub specimens: Json<Vec<FrozenSpecimen>>,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbCryopreservation> for CryopreservationRecord {
    type Error = IvfError;

    fn try_from(db: DbCryopreservation) -> Result<Self, Self::Error> {
        Ok(CryopreservationRecord {
            id: db.id,
            clinic_id: db.clinic_id,
            patient_id: db.patient_id,
            cycle_id: db.cycle_id,
            specimen_type: parse_column("specimen_type", &db.specimen_type)?,
            freeze_date: db.freeze_date,
            location: StorageLocation {
                tank: db.storage_tank,
                canister: db.storage_canister,
                cane: db.storage_cane,
                position: db.storage_position,
            },
            expiry_date: db.expiry_date,
            consent_signed: db.consent_signed,
            specimens: db.specimens.0,
            notes: db.notes,
            created_by: db.created_by,
            created_at: db.created_at,
        })
    }
}

/// 数据库妊娠结局表
#[derive(Debug, FromRow)]
pub struct DbPregnancyOutcome {
    pub id: Uuid,
    pub cycle_id: Uuid,
    pub first_beta_value: Option<f64>,
    pub first_beta_date: Option<NaiveDate>,
    pub second_beta_value: Option<f64>,
    pub second_beta_date: Option<NaiveDate>,
    pub beta_doubling_time_hours: Option<f64>,
    pub cycle_outcome: String,
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

impl TryFrom<DbPregnancyOutcome> for PregnancyOutcome {
    type Error = IvfError;

    fn try_from(db: DbPregnancyOutcome) -> Result<Self, Self::Error> {
        Ok(PregnancyOutcome {
            id: db.id,
            cycle_id: db.cycle_id,
            first_beta_value: db.first_beta_value,
            first_beta_date: db.first_beta_date,
            second_beta_value: db.second_beta_value,
            second_beta_date: db.second_beta_date,
            beta_doubling_time_hours: db.beta_doubling_time_hours,
            cycle_outcome: parse_column("cycle_outcome", &db.cycle_outcome)?,
            clinical_pregnancy: db.clinical_pregnancy,
            gestational_sacs: db.gestational_sacs,
            fetal_heartbeats: db.fetal_heartbeats,
            ultrasound_date: db.ultrasound_date,
            delivery_date: db.delivery_date,
            delivery_type: db.delivery_type,
            live_births: db.live_births,
            birth_weights_grams: db.birth_weights_grams,
            notes: db.notes,
            created_at: db.created_at,
        })
    }
}

/// 数据库审计发件箱表
#[derive(Debug, FromRow)]
pub struct DbAuditEntry {
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

impl From<DbAuditEntry> for AuditEntry {
    fn from(db: DbAuditEntry) -> Self {
        AuditEntry {
            id: db.id,
            clinic_id: db.clinic_id,
            user_id: db.user_id,
            action: db.action,
            entity_table: db.entity_table,
            entity_id: db.entity_id,
            changes: db.changes,
            created_at: db.created_at,
            delivered_at: db.delivered_at,
        }
    }
}
