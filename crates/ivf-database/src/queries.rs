//! 数据库查询操作
//!
//! `PgStore` 基于 PostgreSQL 事务实现 `CycleStore`，所有语句均为参数化查询。

use crate::connection::DatabasePool;
use crate::models::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ivf_core::models::*;
use ivf_core::store::{CycleStore, CycleTransaction, PatientDirectory};
use ivf_core::{IvfError, Result};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

/// PostgreSQL 存储
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DatabasePool,
}

impl PgStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// 创建数据库表
    pub async fn create_tables(&self) -> Result<()> {
        let pool = self.pool.pool();

        for ddl in SCHEMA {
            sqlx::query(ddl).execute(pool).await?;
        }

        // 创建索引以优化查询性能
        self.create_indexes().await?;

        tracing::info!("Database tables created successfully");
        Ok(())
    }

    /// 创建数据库索引
    async fn create_indexes(&self) -> Result<()> {
        let pool = self.pool.pool();

        let indexes = vec![
            "CREATE INDEX IF NOT EXISTS idx_patients_clinic_id ON patients(clinic_id)",
            "CREATE INDEX IF NOT EXISTS idx_cycles_clinic_patient ON ivf_cycles(clinic_id, patient_id)",
            "CREATE INDEX IF NOT EXISTS idx_monitoring_cycle_id ON stimulation_monitoring(cycle_id, monitoring_date)",
            "CREATE INDEX IF NOT EXISTS idx_egg_retrievals_cycle_id ON egg_retrievals(cycle_id)",
            "CREATE INDEX IF NOT EXISTS idx_sperm_samples_cycle_id ON sperm_samples(cycle_id)",
            "CREATE INDEX IF NOT EXISTS idx_fertilizations_cycle_id ON fertilizations(cycle_id)",
            "CREATE INDEX IF NOT EXISTS idx_embryos_cycle_id ON embryos(cycle_id)",
            "CREATE INDEX IF NOT EXISTS idx_embryo_transfers_cycle_id ON embryo_transfers(cycle_id)",
            "CREATE INDEX IF NOT EXISTS idx_cryopreservations_cycle_id ON cryopreservations(cycle_id)",
            "CREATE INDEX IF NOT EXISTS idx_audit_outbox_pending ON audit_outbox(created_at) WHERE delivered_at IS NULL",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql).execute(pool).await?;
        }

        tracing::info!("Database indexes created successfully");
        Ok(())
    }
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS patients (
        id UUID PRIMARY KEY,
        clinic_id UUID NOT NULL,
        full_name VARCHAR(255) NOT NULL,
        patient_code VARCHAR(64) NOT NULL,
        UNIQUE (clinic_id, patient_code)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ivf_cycles (
        id UUID PRIMARY KEY,
        clinic_id UUID NOT NULL,
        patient_id UUID NOT NULL REFERENCES patients(id),
        cycle_number INTEGER NOT NULL,
        cycle_code VARCHAR(80) NOT NULL,
        cycle_type VARCHAR(32) NOT NULL,
        protocol VARCHAR(64),
        start_date DATE NOT NULL,
        expected_egg_retrieval DATE,
        actual_egg_retrieval DATE,
        embryo_transfer_date DATE,
        current_stage VARCHAR(20) NOT NULL DEFAULT 'consultation',
        cycle_outcome VARCHAR(16),
        pregnancy_result BOOLEAN,
        doctor_id UUID,
        embryologist_id UUID,
        notes TEXT,
        created_by UUID NOT NULL,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
        UNIQUE (patient_id, cycle_number)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stimulation_monitoring (
        id UUID PRIMARY KEY,
        cycle_id UUID NOT NULL REFERENCES ivf_cycles(id),
        monitoring_date DATE NOT NULL,
        stimulation_day INTEGER,
        estradiol_pg_ml DOUBLE PRECISION,
        lh_iu_l DOUBLE PRECISION,
        progesterone_ng_ml DOUBLE PRECISION,
        fsh_iu_l DOUBLE PRECISION,
        endometrial_thickness_mm DOUBLE PRECISION,
        right_ovary_follicles JSONB NOT NULL DEFAULT '[]',
        left_ovary_follicles JSONB NOT NULL DEFAULT '[]',
        medications JSONB NOT NULL DEFAULT '[]',
        next_visit DATE,
        notes TEXT,
        recorded_by UUID NOT NULL,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS egg_retrievals (
        id UUID PRIMARY KEY,
        cycle_id UUID NOT NULL REFERENCES ivf_cycles(id),
        retrieval_date DATE NOT NULL,
        right_ovary_eggs INTEGER NOT NULL DEFAULT 0,
        left_ovary_eggs INTEGER NOT NULL DEFAULT 0,
        total_eggs_retrieved INTEGER NOT NULL DEFAULT 0,
        mature_eggs INTEGER,
        anesthesia_type VARCHAR(64),
        complications TEXT,
        performed_by UUID,
        notes TEXT,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sperm_samples (
        id UUID PRIMARY KEY,
        cycle_id UUID NOT NULL REFERENCES ivf_cycles(id),
        collection_date DATE NOT NULL,
        sample_source VARCHAR(32),
        volume_ml DOUBLE PRECISION,
        concentration_m_per_ml DOUBLE PRECISION,
        total_motility_pct DOUBLE PRECISION,
        progressive_motility_pct DOUBLE PRECISION,
        normal_morphology_pct DOUBLE PRECISION,
        preparation_method VARCHAR(64),
        notes TEXT,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fertilizations (
        id UUID PRIMARY KEY,
        cycle_id UUID NOT NULL REFERENCES ivf_cycles(id),
        egg_retrieval_id UUID REFERENCES egg_retrievals(id),
        sperm_sample_id UUID REFERENCES sperm_samples(id),
        fertilization_date DATE NOT NULL,
        method VARCHAR(32),
        eggs_inseminated INTEGER NOT NULL DEFAULT 0,
        two_pn_normal INTEGER NOT NULL DEFAULT 0,
        one_pn INTEGER,
        three_pn INTEGER,
        degenerated INTEGER,
        fertilization_rate DOUBLE PRECISION NOT NULL DEFAULT 0,
        notes TEXT,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS embryos (
        id UUID PRIMARY KEY,
        clinic_id UUID NOT NULL,
        cycle_id UUID NOT NULL REFERENCES ivf_cycles(id),
        fertilization_id UUID NOT NULL REFERENCES fertilizations(id),
        embryo_number INTEGER NOT NULL,
        status VARCHAR(16) NOT NULL DEFAULT 'developing',
        day2_cell_count INTEGER,
        day2_grade VARCHAR(16),
        day2_fragmentation VARCHAR(16),
        day2_symmetry VARCHAR(16),
        day3_cell_count INTEGER,
        day3_grade VARCHAR(16),
        day3_fragmentation VARCHAR(16),
        day3_symmetry VARCHAR(16),
        day4_stage VARCHAR(32),
        day4_grade VARCHAR(16),
        day5_stage VARCHAR(32),
        day5_icm_grade VARCHAR(8),
        day5_te_grade VARCHAR(8),
        day5_expansion INTEGER,
        day5_overall_grade VARCHAR(16),
        day6_stage VARCHAR(32),
        day6_grade VARCHAR(16),
        transfer_date DATE,
        freeze_date DATE,
        discard_date DATE,
        discard_reason TEXT,
        notes TEXT,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
        UNIQUE (cycle_id, embryo_number)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS embryo_transfers (
        id UUID PRIMARY KEY,
        cycle_id UUID NOT NULL REFERENCES ivf_cycles(id),
        transfer_date DATE NOT NULL,
        embryo_ids UUID[] NOT NULL,
        number_of_embryos INTEGER NOT NULL,
        catheter_type VARCHAR(64),
        ultrasound_guided BOOLEAN NOT NULL DEFAULT FALSE,
        difficulty VARCHAR(16),
        complications TEXT,
        performed_by UUID,
        notes TEXT,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cryopreservations (
        id UUID PRIMARY KEY,
        clinic_id UUID NOT NULL,
        patient_id UUID NOT NULL REFERENCES patients(id),
        cycle_id UUID NOT NULL REFERENCES ivf_cycles(id),
        specimen_type VARCHAR(16) NOT NULL,
        freeze_date DATE NOT NULL,
        storage_tank VARCHAR(32) NOT NULL,
        storage_canister VARCHAR(32),
        storage_cane VARCHAR(32),
        storage_position VARCHAR(32),
        expiry_date DATE,
        consent_signed BOOLEAN NOT NULL DEFAULT FALSE,
        specimens JSONB NOT NULL DEFAULT '[]',
        notes TEXT,
        created_by UUID NOT NULL,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pregnancy_outcomes (
        id UUID PRIMARY KEY,
        cycle_id UUID NOT NULL UNIQUE REFERENCES ivf_cycles(id),
        first_beta_value DOUBLE PRECISION,
        first_beta_date DATE,
        second_beta_value DOUBLE PRECISION,
        second_beta_date DATE,
        beta_doubling_time_hours DOUBLE PRECISION,
        cycle_outcome VARCHAR(16) NOT NULL,
        clinical_pregnancy BOOLEAN,
        gestational_sacs INTEGER,
        fetal_heartbeats INTEGER,
        ultrasound_date DATE,
        delivery_date DATE,
        delivery_type VARCHAR(32),
        live_births INTEGER,
        birth_weights_grams INTEGER[] NOT NULL DEFAULT '{}',
        notes TEXT,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audit_outbox (
        id UUID PRIMARY KEY,
        clinic_id UUID NOT NULL,
        user_id UUID NOT NULL,
        action VARCHAR(64) NOT NULL,
        entity_table VARCHAR(64) NOT NULL,
        entity_id UUID NOT NULL,
        changes JSONB,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
        delivered_at TIMESTAMP WITH TIME ZONE
    )
    "#,
];

#[async_trait]
impl CycleStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn CycleTransaction>> {
        let tx = self.pool.pool().begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

/// 外部患者登记处的 PostgreSQL 实现（只读 `patients` 表）
#[derive(Debug, Clone)]
pub struct PgPatientDirectory {
    pool: DatabasePool,
}

impl PgPatientDirectory {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PatientDirectory for PgPatientDirectory {
    async fn find_by_id(&self, clinic_id: Uuid, patient_id: Uuid) -> Result<Option<PatientRef>> {
        let result = sqlx::query_as::<_, DbPatient>(
            "SELECT id, clinic_id, full_name, patient_code FROM patients WHERE id = $1 AND clinic_id = $2",
        )
        .bind(patient_id)
        .bind(clinic_id)
        .fetch_optional(self.pool.pool())
        .await?;

        Ok(result.map(PatientRef::from))
    }
}

/// PostgreSQL 事务
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CycleTransaction for PgTransaction {
    // ========== 周期相关操作 ==========

    async fn next_cycle_number(&mut self, clinic_id: Uuid, patient_id: Uuid) -> Result<i32> {
        let next = sqlx::query_scalar::<_, i32>(
            "SELECT COALESCE(MAX(cycle_number), 0) + 1 FROM ivf_cycles WHERE clinic_id = $1 AND patient_id = $2",
        )
        .bind(clinic_id)
        .bind(patient_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(next)
    }

    async fn insert_cycle(&mut self, cycle: &Cycle) -> Result<()> {
        sqlx::query(r#"
            INSERT INTO ivf_cycles (id, clinic_id, patient_id, cycle_number, cycle_code, cycle_type, protocol,
                start_date, expected_egg_retrieval, actual_egg_retrieval, embryo_transfer_date, current_stage,
                cycle_outcome, pregnancy_result, doctor_id, embryologist_id, notes, created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
        "#)
        .bind(cycle.id)
        .bind(cycle.clinic_id)
        .bind(cycle.patient_id)
        .bind(cycle.cycle_number)
        .bind(&cycle.cycle_code)
        .bind(&cycle.cycle_type)
        .bind(&cycle.protocol)
        .bind(cycle.start_date)
        .bind(cycle.expected_egg_retrieval)
        .bind(cycle.actual_egg_retrieval)
        .bind(cycle.embryo_transfer_date)
        .bind(cycle.current_stage.as_str())
        .bind(cycle.cycle_outcome.map(|o| o.as_str()))
        .bind(cycle.pregnancy_result)
        .bind(cycle.doctor_id)
        .bind(cycle.embryologist_id)
        .bind(&cycle.notes)
        .bind(cycle.created_by)
        .bind(cycle.created_at)
        .bind(cycle.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn find_cycle(&mut self, clinic_id: Uuid, cycle_id: Uuid) -> Result<Option<Cycle>> {
        let result = sqlx::query_as::<_, DbCycle>(
            "SELECT * FROM ivf_cycles WHERE id = $1 AND clinic_id = $2 FOR UPDATE",
        )
        .bind(cycle_id)
        .bind(clinic_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        result.map(Cycle::try_from).transpose()
    }

    async fn update_cycle(&mut self, cycle: &Cycle) -> Result<()> {
        // cycle_number / cycle_code 创建后不可变，不在更新列中
        sqlx::query(r#"
            UPDATE ivf_cycles SET
                cycle_type = $1, protocol = $2, start_date = $3, expected_egg_retrieval = $4,
                actual_egg_retrieval = $5, embryo_transfer_date = $6, current_stage = $7,
                cycle_outcome = $8, pregnancy_result = $9, doctor_id = $10, embryologist_id = $11,
                notes = $12, updated_at = $13
            WHERE id = $14 AND clinic_id = $15
        "#)
        .bind(&cycle.cycle_type)
        .bind(&cycle.protocol)
        .bind(cycle.start_date)
        .bind(cycle.expected_egg_retrieval)
        .bind(cycle.actual_egg_retrieval)
        .bind(cycle.embryo_transfer_date)
        .bind(cycle.current_stage.as_str())
        .bind(cycle.cycle_outcome.map(|o| o.as_str()))
        .bind(cycle.pregnancy_result)
        .bind(cycle.doctor_id)
        .bind(cycle.embryologist_id)
        .bind(&cycle.notes)
        .bind(cycle.updated_at)
        .bind(cycle.id)
        .bind(cycle.clinic_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn list_cycles_for_patient(&mut self, clinic_id: Uuid, patient_id: Uuid) -> Result<Vec<Cycle>> {
        let rows = sqlx::query_as::<_, DbCycle>(
            "SELECT * FROM ivf_cycles WHERE clinic_id = $1 AND patient_id = $2 ORDER BY cycle_number",
        )
        .bind(clinic_id)
        .bind(patient_id)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(Cycle::try_from).collect()
    }

    // ========== 临床事件相关操作 ==========

    async fn insert_monitoring(&mut self, entry: &MonitoringEntry) -> Result<()> {
        sqlx::query(r#"
            INSERT INTO stimulation_monitoring (id, cycle_id, monitoring_date, stimulation_day, estradiol_pg_ml,
                lh_iu_l, progesterone_ng_ml, fsh_iu_l, endometrial_thickness_mm, right_ovary_follicles,
                left_ovary_follicles, medications, next_visit, notes, recorded_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        "#)
        .bind(entry.id)
        .bind(entry.cycle_id)
        .bind(entry.monitoring_date)
        .bind(entry.stimulation_day)
        .bind(entry.estradiol_pg_ml)
        .bind(entry.lh_iu_l)
        .bind(entry.progesterone_ng_ml)
        .bind(entry.fsh_iu_l)
        .bind(entry.endometrial_thickness_mm)
        .bind(Json(&entry.right_ovary_follicles))
        .bind(Json(&entry.left_ovary_follicles))
        .bind(Json(&entry.medications))
        .bind(entry.next_visit)
        .bind(&entry.notes)
        .bind(entry.recorded_by)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn list_monitoring(&mut self, cycle_id: Uuid) -> Result<Vec<MonitoringEntry>> {
        let rows = sqlx::query_as::<_, DbMonitoringEntry>(
            "SELECT * FROM stimulation_monitoring WHERE cycle_id = $1 ORDER BY monitoring_date, created_at",
        )
        .bind(cycle_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.into_iter().map(MonitoringEntry::from).collect())
    }

    async fn insert_egg_retrieval(&mut self, retrieval: &EggRetrieval) -> Result<()> {
        sqlx::query(r#"
            INSERT INTO egg_retrievals (id, cycle_id, retrieval_date, right_ovary_eggs, left_ovary_eggs,
                total_eggs_retrieved, mature_eggs, anesthesia_type, complications, performed_by, notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#)
        .bind(retrieval.id)
        .bind(retrieval.cycle_id)
        .bind(retrieval.retrieval_date)
        .bind(retrieval.right_ovary_eggs)
        .bind(retrieval.left_ovary_eggs)
        .bind(retrieval.total_eggs_retrieved)
        .bind(retrieval.mature_eggs)
        .bind(&retrieval.anesthesia_type)
        .bind(&retrieval.complications)
        .bind(retrieval.performed_by)
        .bind(&retrieval.notes)
        .bind(retrieval.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn find_egg_retrieval(&mut self, cycle_id: Uuid, retrieval_id: Uuid) -> Result<Option<EggRetrieval>> {
        let result = sqlx::query_as::<_, DbEggRetrieval>(
            "SELECT * FROM egg_retrievals WHERE id = $1 AND cycle_id = $2",
        )
        .bind(retrieval_id)
        .bind(cycle_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(result.map(EggRetrieval::from))
    }

    async fn latest_egg_retrieval(&mut self, cycle_id: Uuid) -> Result<Option<EggRetrieval>> {
        let result = sqlx::query_as::<_, DbEggRetrieval>(
            "SELECT * FROM egg_retrievals WHERE cycle_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(cycle_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(result.map(EggRetrieval::from))
    }

    async fn insert_sperm_sample(&mut self, sample: &SpermSample) -> Result<()> {
        sqlx::query(r#"
            INSERT INTO sperm_samples (id, cycle_id, collection_date, sample_source, volume_ml,
                concentration_m_per_ml, total_motility_pct, progressive_motility_pct, normal_morphology_pct,
                preparation_method, notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#)
        .bind(sample.id)
        .bind(sample.cycle_id)
        .bind(sample.collection_date)
        .bind(&sample.sample_source)
        .bind(sample.volume_ml)
        .bind(sample.concentration_m_per_ml)
        .bind(sample.total_motility_pct)
        .bind(sample.progressive_motility_pct)
        .bind(sample.normal_morphology_pct)
        .bind(&sample.preparation_method)
        .bind(&sample.notes)
        .bind(sample.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn find_sperm_sample(&mut self, cycle_id: Uuid, sample_id: Uuid) -> Result<Option<SpermSample>> {
        let result = sqlx::query_as::<_, DbSpermSample>(
            "SELECT * FROM sperm_samples WHERE id = $1 AND cycle_id = $2",
        )
        .bind(sample_id)
        .bind(cycle_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(result.map(SpermSample::from))
    }

    async fn list_sperm_samples(&mut self, cycle_id: Uuid) -> Result<Vec<SpermSample>> {
        let rows = sqlx::query_as::<_, DbSpermSample>(
            "SELECT * FROM sperm_samples WHERE cycle_id = $1 ORDER BY collection_date, created_at",
        )
        .bind(cycle_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.into_iter().map(SpermSample::from).collect())
    }

    async fn insert_fertilization(&mut self, fertilization: &Fertilization) -> Result<()> {
        sqlx::query(r#"
            INSERT INTO fertilizations (id, cycle_id, egg_retrieval_id, sperm_sample_id, fertilization_date, method,
                eggs_inseminated, two_pn_normal, one_pn, three_pn, degenerated, fertilization_rate, notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#)
        .bind(fertilization.id)
        .bind(fertilization.cycle_id)
        .bind(fertilization.egg_retrieval_id)
        .bind(fertilization.sperm_sample_id)
        .bind(fertilization.fertilization_date)
        .bind(&fertilization.method)
        .bind(fertilization.eggs_inseminated)
        .bind(fertilization.two_pn_normal)
        .bind(fertilization.one_pn)
        .bind(fertilization.three_pn)
        .bind(fertilization.degenerated)
        .bind(fertilization.fertilization_rate)
        .bind(&fertilization.notes)
        .bind(fertilization.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn list_fertilizations(&mut self, cycle_id: Uuid) -> Result<Vec<Fertilization>> {
        let rows = sqlx::query_as::<_, DbFertilization>(
            "SELECT * FROM fertilizations WHERE cycle_id = $1 ORDER BY created_at",
        )
        .bind(cycle_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.into_iter().map(Fertilization::from).collect())
    }

    // ========== 胚胎相关操作 ==========

    async fn insert_embryo(&mut self, embryo: &Embryo) -> Result<()> {
        sqlx::query(r#"
            INSERT INTO embryos (id, clinic_id, cycle_id, fertilization_id, embryo_number, status, notes,
                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#)
        .bind(embryo.id)
        .bind(embryo.clinic_id)
        .bind(embryo.cycle_id)
        .bind(embryo.fertilization_id)
        .bind(embryo.embryo_number)
        .bind(embryo.status.as_str())
        .bind(&embryo.notes)
        .bind(embryo.created_at)
        .bind(embryo.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn find_embryo(&mut self, clinic_id: Uuid, embryo_id: Uuid) -> Result<Option<Embryo>> {
        let result = sqlx::query_as::<_, DbEmbryo>(
            "SELECT * FROM embryos WHERE id = $1 AND clinic_id = $2 FOR UPDATE",
        )
        .bind(embryo_id)
        .bind(clinic_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        result.map(Embryo::try_from).transpose()
    }

    async fn update_embryo(&mut self, embryo: &Embryo) -> Result<()> {
        let g = &embryo.grading;
        sqlx::query(r#"
            UPDATE embryos SET
                status = $1,
                day2_cell_count = $2, day2_grade = $3, day2_fragmentation = $4, day2_symmetry = $5,
                day3_cell_count = $6, day3_grade = $7, day3_fragmentation = $8, day3_symmetry = $9,
                day4_stage = $10, day4_grade = $11,
                day5_stage = $12, day5_icm_grade = $13, day5_te_grade = $14, day5_expansion = $15,
                day5_overall_grade = $16,
                day6_stage = $17, day6_grade = $18,
                transfer_date = $19, freeze_date = $20, discard_date = $21, discard_reason = $22,
                notes = $23, updated_at = $24
            WHERE id = $25 AND clinic_id = $26
        "#)
        .bind(embryo.status.as_str())
        .bind(g.day2.cell_count)
        .bind(&g.day2.grade)
        .bind(&g.day2.fragmentation)
        .bind(&g.day2.symmetry)
        .bind(g.day3.cell_count)
        .bind(&g.day3.grade)
        .bind(&g.day3.fragmentation)
        .bind(&g.day3.symmetry)
        .bind(&g.day4.stage)
        .bind(&g.day4.grade)
        .bind(&g.day5.stage)
        .bind(&g.day5.icm_grade)
        .bind(&g.day5.te_grade)
        .bind(g.day5.expansion)
        .bind(&g.day5.overall_grade)
        .bind(&g.day6.stage)
        .bind(&g.day6.grade)
        .bind(embryo.transfer_date)
        .bind(embryo.freeze_date)
        .bind(embryo.discard_date)
        .bind(&embryo.discard_reason)
        .bind(&embryo.notes)
        .bind(embryo.updated_at)
        .bind(embryo.id)
        .bind(embryo.clinic_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn list_embryos(&mut self, cycle_id: Uuid) -> Result<Vec<Embryo>> {
        let rows = sqlx::query_as::<_, DbEmbryo>(
            "SELECT * FROM embryos WHERE cycle_id = $1 ORDER BY embryo_number",
        )
        .bind(cycle_id)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(Embryo::try_from).collect()
    }

    async fn max_embryo_number(&mut self, cycle_id: Uuid) -> Result<i32> {
        let max = sqlx::query_scalar::<_, i32>(
            "SELECT COALESCE(MAX(embryo_number), 0) FROM embryos WHERE cycle_id = $1",
        )
        .bind(cycle_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(max)
    }

    async fn insert_transfer(&mut self, transfer: &EmbryoTransfer) -> Result<()> {
        sqlx::query(r#"
            INSERT INTO embryo_transfers (id, cycle_id, transfer_date, embryo_ids, number_of_embryos, catheter_type,
                ultrasound_guided, difficulty, complications, performed_by, notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#)
        .bind(transfer.id)
        .bind(transfer.cycle_id)
        .bind(transfer.transfer_date)
        .bind(transfer.embryo_ids.clone())
        .bind(transfer.number_of_embryos)
        .bind(&transfer.catheter_type)
        .bind(transfer.ultrasound_guided)
        .bind(transfer.difficulty.map(|d| d.as_str()))
        .bind(&transfer.complications)
        .bind(transfer.performed_by)
        .bind(&transfer.notes)
        .bind(transfer.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn list_transfers(&mut self, cycle_id: Uuid) -> Result<Vec<EmbryoTransfer>> {
        let rows = sqlx::query_as::<_, DbEmbryoTransfer>(
            "SELECT * FROM embryo_transfers WHERE cycle_id = $1 ORDER BY transfer_date, created_at",
        )
        .bind(cycle_id)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(EmbryoTransfer::try_from).collect()
    }

    async fn insert_cryopreservation(&mut self, record: &CryopreservationRecord) -> Result<()> {
        sqlx::query(r#"
            INSERT INTO cryopreservations (id, clinic_id, patient_id, cycle_id, specimen_type, freeze_date,
                storage_tank, storage_canister, storage_cane, storage_position, expiry_date, consent_signed,
                specimens, notes, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        "#)
        .bind(record.id)
        .bind(record.clinic_id)
        .bind(record.patient_id)
        .bind(record.cycle_id)
        .bind(record.specimen_type.as_str())
        .bind(record.freeze_date)
        .bind(&record.location.tank)
        .bind(&record.location.canister)
        .bind(&record.location.cane)
        .bind(&record.location.position)
        .bind(record.expiry_date)
        .bind(record.consent_signed)
        .bind(Json(&record.specimens))
        .bind(&record.notes)
        .bind(record.created_by)
        .bind(record.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn list_cryopreservations(&mut self, cycle_id: Uuid) -> Result<Vec<CryopreservationRecord>> {
        let rows = sqlx::query_as::<_, DbCryopreservation>(
            "SELECT * FROM cryopreservations WHERE cycle_id = $1 ORDER BY freeze_date, created_at",
        )
        .bind(cycle_id)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(CryopreservationRecord::try_from).collect()
    }

    // ========== 结局相关操作 ==========

    async fn insert_outcome(&mut self, outcome: &PregnancyOutcome) -> Result<()> {
        sqlx::query(r#"
            INSERT INTO pregnancy_outcomes (id, cycle_id, first_beta_value, first_beta_date, second_beta_value,
                second_beta_date, beta_doubling_time_hours, cycle_outcome, clinical_pregnancy, gestational_sacs,
                fetal_heartbeats, ultrasound_date, delivery_date, delivery_type, live_births, birth_weights_grams,
                notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        "#)
        .bind(outcome.id)
        .bind(outcome.cycle_id)
        .bind(outcome.first_beta_value)
        .bind(outcome.first_beta_date)
        .bind(outcome.second_beta_value)
        .bind(outcome.second_beta_date)
        .bind(outcome.beta_doubling_time_hours)
        .bind(outcome.cycle_outcome.as_str())
        .bind(outcome.clinical_pregnancy)
        .bind(outcome.gestational_sacs)
        .bind(outcome.fetal_heartbeats)
        .bind(outcome.ultrasound_date)
        .bind(outcome.delivery_date)
        .bind(&outcome.delivery_type)
        .bind(outcome.live_births)
        .bind(outcome.birth_weights_grams.clone())
        .bind(&outcome.notes)
        .bind(outcome.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn find_outcome(&mut self, cycle_id: Uuid) -> Result<Option<PregnancyOutcome>> {
        let result = sqlx::query_as::<_, DbPregnancyOutcome>(
            "SELECT * FROM pregnancy_outcomes WHERE cycle_id = $1",
        )
        .bind(cycle_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        result.map(PregnancyOutcome::try_from).transpose()
    }

    // ========== 审计发件箱 ==========

    async fn enqueue_audit(&mut self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(r#"
            INSERT INTO audit_outbox (id, clinic_id, user_id, action, entity_table, entity_id, changes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#)
        .bind(entry.id)
        .bind(entry.clinic_id)
        .bind(entry.user_id)
        .bind(&entry.action)
        .bind(&entry.entity_table)
        .bind(entry.entity_id)
        .bind(&entry.changes)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn pending_audit(&mut self, limit: i64) -> Result<Vec<AuditEntry>> {
        // SKIP LOCKED 允许多个投递进程并行而不重复投递
        let rows = sqlx::query_as::<_, DbAuditEntry>(
            "SELECT * FROM audit_outbox WHERE delivered_at IS NULL ORDER BY created_at LIMIT $1 FOR UPDATE SKIP LOCKED",
        )
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.into_iter().map(AuditEntry::from).collect())
    }

    async fn mark_audit_delivered(&mut self, ids: &[Uuid], delivered_at: DateTime<Utc>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        sqlx::query("UPDATE audit_outbox SET delivered_at = $1 WHERE id = ANY($2)")
            .bind(delivered_at)
            .bind(ids.to_vec())
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    // ========== 事务控制 ==========

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(IvfError::from)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(IvfError::from)
    }
}
