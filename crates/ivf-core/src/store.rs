//! 存储接口
//!
//! 业务层只依赖这里的事务接口：先 `begin`，在事务内执行参数化语句，
//! 最后 `commit` 或 `rollback`。事务对象在未提交时被丢弃等同于回滚。

use crate::error::Result;
use crate::models::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// 外部患者登记处
#[async_trait]
pub trait PatientDirectory: Send + Sync {
    /// 按诊所与患者ID查找；跨诊所访问与不存在同样返回 `None`
    async fn find_by_id(&self, clinic_id: Uuid, patient_id: Uuid) -> Result<Option<PatientRef>>;
}

/// 事务提供者
#[async_trait]
pub trait CycleStore: Send + Sync {
    /// 开启事务
    async fn begin(&self) -> Result<Box<dyn CycleTransaction>>;
}

/// 单个事务内可执行的语句
#[async_trait]
pub trait CycleTransaction: Send {
    // ========== 周期 ==========

    /// 该患者下一个周期序号（已有最大序号 + 1）
    async fn next_cycle_number(&mut self, clinic_id: Uuid, patient_id: Uuid) -> Result<i32>;

    /// 插入周期；序号重复时返回 `IvfError::Conflict`
    async fn insert_cycle(&mut self, cycle: &Cycle) -> Result<()>;

    /// 读取周期并锁定该行直到事务结束
    async fn find_cycle(&mut self, clinic_id: Uuid, cycle_id: Uuid) -> Result<Option<Cycle>>;

    async fn update_cycle(&mut self, cycle: &Cycle) -> Result<()>;

    async fn list_cycles_for_patient(&mut self, clinic_id: Uuid, patient_id: Uuid) -> Result<Vec<Cycle>>;

    // ========== 临床事件 ==========

    async fn insert_monitoring(&mut self, entry: &MonitoringEntry) -> Result<()>;

    async fn list_monitoring(&mut self, cycle_id: Uuid) -> Result<Vec<MonitoringEntry>>;

    async fn insert_egg_retrieval(&mut self, retrieval: &EggRetrieval) -> Result<()>;

    async fn find_egg_retrieval(&mut self, cycle_id: Uuid, retrieval_id: Uuid) -> Result<Option<EggRetrieval>>;

    async fn latest_egg_retrieval(&mut self, cycle_id: Uuid) -> Result<Option<EggRetrieval>>;

    async fn insert_sperm_sample(&mut self, sample: &SpermSample) -> Result<()>;

    async fn find_sperm_sample(&mut self, cycle_id: Uuid, sample_id: Uuid) -> Result<Option<SpermSample>>;

    async fn list_sperm_samples(&mut self, cycle_id: Uuid) -> Result<Vec<SpermSample>>;

    async fn insert_fertilization(&mut self, fertilization: &Fertilization) -> Result<()>;

    async fn list_fertilizations(&mut self, cycle_id: Uuid) -> Result<Vec<Fertilization>>;

    // ========== 胚胎 ==========

    async fn insert_embryo(&mut self, embryo: &Embryo) -> Result<()>;

    /// 读取胚胎并锁定该行
    async fn find_embryo(&mut self, clinic_id: Uuid, embryo_id: Uuid) -> Result<Option<Embryo>>;

    async fn update_embryo(&mut self, embryo: &Embryo) -> Result<()>;

    /// 按胚胎编号升序
    async fn list_embryos(&mut self, cycle_id: Uuid) -> Result<Vec<Embryo>>;

    /// 周期内已用的最大胚胎编号，没有胚胎时为0
    async fn max_embryo_number(&mut self, cycle_id: Uuid) -> Result<i32>;

    async fn insert_transfer(&mut self, transfer: &EmbryoTransfer) -> Result<()>;

    async fn list_transfers(&mut self, cycle_id: Uuid) -> Result<Vec<EmbryoTransfer>>;

    async fn insert_cryopreservation(&mut self, record: &CryopreservationRecord) -> Result<()>;

    async fn list_cryopreservations(&mut self, cycle_id: Uuid) -> Result<Vec<CryopreservationRecord>>;

    // ========== 结局 ==========

    /// 每个周期至多一条；重复时返回 `IvfError::Conflict`
    async fn insert_outcome(&mut self, outcome: &PregnancyOutcome) -> Result<()>;

    async fn find_outcome(&mut self, cycle_id: Uuid) -> Result<Option<PregnancyOutcome>>;

    // ========== 审计发件箱 ==========

    async fn enqueue_audit(&mut self, entry: &AuditEntry) -> Result<()>;

    /// 未投递的条目，按创建时间升序
    async fn pending_audit(&mut self, limit: i64) -> Result<Vec<AuditEntry>>;

    async fn mark_audit_delivered(&mut self, ids: &[Uuid], delivered_at: DateTime<Utc>) -> Result<()>;

    // ========== 事务控制 ==========

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
