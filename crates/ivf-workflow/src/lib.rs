//! # IVF工作流模块
//!
//! 提供IVF周期生命周期管理功能，包括：
//! - 周期状态机：临床事件通过转换表推进阶段，终止阶段不可重新打开
//! - 工作流引擎：周期登记、临床事件记录、胚胎操作与妊娠结局，均在单个存储事务内完成
//! - 胚胎状态策略：可配置的胚胎状态转换规则
//! - 审计投递：把发件箱中的审计条目按顺序投递到审计接收端

pub mod audit;
pub mod embryo;
pub mod embryology;
pub mod engine;
pub mod outcome;
pub mod recorders;
pub mod state_machine;

#[cfg(test)]
mod testing;

// 重新导出主要类型
pub use audit::{AuditRelay, AuditSink, TracingAuditSink};
pub use embryo::EmbryoStatusPolicy;
pub use engine::{CycleWorkflow, TransitionListener, WorkflowSettings};
pub use state_machine::{CycleEvent, CycleStateMachine};
