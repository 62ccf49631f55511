//! 周期状态机
//!
//! 管理IVF周期阶段的转换。临床事件通过转换表推进阶段：
//! 每个非终止阶段对每个事件都有一条记录，终止阶段不接受任何事件。

use ivf_core::{IvfError, Result, Stage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// 推进阶段的临床事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CycleEvent {
    MonitoringRecorded,
    EggRetrievalRecorded,
    FertilizationRecorded,
    EmbryosTransferred,
    OutcomeRecorded,
}

impl CycleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleEvent::MonitoringRecorded => "monitoring_recorded",
            CycleEvent::EggRetrievalRecorded => "egg_retrieval_recorded",
            CycleEvent::FertilizationRecorded => "fertilization_recorded",
            CycleEvent::EmbryosTransferred => "embryos_transferred",
            CycleEvent::OutcomeRecorded => "outcome_recorded",
        }
    }
}

impl fmt::Display for CycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 周期状态机
#[derive(Debug)]
pub struct CycleStateMachine {
    transitions: HashMap<(Stage, CycleEvent), Stage>,
}

impl CycleStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        for from in Stage::ALL.into_iter().filter(|s| !s.is_terminal()) {
            // 监测只从促排卵推进，其余阶段保持不变
            let after_monitoring = if from == Stage::Stimulation { Stage::Monitoring } else { from };
            transitions.insert((from, CycleEvent::MonitoringRecorded), after_monitoring);

            transitions.insert((from, CycleEvent::EggRetrievalRecorded), Stage::Fertilization);
            transitions.insert((from, CycleEvent::FertilizationRecorded), Stage::EmbryoCulture);
            transitions.insert((from, CycleEvent::EmbryosTransferred), Stage::Waiting);
            transitions.insert((from, CycleEvent::OutcomeRecorded), Stage::Completed);
        }

        Self { transitions }
    }

    /// 检查状态转换是否有效
    pub fn can_transition(&self, from: &Stage, event: &CycleEvent) -> bool {
        self.transitions.contains_key(&(*from, *event))
    }

    /// 执行状态转换
    pub fn transition(&self, from: &Stage, event: &CycleEvent) -> Result<Stage> {
        match self.transitions.get(&(*from, *event)) {
            Some(to) => Ok(*to),
            None => Err(IvfError::InvalidStateTransition {
                from: from.to_string(),
                event: event.to_string(),
            }),
        }
    }

    /// 显式设置阶段：任意非终止阶段可改为任意阶段，终止阶段只能保持不变
    pub fn check_override(&self, from: &Stage, to: &Stage) -> Result<()> {
        if from.is_terminal() && from != to {
            return Err(IvfError::InvalidStateTransition {
                from: from.to_string(),
                event: format!("set_stage({})", to),
            });
        }
        Ok(())
    }

    /// 获取阶段的所有可能事件
    pub fn get_possible_events(&self, current_stage: &Stage) -> Vec<CycleEvent> {
        let mut events: Vec<CycleEvent> = self
            .transitions
            .keys()
            .filter(|(stage, _)| stage == current_stage)
            .map(|(_, event)| *event)
            .collect();
        events.sort_by_key(|e| e.as_str());
        events
    }
}

impl Default for CycleStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let sm = CycleStateMachine::new();

        assert_eq!(
            sm.transition(&Stage::Stimulation, &CycleEvent::MonitoringRecorded).unwrap(),
            Stage::Monitoring
        );
        assert_eq!(
            sm.transition(&Stage::Monitoring, &CycleEvent::EggRetrievalRecorded).unwrap(),
            Stage::Fertilization
        );
        assert_eq!(
            sm.transition(&Stage::Fertilization, &CycleEvent::FertilizationRecorded).unwrap(),
            Stage::EmbryoCulture
        );
        assert_eq!(
            sm.transition(&Stage::EmbryoCulture, &CycleEvent::EmbryosTransferred).unwrap(),
            Stage::Waiting
        );
        assert_eq!(
            sm.transition(&Stage::Waiting, &CycleEvent::OutcomeRecorded).unwrap(),
            Stage::Completed
        );
    }

    #[test]
    fn test_monitoring_only_advances_from_stimulation() {
        let sm = CycleStateMachine::new();

        assert_eq!(
            sm.transition(&Stage::Consultation, &CycleEvent::MonitoringRecorded).unwrap(),
            Stage::Consultation
        );
        assert_eq!(
            sm.transition(&Stage::Monitoring, &CycleEvent::MonitoringRecorded).unwrap(),
            Stage::Monitoring
        );
        assert_eq!(
            sm.transition(&Stage::EmbryoCulture, &CycleEvent::MonitoringRecorded).unwrap(),
            Stage::EmbryoCulture
        );
    }

    #[test]
    fn test_recorders_advance_from_any_open_stage() {
        let sm = CycleStateMachine::new();

        for from in Stage::ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert_eq!(
                sm.transition(&from, &CycleEvent::EggRetrievalRecorded).unwrap(),
                Stage::Fertilization
            );
            assert_eq!(
                sm.transition(&from, &CycleEvent::FertilizationRecorded).unwrap(),
                Stage::EmbryoCulture
            );
            assert_eq!(sm.transition(&from, &CycleEvent::EmbryosTransferred).unwrap(), Stage::Waiting);
            assert_eq!(sm.transition(&from, &CycleEvent::OutcomeRecorded).unwrap(), Stage::Completed);
            assert_eq!(sm.get_possible_events(&from).len(), 5);
        }
    }

    #[test]
    fn test_invalid_transitions() {
        let sm = CycleStateMachine::new();

        for stage in [Stage::Completed, Stage::Cancelled] {
            assert!(!sm.can_transition(&stage, &CycleEvent::EggRetrievalRecorded));
            assert!(!sm.can_transition(&stage, &CycleEvent::MonitoringRecorded));
        }

        let err = sm
            .transition(&Stage::Completed, &CycleEvent::FertilizationRecorded)
            .unwrap_err();
        assert!(matches!(err, IvfError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_terminal_stages_accept_no_events() {
        let sm = CycleStateMachine::new();

        for stage in [Stage::Completed, Stage::Cancelled] {
            assert!(sm.get_possible_events(&stage).is_empty());
        }
    }

    #[test]
    fn test_override_rules() {
        let sm = CycleStateMachine::new();

        assert!(sm.check_override(&Stage::Waiting, &Stage::Stimulation).is_ok());
        assert!(sm.check_override(&Stage::Monitoring, &Stage::Cancelled).is_ok());
        assert!(sm.check_override(&Stage::Completed, &Stage::Completed).is_ok());
        assert!(sm.check_override(&Stage::Cancelled, &Stage::Consultation).is_err());
        assert!(sm.check_override(&Stage::Completed, &Stage::Cancelled).is_err());
    }
}
