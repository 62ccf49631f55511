//! 胚胎状态策略与逐日评分

use chrono::NaiveDate;
use ivf_core::{DevelopmentRequest, Embryo, EmbryoGrading, EmbryoStatus, IvfError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// 胚胎状态转换策略
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbryoStatusPolicy {
    /// 任意状态之间均可转换
    #[default]
    Unrestricted,
    /// 仅允许临床上合理的转换
    Strict,
}

impl EmbryoStatusPolicy {
    /// 检查状态转换是否被当前策略允许
    pub fn check(&self, from: EmbryoStatus, to: EmbryoStatus) -> Result<()> {
        if self.allows(from, to) {
            return Ok(());
        }
        Err(IvfError::InvalidStateTransition {
            from: from.to_string(),
            event: format!("embryo_status({})", to),
        })
    }

    pub fn allows(&self, from: EmbryoStatus, to: EmbryoStatus) -> bool {
        use EmbryoStatus::*;

        match self {
            EmbryoStatusPolicy::Unrestricted => true,
            EmbryoStatusPolicy::Strict => matches!(
                (from, to),
                (Developing, Transferred)
                    | (Developing, Frozen)
                    | (Developing, Arrested)
                    | (Developing, Discarded)
                    | (Frozen, Transferred)
                    | (Frozen, Discarded)
                    | (Arrested, Discarded)
            ),
        }
    }
}

impl FromStr for EmbryoStatusPolicy {
    type Err = IvfError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "unrestricted" => Ok(EmbryoStatusPolicy::Unrestricted),
            "strict" => Ok(EmbryoStatusPolicy::Strict),
            other => Err(IvfError::Config(format!("unknown embryo status policy: {}", other))),
        }
    }
}

/// 设置状态并在同一次写入中打上对应日期
///
/// 离开 `discarded` 时清除丢弃日期与原因；退回 `developing` 视为更正，
/// 同时清除移植与冷冻日期。冷冻后移植保留冷冻日期。
pub fn apply_status(
    embryo: &mut Embryo,
    status: EmbryoStatus,
    on: NaiveDate,
    discard_reason: Option<String>,
) {
    embryo.status = status;
    if status != EmbryoStatus::Discarded {
        embryo.discard_date = None;
        embryo.discard_reason = None;
    }
    match status {
        EmbryoStatus::Transferred => embryo.transfer_date = Some(on),
        EmbryoStatus::Frozen => embryo.freeze_date = Some(on),
        EmbryoStatus::Discarded => {
            embryo.discard_date = Some(on);
            embryo.discard_reason = discard_reason;
        }
        EmbryoStatus::Developing => {
            embryo.transfer_date = None;
            embryo.freeze_date = None;
        }
        EmbryoStatus::Arrested => {}
    }
}

fn set<T: Clone>(slot: &mut Option<T>, value: &Option<T>, column: &'static str, written: &mut Vec<&'static str>) {
    if let Some(v) = value {
        *slot = Some(v.clone());
        written.push(column);
    }
}

/// 写入某一天提供的评分字段，返回被写入的列名
///
/// 其他天的字段以及该天未提供的字段保持不变。
pub fn apply_development(grading: &mut EmbryoGrading, req: &DevelopmentRequest) -> Result<Vec<&'static str>> {
    let mut written = Vec::new();

    match req.day {
        2 => {
            let d = &mut grading.day2;
            set(&mut d.cell_count, &req.cell_count, "day2_cell_count", &mut written);
            set(&mut d.grade, &req.grade, "day2_grade", &mut written);
            set(&mut d.fragmentation, &req.fragmentation, "day2_fragmentation", &mut written);
            set(&mut d.symmetry, &req.symmetry, "day2_symmetry", &mut written);
        }
        3 => {
            let d = &mut grading.day3;
            set(&mut d.cell_count, &req.cell_count, "day3_cell_count", &mut written);
            set(&mut d.grade, &req.grade, "day3_grade", &mut written);
            set(&mut d.fragmentation, &req.fragmentation, "day3_fragmentation", &mut written);
            set(&mut d.symmetry, &req.symmetry, "day3_symmetry", &mut written);
        }
        4 => {
            let d = &mut grading.day4;
            set(&mut d.stage, &req.stage, "day4_stage", &mut written);
            set(&mut d.grade, &req.grade, "day4_grade", &mut written);
        }
        5 => {
            let d = &mut grading.day5;
            set(&mut d.stage, &req.stage, "day5_stage", &mut written);
            set(&mut d.icm_grade, &req.icm_grade, "day5_icm_grade", &mut written);
            set(&mut d.te_grade, &req.te_grade, "day5_te_grade", &mut written);
            set(&mut d.expansion, &req.expansion, "day5_expansion", &mut written);
            set(&mut d.overall_grade, &req.overall_grade, "day5_overall_grade", &mut written);
        }
        6 => {
            let d = &mut grading.day6;
            set(&mut d.stage, &req.stage, "day6_stage", &mut written);
            set(&mut d.grade, &req.grade, "day6_grade", &mut written);
        }
        other => {
            return Err(IvfError::validation(format!("day must be between 2 and 6, got {}", other)));
        }
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrestricted_policy_allows_everything() {
        let policy = EmbryoStatusPolicy::default();
        for from in EmbryoStatus::ALL {
            for to in EmbryoStatus::ALL {
                assert!(policy.allows(from, to));
            }
        }
    }

    #[test]
    fn test_strict_policy() {
        let policy = EmbryoStatusPolicy::Strict;

        assert!(policy.check(EmbryoStatus::Developing, EmbryoStatus::Frozen).is_ok());
        assert!(policy.check(EmbryoStatus::Frozen, EmbryoStatus::Transferred).is_ok());
        assert!(policy.check(EmbryoStatus::Transferred, EmbryoStatus::Developing).is_err());
        assert!(policy.check(EmbryoStatus::Discarded, EmbryoStatus::Frozen).is_err());
        assert!(policy.check(EmbryoStatus::Frozen, EmbryoStatus::Frozen).is_err());
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("strict".parse::<EmbryoStatusPolicy>().unwrap(), EmbryoStatusPolicy::Strict);
        assert!("lenient".parse::<EmbryoStatusPolicy>().is_err());
    }

    fn developing_embryo() -> Embryo {
        let now = chrono::Utc::now();
        Embryo {
            id: uuid::Uuid::new_v4(),
            clinic_id: uuid::Uuid::new_v4(),
            cycle_id: uuid::Uuid::new_v4(),
            fertilization_id: uuid::Uuid::new_v4(),
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
        }
    }

    #[test]
    fn test_status_dates_follow_current_status() {
        let day = |d| NaiveDate::from_ymd_opt(2026, 3, d).unwrap();
        let mut embryo = developing_embryo();

        apply_status(&mut embryo, EmbryoStatus::Discarded, day(5), Some("poor quality".to_string()));
        assert_eq!(embryo.discard_date, Some(day(5)));

        apply_status(&mut embryo, EmbryoStatus::Developing, day(6), None);
        assert_eq!(embryo.discard_date, None);
        assert_eq!(embryo.discard_reason, None);

        apply_status(&mut embryo, EmbryoStatus::Frozen, day(6), None);
        apply_status(&mut embryo, EmbryoStatus::Transferred, day(20), None);
        assert_eq!(embryo.freeze_date, Some(day(6)));
        assert_eq!(embryo.transfer_date, Some(day(20)));

        apply_status(&mut embryo, EmbryoStatus::Developing, day(21), None);
        assert_eq!(embryo.freeze_date, None);
        assert_eq!(embryo.transfer_date, None);
        assert_eq!(embryo.status, EmbryoStatus::Developing);
    }

    #[test]
    fn test_day5_partial_update() {
        let mut grading = EmbryoGrading::default();
        grading.day3.grade = Some("8A".to_string());

        let req = DevelopmentRequest {
            day: 5,
            icm_grade: Some("A".to_string()),
            // day-3 style fields are ignored on day 5
            cell_count: Some(8),
            ..Default::default()
        };
        let written = apply_development(&mut grading, &req).unwrap();

        assert_eq!(written, vec!["day5_icm_grade"]);
        assert_eq!(grading.day5.icm_grade.as_deref(), Some("A"));
        assert_eq!(grading.day5.overall_grade, None);
        assert_eq!(grading.day3.grade.as_deref(), Some("8A"));
        assert_eq!(grading.day3.cell_count, None);
    }

    #[test]
    fn test_day_out_of_range() {
        let mut grading = EmbryoGrading::default();
        let req = DevelopmentRequest { day: 7, grade: Some("A".to_string()), ..Default::default() };
        assert!(matches!(apply_development(&mut grading, &req), Err(IvfError::Validation(_))));
    }

    #[test]
    fn test_nothing_supplied_writes_nothing() {
        let mut grading = EmbryoGrading::default();
        let req = DevelopmentRequest { day: 4, ..Default::default() };
        assert!(apply_development(&mut grading, &req).unwrap().is_empty());
        assert_eq!(grading, EmbryoGrading::default());
    }
}
