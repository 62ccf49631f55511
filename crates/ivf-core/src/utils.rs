//! 通用工具函数

use crate::models::{BetaReading, CycleOutcome};
use std::f64::consts::LN_2;

/// 由患者编号与周期序号生成周期编号，例如 `P0001-C03`
pub fn cycle_code(patient_code: &str, cycle_number: i32) -> String {
    format!("{}-C{:02}", patient_code, cycle_number)
}

/// 保留两位小数
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// 受精率（%）= 2PN / 受精卵数 × 100；受精卵数为0时返回0
pub fn fertilization_rate(eggs_inseminated: i32, two_pn_normal: i32) -> f64 {
    if eggs_inseminated <= 0 {
        return 0.0;
    }
    round2(two_pn_normal as f64 / eggs_inseminated as f64 * 100.0)
}

/// 取卵总数，缺失的一侧按0计
pub fn total_eggs(right_ovary_eggs: Option<i32>, left_ovary_eggs: Option<i32>) -> i32 {
    right_ovary_eggs.unwrap_or(0) + left_ovary_eggs.unwrap_or(0)
}

/// β-hCG 倍增时间（小时）= Δ小时 × ln2 / ln(β2/β1)
///
/// 任一值不为正、两次检测间隔不为正、或 β2 == β1 时返回 `None`。
/// β2 < β1 时结果为负，表示下降，按原值保留。
pub fn beta_doubling_time_hours(first: &BetaReading, second: &BetaReading) -> Option<f64> {
    if !(first.value > 0.0 && second.value > 0.0) {
        return None;
    }
    let hours = (second.date - first.date).num_hours() as f64;
    if hours <= 0.0 {
        return None;
    }

    let doubling = hours * LN_2 / (second.value / first.value).ln();
    if doubling.is_finite() {
        Some(round2(doubling))
    } else {
        None
    }
}

/// 按首次 β-hCG 判定周期结局：严格大于阈值为阳性，缺失为阴性
pub fn classify_beta(first_beta_value: Option<f64>, positive_threshold: f64) -> CycleOutcome {
    match first_beta_value {
        Some(value) if value > positive_threshold => CycleOutcome::Positive,
        _ => CycleOutcome::Negative,
    }
}

/// 合并备注：新备注追加在已有备注之后
pub fn merge_notes(existing: Option<&str>, addition: Option<&str>) -> Option<String> {
    let addition = addition.map(str::trim).filter(|s| !s.is_empty());
    match (existing, addition) {
        (Some(old), Some(new)) if !old.is_empty() => Some(format!("{}\n{}", old, new)),
        (_, Some(new)) => Some(new.to_string()),
        (old, None) => old.map(str::to_string),
    }
}

/// 去除首尾空白，空字符串视为缺失
pub fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_cycle_code() {
        assert_eq!(cycle_code("P0042", 1), "P0042-C01");
        assert_eq!(cycle_code("P0042", 12), "P0042-C12");
        assert_eq!(cycle_code("P0042", 123), "P0042-C123");
    }

    #[test]
    fn test_fertilization_rate() {
        assert_eq!(fertilization_rate(10, 6), 60.0);
        assert_eq!(fertilization_rate(3, 2), 66.67);
        assert_eq!(fertilization_rate(0, 0), 0.0);
        assert_eq!(fertilization_rate(0, 4), 0.0);
    }

    #[test]
    fn test_total_eggs() {
        assert_eq!(total_eggs(Some(7), Some(5)), 12);
        assert_eq!(total_eggs(None, Some(5)), 5);
        assert_eq!(total_eggs(None, None), 0);
    }

    #[test]
    fn test_beta_doubling_time() {
        let first = BetaReading { value: 10.0, date: date(2026, 3, 1) };
        let second = BetaReading { value: 40.0, date: date(2026, 3, 3) };
        let hours = beta_doubling_time_hours(&first, &second).unwrap();
        assert!((hours - 24.0).abs() < 1e-9);
    }

    #[test]
    fn test_beta_doubling_time_degenerate_inputs() {
        let first = BetaReading { value: 50.0, date: date(2026, 3, 1) };

        let flat = BetaReading { value: 50.0, date: date(2026, 3, 3) };
        assert_eq!(beta_doubling_time_hours(&first, &flat), None);

        let zero = BetaReading { value: 0.0, date: date(2026, 3, 3) };
        assert_eq!(beta_doubling_time_hours(&first, &zero), None);

        let zero_first = BetaReading { value: 0.0, date: date(2026, 3, 1) };
        let later = BetaReading { value: 40.0, date: date(2026, 3, 3) };
        assert_eq!(beta_doubling_time_hours(&zero_first, &later), None);

        let negative = BetaReading { value: -10.0, date: date(2026, 3, 3) };
        assert_eq!(beta_doubling_time_hours(&first, &negative), None);

        let same_day = BetaReading { value: 80.0, date: date(2026, 3, 1) };
        assert_eq!(beta_doubling_time_hours(&first, &same_day), None);

        let falling = BetaReading { value: 25.0, date: date(2026, 3, 3) };
        assert_eq!(beta_doubling_time_hours(&first, &falling), Some(-48.0));
    }

    #[test]
    fn test_classify_beta() {
        assert_eq!(classify_beta(Some(120.0), 5.0), CycleOutcome::Positive);
        assert_eq!(classify_beta(Some(5.0), 5.0), CycleOutcome::Negative);
        assert_eq!(classify_beta(Some(3.0), 5.0), CycleOutcome::Negative);
        assert_eq!(classify_beta(None, 5.0), CycleOutcome::Negative);
    }

    #[test]
    fn test_merge_notes() {
        assert_eq!(merge_notes(None, None), None);
        assert_eq!(merge_notes(Some("a"), None).as_deref(), Some("a"));
        assert_eq!(merge_notes(None, Some(" b ")).as_deref(), Some("b"));
        assert_eq!(merge_notes(Some("a"), Some("b")).as_deref(), Some("a\nb"));
        assert_eq!(merge_notes(Some("a"), Some("  ")).as_deref(), Some("a"));
    }
}
