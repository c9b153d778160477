use crate::error::{Error, Result};
use crate::model::{LandClass, Patch, UtilizationKind, UtilizationLevels};
use crate::rules::RuleLookup;

/// 国家自然质量等指数的分等带宽
pub const STATE_NATURAL_BAND_WIDTH: f64 = 400.0;
/// 国家利用等、经济等指数的分等带宽
pub const STATE_OTHER_BAND_WIDTH: f64 = 200.0;

/// 单作物自然质量分（0～1）
///
/// 七项因素分值加权求和后除以 100。水浇地查规则时套用旱地，
/// 该替换只作用于本步骤的规则查询。
pub fn crop_natural_quality_score(patch: &Patch, crop_name: &str, rules: &impl RuleLookup) -> f64 {
    let class = patch.land_class().scoring_class();
    let mut total = 0.0;
    for factor in patch.factors() {
        let score = rules.score(&patch.third_index_region, class, crop_name, factor) as f64;
        let weight = rules.weight(&patch.third_index_region, &factor.name, class);
        total += score * weight;
    }
    total / 100.0
}

/// 作物的生产潜力指数，水田取光温潜力，其余取气候潜力
fn composite_potential(patch: &Patch, crop_name: &str, rules: &impl RuleLookup) -> f64 {
    match patch.land_class() {
        LandClass::PaddyField => rules.light_temperature_potential(&patch.county, crop_name),
        _ => rules.climate_potential(&patch.county, crop_name),
    }
}

/// 分等指数所用的生产潜力指数
///
/// 水田取光温潜力，旱地取气候潜力；水浇地由
/// `uses_climate_potential` 决定取气候还是光温潜力。
pub fn crop_index_potential(patch: &Patch, crop_name: &str, rules: &impl RuleLookup) -> f64 {
    match patch.land_class() {
        LandClass::PaddyField => rules.light_temperature_potential(&patch.county, crop_name),
        LandClass::IrrigatedDryland => {
            if patch.uses_climate_potential {
                rules.climate_potential(&patch.county, crop_name)
            } else {
                rules.light_temperature_potential(&patch.county, crop_name)
            }
        }
        LandClass::Dryland => rules.climate_potential(&patch.county, crop_name),
    }
}

/// 综合自然质量分：两作物自然质量分按「潜力指数 × 产量比」加权平均
pub fn natural_quality_score(patch: &Patch, rules: &impl RuleLookup) -> f64 {
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for crop in patch.crops() {
        let score = crop_natural_quality_score(patch, &crop.name, rules);
        let potential = composite_potential(patch, &crop.name, rules);
        let ratio = crop.yield_ratio();
        numerator += score * potential * ratio;
        denominator += potential * ratio;
    }
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// 自然质量等指数：Σ(自然质量分 × 潜力指数 × 产量比)
pub fn natural_quality_grade_index(patch: &Patch, rules: &impl RuleLookup) -> f64 {
    patch
        .crops()
        .iter()
        .map(|crop| {
            crop_natural_quality_score(patch, &crop.name, rules)
                * crop_index_potential(patch, &crop.name, rules)
                * crop.yield_ratio()
        })
        .sum()
}

/// 省级等别：ceil(指数 / 200)
pub fn provincial_grade(index: f64) -> i32 {
    (index / 200.0).ceil() as i32
}

/// 利用状况综合评分：五项因素分值加权求和
pub fn utilization_score(levels: &UtilizationLevels) -> f64 {
    UtilizationKind::ALL
        .iter()
        .map(|kind| kind.score(levels.get(*kind)) as f64 * kind.weight())
        .sum()
}

/// 修正后的土地利用系数
///
/// 新增（开发）地块直接采用调查系数；整治地块按整治前后的
/// 利用状况评分之比修正。整治前评分为 0 时为明确的领域错误，
/// 不产生 NaN 继续向下游传播。
pub fn corrected_utilization_coefficient(patch: &Patch) -> Result<f64> {
    if patch.is_new {
        return Ok(patch.utilization_coefficient);
    }
    let before = utilization_score(&patch.before_levels);
    let after = utilization_score(&patch.after_levels);
    if before == 0.0 {
        return Err(Error::ZeroUtilizationScore);
    }
    Ok(patch.utilization_coefficient * after / before)
}

/// 省级自然质量等指数 → 国家级指数
pub fn state_natural_quality_index(index: f64) -> f64 {
    index * 0.5148 + 1020.28
}

/// 省级利用等指数 → 国家级指数
pub fn state_utilization_index(index: f64) -> f64 {
    index * 0.5598 + 539.70
}

/// 省级经济等指数 → 国家级指数
pub fn state_economical_index(index: f64) -> f64 {
    index * 0.6998 + 676.04
}

/// 国家级等别：15 个分等带从高指数到低指数对应 1～15 等，
/// 指数不在 (0, 15×带宽] 内时等别记 0（无效输入的标志值）
pub fn state_grade(index: f64, band_width: f64) -> i32 {
    if index <= 0.0 || index > band_width * 15.0 {
        return 0;
    }
    16 - (index / band_width).ceil() as i32
}

/// 两作物实际粮食产量按产量比折算求和，kg/亩
pub fn grain_output(patch: &Patch) -> f64 {
    patch
        .crops()
        .iter()
        .map(|c| c.yield_ratio() * c.grain_output)
        .sum()
}

/// 两作物最大单产按产量比折算求和，kg/亩
pub fn max_grain_output(patch: &Patch, rules: &impl RuleLookup) -> f64 {
    patch
        .crops()
        .iter()
        .map(|c| c.yield_ratio() * rules.max_yield(&patch.county, &c.name) as f64)
        .sum()
}

/// 由调查产量推算土地利用系数 K = Y / Ymax，上限 1
pub fn derive_utilization_coefficient(patch: &Patch, rules: &impl RuleLookup) -> f64 {
    let y = grain_output(patch);
    let y_max = max_grain_output(patch, rules);
    if y_max == 0.0 {
        0.0
    } else {
        (y / y_max).min(1.0)
    }
}

/// 「产量—成本」指数 a = Y / ΣC
pub fn goc_index(patch: &Patch) -> f64 {
    let cost: f64 = patch.crops().iter().map(|c| c.cost).sum();
    if cost == 0.0 {
        0.0
    } else {
        grain_output(patch) / cost
    }
}

/// 由「产量—成本」指数推算土地经济系数 Kc = a / A，上限 1
pub fn derive_economical_coefficient(patch: &Patch, rules: &impl RuleLookup) -> f64 {
    let a = goc_index(patch);
    let a_max = rules.max_goc_index(&patch.county);
    if a_max == 0.0 {
        0.0
    } else {
        (a / a_max).min(1.0)
    }
}

/// 一个地块完整的评定结果
#[derive(Debug, Clone, PartialEq)]
pub struct PatchGrades {
    pub natural_quality_score: f64,
    pub natural_quality_grade_index: f64,
    pub natural_quality_grade: i32,
    /// 修正后的土地利用系数
    pub utilization_coefficient: f64,
    pub utilization_grade_index: f64,
    pub utilization_grade: i32,
    pub economical_grade_index: f64,
    pub economical_grade: i32,
    pub state_natural_quality_index: f64,
    pub state_natural_quality_grade: i32,
    pub state_utilization_index: f64,
    pub state_utilization_grade: i32,
    pub state_economical_index: f64,
    pub state_economical_grade: i32,
}

impl PatchGrades {
    /// 跑完整条评定流水线
    pub fn evaluate(patch: &Patch, rules: &impl RuleLookup) -> Result<Self> {
        let nq_score = natural_quality_score(patch, rules);
        let nq_index = natural_quality_grade_index(patch, rules);
        let coefficient = corrected_utilization_coefficient(patch)?;
        let u_index = nq_index * coefficient;
        let e_index = u_index * patch.economical_coefficient;

        let state_nq = state_natural_quality_index(nq_index);
        let state_u = state_utilization_index(u_index);
        let state_e = state_economical_index(e_index);

        Ok(Self {
            natural_quality_score: nq_score,
            natural_quality_grade_index: nq_index,
            natural_quality_grade: provincial_grade(nq_index),
            utilization_coefficient: coefficient,
            utilization_grade_index: u_index,
            utilization_grade: provincial_grade(u_index),
            economical_grade_index: e_index,
            economical_grade: provincial_grade(e_index),
            state_natural_quality_index: state_nq,
            state_natural_quality_grade: state_grade(state_nq, STATE_NATURAL_BAND_WIDTH),
            state_utilization_index: state_u,
            state_utilization_grade: state_grade(state_u, STATE_OTHER_BAND_WIDTH),
            state_economical_index: state_e,
            state_economical_grade: state_grade(state_e, STATE_OTHER_BAND_WIDTH),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EvaluationFactor;

    /// 所有因素同分、权重均匀、潜力指数固定的规则桩
    struct FlatRules {
        score: i32,
        ptp_first: f64,
        ptp_second: f64,
    }

    impl RuleLookup for FlatRules {
        fn score(&self, _: &str, _: LandClass, _: &str, _: &EvaluationFactor) -> i32 {
            self.score
        }
        fn weight(&self, _: &str, _: &str, _: LandClass) -> f64 {
            // 七项因素权重之和为 1
            1.0 / 7.0
        }
        fn light_temperature_potential(&self, _: &str, crop: &str) -> f64 {
            if crop == "水稻" {
                self.ptp_first
            } else {
                self.ptp_second
            }
        }
        fn climate_potential(&self, _: &str, crop: &str) -> f64 {
            self.light_temperature_potential("", crop)
        }
        fn max_yield(&self, _: &str, _: &str) -> i32 {
            600
        }
        fn max_goc_index(&self, _: &str) -> f64 {
            5.0
        }
        fn composite_utilization_coefficient(&self, _: &str, _: f64) -> f64 {
            0.0
        }
        fn composite_economical_coefficient(&self, _: &str, _: f64) -> f64 {
            0.0
        }
    }

    fn paddy_patch() -> Patch {
        Patch::new(LandClass::PaddyField, "地块1", "某县", "I区")
    }

    #[test]
    fn test_full_marks_give_unit_score() {
        let patch = paddy_patch();
        let rules = FlatRules {
            score: 100,
            ptp_first: 1200.0,
            ptp_second: 900.0,
        };
        let score = crop_natural_quality_score(&patch, "水稻", &rules);
        assert!((score - 1.0).abs() < 1e-12);
        // 加权平均不改变同分作物的综合分
        assert!((natural_quality_score(&patch, &rules) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_paddy_grade_index_scenario() {
        // 水田、各因素 80 分：单作物自然质量分 0.8；
        // 指数 = 0.8×1200×1.0 + 0.8×900×1.3 = 1896
        let patch = paddy_patch();
        let rules = FlatRules {
            score: 80,
            ptp_first: 1200.0,
            ptp_second: 900.0,
        };
        let index = natural_quality_grade_index(&patch, &rules);
        assert!((index - 1896.0).abs() < 1e-9);
        assert_eq!(provincial_grade(index), 10);
    }

    #[test]
    fn test_provincial_grade_monotone() {
        let indices = [1.0, 150.0, 200.0, 201.0, 1896.0, 2999.0, 3000.0];
        for pair in indices.windows(2) {
            assert!(provincial_grade(pair[0]) <= provincial_grade(pair[1]));
        }
        assert_eq!(provincial_grade(200.0), 1);
        assert_eq!(provincial_grade(200.1), 2);
    }

    #[test]
    fn test_state_banding_edges() {
        assert_eq!(state_grade(400.0, STATE_NATURAL_BAND_WIDTH), 15);
        assert_eq!(state_grade(401.0, STATE_NATURAL_BAND_WIDTH), 14);
        assert_eq!(state_grade(0.0, STATE_NATURAL_BAND_WIDTH), 0);
        assert_eq!(state_grade(6000.0, STATE_NATURAL_BAND_WIDTH), 1);
        assert_eq!(state_grade(6001.0, STATE_NATURAL_BAND_WIDTH), 0);
        assert_eq!(state_grade(200.0, STATE_OTHER_BAND_WIDTH), 15);
        assert_eq!(state_grade(3000.0, STATE_OTHER_BAND_WIDTH), 1);
        assert_eq!(state_grade(3001.0, STATE_OTHER_BAND_WIDTH), 0);
    }

    #[test]
    fn test_state_banding_monotone_in_domain() {
        let mut last = i32::MAX;
        for i in 1..=6000 {
            let g = state_grade(i as f64, STATE_NATURAL_BAND_WIDTH);
            assert!((1..=15).contains(&g));
            assert!(g <= last);
            last = g;
        }
    }

    #[test]
    fn test_utilization_score_weighted_sum() {
        let mut levels = UtilizationLevels::new();
        for kind in UtilizationKind::ALL {
            levels.set(kind, 1);
        }
        assert!((utilization_score(&levels) - 100.0).abs() < 1e-12);

        levels.set(UtilizationKind::WaterSource, 3);
        // 100 - 0.10×(100-50) = 95
        assert!((utilization_score(&levels) - 95.0).abs() < 1e-12);
    }

    #[test]
    fn test_coefficient_correction() {
        let mut patch = paddy_patch();
        patch.utilization_coefficient = 0.6;
        // 整治前 80 分、整治后 90 分
        for kind in UtilizationKind::ALL {
            patch.before_levels.set(kind, 2);
            patch.after_levels.set(kind, 1);
        }
        let before = utilization_score(&patch.before_levels);
        let after = utilization_score(&patch.after_levels);
        assert!((before - 80.0).abs() < 1e-12);
        assert!((after - 100.0).abs() < 1e-12);

        let corrected = corrected_utilization_coefficient(&patch).unwrap();
        assert!((corrected - 0.6 * 100.0 / 80.0).abs() < 1e-12);
    }

    #[test]
    fn test_new_patch_keeps_raw_coefficient() {
        let mut patch = paddy_patch();
        patch.is_new = true;
        patch.utilization_coefficient = 0.6;
        // 新增地块不看整治前后评分
        assert_eq!(corrected_utilization_coefficient(&patch).unwrap(), 0.6);
    }

    #[test]
    fn test_zero_before_score_is_domain_error() {
        let mut patch = paddy_patch();
        patch.utilization_coefficient = 0.6;
        for kind in UtilizationKind::ALL {
            patch.after_levels.set(kind, 1);
        }
        let err = corrected_utilization_coefficient(&patch).unwrap_err();
        assert!(matches!(err, Error::ZeroUtilizationScore));
    }

    #[test]
    fn test_state_index_conversions() {
        assert!((state_natural_quality_index(1000.0) - 1535.08).abs() < 1e-9);
        assert!((state_utilization_index(1000.0) - 1099.5).abs() < 1e-9);
        assert!((state_economical_index(1000.0) - 1375.84).abs() < 1e-9);
    }

    #[test]
    fn test_coefficient_derivation() {
        let mut patch = paddy_patch();
        // 水稻 500 kg/亩、小麦 400 kg/亩；最大单产均为 600 kg/亩
        patch.set_crop_survey(0, 500.0, 100.0);
        patch.set_crop_survey(1, 400.0, 100.0);
        let rules = FlatRules {
            score: 80,
            ptp_first: 1200.0,
            ptp_second: 900.0,
        };

        let y = grain_output(&patch);
        assert!((y - (500.0 + 1.3 * 400.0)).abs() < 1e-9);
        let y_max = max_grain_output(&patch, &rules);
        assert!((y_max - (600.0 + 1.3 * 600.0)).abs() < 1e-9);
        let k = derive_utilization_coefficient(&patch, &rules);
        assert!((k - y / y_max).abs() < 1e-12);
        assert!(k <= 1.0);

        let a = goc_index(&patch);
        assert!((a - y / 200.0).abs() < 1e-9);
        let kc = derive_economical_coefficient(&patch, &rules);
        assert!((kc - (a / 5.0).min(1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_evaluate_pipeline() {
        let mut patch = paddy_patch();
        patch.utilization_coefficient = 0.8;
        patch.economical_coefficient = 0.9;
        patch.is_new = true;
        let rules = FlatRules {
            score: 80,
            ptp_first: 1200.0,
            ptp_second: 900.0,
        };

        let grades = PatchGrades::evaluate(&patch, &rules).unwrap();
        assert!((grades.natural_quality_grade_index - 1896.0).abs() < 1e-9);
        assert_eq!(grades.natural_quality_grade, 10);
        assert!((grades.utilization_grade_index - 1896.0 * 0.8).abs() < 1e-9);
        assert_eq!(grades.utilization_grade, 8);
        assert!((grades.economical_grade_index - 1896.0 * 0.8 * 0.9).abs() < 1e-9);
        // 国家级指数与等别
        let snq = 1896.0 * 0.5148 + 1020.28;
        assert!((grades.state_natural_quality_index - snq).abs() < 1e-9);
        assert_eq!(
            grades.state_natural_quality_grade,
            state_grade(snq, STATE_NATURAL_BAND_WIDTH)
        );
    }
}
