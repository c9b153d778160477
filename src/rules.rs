use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use csv::ReaderBuilder;
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::{EvaluationFactor, FactorKind, LandClass};

/// 分等规则查询接口
///
/// 规则在一次评定过程中只读。实现方自行决定存储方式，
/// 核心算法只通过本接口取值。
pub trait RuleLookup {
    /// 自然质量分记分规则。固定因素按「等值」精确匹配，
    /// 区间因素按「最小值 < v ≤ 最大值」匹配。无匹配规则计 0 分。
    fn score(
        &self,
        region: &str,
        land_class: LandClass,
        crop: &str,
        factor: &EvaluationFactor,
    ) -> i32;

    /// 分等因素权重
    fn weight(&self, region: &str, factor_name: &str, land_class: LandClass) -> f64;

    /// 光温生产潜力指数
    fn light_temperature_potential(&self, county: &str, crop: &str) -> f64;

    /// 气候生产潜力指数
    fn climate_potential(&self, county: &str, crop: &str) -> f64;

    /// 最大单产，kg/亩（规则表按 kg/公顷 存储，除以 15 折算）
    fn max_yield(&self, county: &str, crop: &str) -> i32;

    /// 最大「产量—成本」指数
    fn max_goc_index(&self, county: &str) -> f64;

    /// 综合土地利用系数分段表，按「下限值 < v ≤ 上限值」取值
    fn composite_utilization_coefficient(&self, county: &str, value: f64) -> f64;

    /// 综合土地经济系数分段表
    fn composite_economical_coefficient(&self, county: &str, value: f64) -> f64;
}

#[derive(Debug, Clone)]
struct ScoreRule {
    region: String,
    land_class: String,
    crop: String,
    factor: String,
    /// 固定因素的「等值」
    equal_value: Option<String>,
    /// 区间因素的上下限
    min: Option<f64>,
    max: Option<f64>,
    score: i32,
}

#[derive(Debug, Clone)]
struct BandRule {
    county: String,
    lower: f64,
    upper: f64,
    coefficient: f64,
}

/// 内存规则库
///
/// 七张规则表常驻内存，可由 CSV 目录加载，也可在测试中直接构造。
#[derive(Debug, Default)]
pub struct MemoryRuleLookup {
    score_rules: Vec<ScoreRule>,
    /// (指标区, 因素, 地类) → 权重
    weights: HashMap<(String, String, String), f64>,
    /// (县, 作物) → (光温潜力, 气候潜力)
    potentials: HashMap<(String, String), (f64, f64)>,
    /// (县, 作物) → 最大单产 kg/公顷
    max_yields: HashMap<(String, String), f64>,
    /// 县 → 最大产量成本指数
    max_goc: HashMap<String, f64>,
    utilization_bands: Vec<BandRule>,
    economical_bands: Vec<BandRule>,
}

impl MemoryRuleLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从规则表目录加载七张 CSV 表
    pub fn load(dir: &Path) -> Result<Self> {
        let mut rules = Self::new();

        for row in read_table(&dir.join("自然质量分记分规则表.csv"))? {
            rules.score_rules.push(ScoreRule {
                region: field(&row, "指标区"),
                land_class: field(&row, "地类"),
                crop: field(&row, "作物"),
                factor: field(&row, "因素"),
                equal_value: opt_field(&row, "等值"),
                min: num_field(&row, "最小值"),
                max: num_field(&row, "最大值"),
                score: num_field(&row, "分值").unwrap_or(0.0) as i32,
            });
        }

        for row in read_table(&dir.join("分等因素及权重表.csv"))? {
            rules.weights.insert(
                (field(&row, "指标区"), field(&row, "因素"), field(&row, "地类")),
                num_field(&row, "权重").unwrap_or(0.0),
            );
        }

        for row in read_table(&dir.join("作物生产潜力指数.csv"))? {
            rules.potentials.insert(
                (field(&row, "县"), field(&row, "作物")),
                (
                    num_field(&row, "光温生产潜力指数").unwrap_or(0.0),
                    num_field(&row, "气候生产潜力指数").unwrap_or(0.0),
                ),
            );
        }

        for row in read_table(&dir.join("最大单产.csv"))? {
            rules.max_yields.insert(
                (field(&row, "县"), field(&row, "作物")),
                num_field(&row, "最大单产").unwrap_or(0.0),
            );
        }

        for row in read_table(&dir.join("最大产量成本指数.csv"))? {
            rules
                .max_goc
                .insert(field(&row, "县"), num_field(&row, "指数").unwrap_or(0.0));
        }

        rules.utilization_bands = read_bands(&dir.join("综合土地利用系数.csv"))?;
        rules.economical_bands = read_bands(&dir.join("综合土地经济系数.csv"))?;

        Ok(rules)
    }

    pub fn add_score_rule(
        &mut self,
        region: &str,
        land_class: LandClass,
        crop: &str,
        factor: &str,
        equal_value: Option<&str>,
        interval: Option<(f64, f64)>,
        score: i32,
    ) {
        self.score_rules.push(ScoreRule {
            region: region.to_string(),
            land_class: land_class.name().to_string(),
            crop: crop.to_string(),
            factor: factor.to_string(),
            equal_value: equal_value.map(|v| v.to_string()),
            min: interval.map(|(lo, _)| lo),
            max: interval.map(|(_, hi)| hi),
            score,
        });
    }

    pub fn add_weight(&mut self, region: &str, factor: &str, land_class: LandClass, weight: f64) {
        self.weights.insert(
            (
                region.to_string(),
                factor.to_string(),
                land_class.name().to_string(),
            ),
            weight,
        );
    }

    pub fn add_potential(&mut self, county: &str, crop: &str, ptp: f64, cppc: f64) {
        self.potentials
            .insert((county.to_string(), crop.to_string()), (ptp, cppc));
    }

    pub fn add_max_yield(&mut self, county: &str, crop: &str, kg_per_hectare: f64) {
        self.max_yields
            .insert((county.to_string(), crop.to_string()), kg_per_hectare);
    }

    pub fn add_max_goc_index(&mut self, county: &str, index: f64) {
        self.max_goc.insert(county.to_string(), index);
    }

    pub fn add_utilization_band(&mut self, county: &str, lower: f64, upper: f64, coefficient: f64) {
        self.utilization_bands.push(BandRule {
            county: county.to_string(),
            lower,
            upper,
            coefficient,
        });
    }

    pub fn add_economical_band(&mut self, county: &str, lower: f64, upper: f64, coefficient: f64) {
        self.economical_bands.push(BandRule {
            county: county.to_string(),
            lower,
            upper,
            coefficient,
        });
    }
}

impl RuleLookup for MemoryRuleLookup {
    fn score(
        &self,
        region: &str,
        land_class: LandClass,
        crop: &str,
        factor: &EvaluationFactor,
    ) -> i32 {
        let class_name = land_class.name();
        let candidates = self.score_rules.iter().filter(|r| {
            r.region == region && r.land_class == class_name && r.crop == crop && r.factor == factor.name
        });

        match factor.kind {
            FactorKind::Fixed => candidates
                .filter(|r| r.equal_value.as_deref() == Some(factor.value.as_str()))
                .map(|r| r.score)
                .next()
                .unwrap_or(0),
            FactorKind::Interval => {
                let v: f64 = match factor.value.parse() {
                    Ok(v) => v,
                    Err(_) => {
                        warn!("因素 {} 的取值 {:?} 不是数值，计 0 分", factor.name, factor.value);
                        return 0;
                    }
                };
                candidates
                    .filter(|r| match (r.min, r.max) {
                        (Some(lo), Some(hi)) => lo < v && v <= hi,
                        _ => false,
                    })
                    .map(|r| r.score)
                    .next()
                    .unwrap_or(0)
            }
        }
    }

    fn weight(&self, region: &str, factor_name: &str, land_class: LandClass) -> f64 {
        self.weights
            .get(&(
                region.to_string(),
                factor_name.to_string(),
                land_class.name().to_string(),
            ))
            .copied()
            .unwrap_or(0.0)
    }

    fn light_temperature_potential(&self, county: &str, crop: &str) -> f64 {
        self.potentials
            .get(&(county.to_string(), crop.to_string()))
            .map(|&(ptp, _)| ptp)
            .unwrap_or(0.0)
    }

    fn climate_potential(&self, county: &str, crop: &str) -> f64 {
        self.potentials
            .get(&(county.to_string(), crop.to_string()))
            .map(|&(_, cppc)| cppc)
            .unwrap_or(0.0)
    }

    fn max_yield(&self, county: &str, crop: &str) -> i32 {
        let kg_per_hectare = self
            .max_yields
            .get(&(county.to_string(), crop.to_string()))
            .copied()
            .unwrap_or(0.0);
        (kg_per_hectare / 15.0) as i32
    }

    fn max_goc_index(&self, county: &str) -> f64 {
        self.max_goc.get(county).copied().unwrap_or(0.0)
    }

    fn composite_utilization_coefficient(&self, county: &str, value: f64) -> f64 {
        band_value(&self.utilization_bands, county, value)
    }

    fn composite_economical_coefficient(&self, county: &str, value: f64) -> f64 {
        band_value(&self.economical_bands, county, value)
    }
}

fn band_value(bands: &[BandRule], county: &str, value: f64) -> f64 {
    bands
        .iter()
        .find(|b| b.county == county && b.lower < value && value <= b.upper)
        .map(|b| b.coefficient)
        .unwrap_or(0.0)
}

type Row = HashMap<String, String>;

/// 带表头的 CSV 读成「列名 → 值」的行集合，空白行跳过
fn read_table(path: &Path) -> Result<Vec<Row>> {
    let file = File::open(path).map_err(|e| Error::RuleTableOpen {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| Error::RuleTable {
            path: path.to_path_buf(),
            source: e,
        })?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| Error::RuleTable {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut row = Row::new();
        for (i, value) in record.iter().enumerate() {
            if let Some(header) = headers.get(i) {
                row.insert(header.clone(), value.trim().to_string());
            }
        }
        if row.values().all(|v| v.is_empty()) {
            continue;
        }
        rows.push(row);
    }
    Ok(rows)
}

fn read_bands(path: &Path) -> Result<Vec<BandRule>> {
    let mut bands = Vec::new();
    for row in read_table(path)? {
        bands.push(BandRule {
            county: field(&row, "县"),
            lower: num_field(&row, "下限值").unwrap_or(f64::NEG_INFINITY),
            upper: num_field(&row, "上限值").unwrap_or(f64::INFINITY),
            coefficient: num_field(&row, "系数").unwrap_or(0.0),
        });
    }
    Ok(bands)
}

fn field(row: &Row, name: &str) -> String {
    row.get(name).cloned().unwrap_or_default()
}

fn opt_field(row: &Row, name: &str) -> Option<String> {
    row.get(name).filter(|v| !v.is_empty()).cloned()
}

fn num_field(row: &Row, name: &str) -> Option<f64> {
    row.get(name).and_then(|v| v.parse().ok())
}
