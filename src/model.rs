use crate::error::{Error, Result};

/// 耕地地类（二调分类编码）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LandClass {
    /// 011 水田
    PaddyField,
    /// 012 水浇地
    IrrigatedDryland,
    /// 013 旱地
    Dryland,
}

impl LandClass {
    pub fn from_code(code: &str) -> Result<Self> {
        match code.trim() {
            "011" => Ok(Self::PaddyField),
            "012" => Ok(Self::IrrigatedDryland),
            "013" => Ok(Self::Dryland),
            other => Err(Error::UnknownLandClass(other.to_string())),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::PaddyField => "011",
            Self::IrrigatedDryland => "012",
            Self::Dryland => "013",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::PaddyField => "水田",
            Self::IrrigatedDryland => "水浇地",
            Self::Dryland => "旱地",
        }
    }

    /// 记分规则查询时水浇地套用旱地的规则
    pub fn scoring_class(&self) -> LandClass {
        match self {
            Self::IrrigatedDryland => Self::Dryland,
            other => *other,
        }
    }
}

/// 分等因素取值的匹配方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactorKind {
    /// 按「等值」字段精确匹配
    Fixed,
    /// 按「最小值 < v ≤ 最大值」区间匹配
    Interval,
}

/// 一个分等因素及其实测值（值以文本存放，区间因素解析为数值后比较）
#[derive(Debug, Clone)]
pub struct EvaluationFactor {
    pub name: String,
    pub value: String,
    pub kind: FactorKind,
}

impl EvaluationFactor {
    fn slot(name: &str, kind: FactorKind) -> Self {
        Self {
            name: name.to_string(),
            value: String::new(),
            kind,
        }
    }
}

/// 指定作物（产量、成本来自调查数据）
#[derive(Debug, Clone)]
pub struct Crop {
    pub name: String,
    /// 粮食产量 kg/亩
    pub grain_output: f64,
    /// 生产成本 元/亩
    pub cost: f64,
}

impl Crop {
    fn designated(name: &str) -> Self {
        Self {
            name: name.to_string(),
            grain_output: 0.0,
            cost: 0.0,
        }
    }

    /// 产量比系数（按作物种类固定）
    pub fn yield_ratio(&self) -> f64 {
        match self.name.as_str() {
            "水稻" => 1.0,
            "玉米" => 0.8,
            "小麦" => 1.3,
            _ => 0.0,
        }
    }
}

/// 土地利用状况因素类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UtilizationKind {
    /// 水源保证状况
    WaterSource,
    /// 灌溉条件
    IrrigationMethod,
    /// 排水条件
    DrainageMethod,
    /// 道路通达度
    RoadAccess,
    /// 田块平整度
    FieldFlatness,
}

impl UtilizationKind {
    pub const ALL: [UtilizationKind; 5] = [
        Self::WaterSource,
        Self::IrrigationMethod,
        Self::DrainageMethod,
        Self::RoadAccess,
        Self::FieldFlatness,
    ];

    pub fn weight(&self) -> f64 {
        match self {
            Self::WaterSource => 0.10,
            Self::IrrigationMethod => 0.25,
            Self::DrainageMethod => 0.20,
            Self::RoadAccess => 0.25,
            Self::FieldFlatness => 0.20,
        }
    }

    /// 等级 → 分值。表外等级计 0 分。
    pub fn score(&self, level: i32) -> i32 {
        match self {
            Self::WaterSource => match level {
                1 => 100,
                2 => 80,
                3 => 50,
                _ => 0,
            },
            Self::IrrigationMethod => match level {
                1 => 100,
                2 => 80,
                3 => 50,
                4 => 30,
                _ => 0,
            },
            Self::DrainageMethod => match level {
                1 => 100,
                2 => 80,
                _ => 0,
            },
            Self::RoadAccess => match level {
                1 => 100,
                2 => 80,
                3 => 50,
                _ => 0,
            },
            Self::FieldFlatness => match level {
                1 => 100,
                2 => 80,
                3 => 50,
                4 => 30,
                _ => 0,
            },
        }
    }

    fn index(&self) -> usize {
        match self {
            Self::WaterSource => 0,
            Self::IrrigationMethod => 1,
            Self::DrainageMethod => 2,
            Self::RoadAccess => 3,
            Self::FieldFlatness => 4,
        }
    }
}

/// 五项利用状况因素的等级（按类型取用，整治前、后各一份）
#[derive(Debug, Clone, Copy, Default)]
pub struct UtilizationLevels {
    levels: [i32; 5],
}

impl UtilizationLevels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, kind: UtilizationKind, level: i32) {
        self.levels[kind.index()] = level;
    }

    pub fn get(&self, kind: UtilizationKind) -> i32 {
        self.levels[kind.index()]
    }
}

/// 一个待评定的地块
///
/// 分等因素与指定作物由地类唯一决定，在构造时一次性生成，
/// 之后只允许填值，不允许更换地类。
#[derive(Debug, Clone)]
pub struct Patch {
    pub name: String,
    pub county: String,
    /// 三级指标区，规则查询的键
    pub third_index_region: String,
    land_class: LandClass,
    /// 面积（公顷）
    pub area: f64,
    /// 新增（开发）地块，利用系数不作修正
    pub is_new: bool,
    /// 水浇地分等指数采用气候生产潜力（否则采用光温生产潜力）
    pub uses_climate_potential: bool,
    /// 整治前土地利用系数
    pub utilization_coefficient: f64,
    /// 土地经济系数
    pub economical_coefficient: f64,
    factors: Vec<EvaluationFactor>,
    crops: Vec<Crop>,
    pub before_levels: UtilizationLevels,
    pub after_levels: UtilizationLevels,
}

impl Patch {
    pub fn new(land_class: LandClass, name: &str, county: &str, third_index_region: &str) -> Self {
        let (factors, crops) = match land_class {
            LandClass::PaddyField => (
                vec![
                    EvaluationFactor::slot("表层土壤质地", FactorKind::Fixed),
                    EvaluationFactor::slot("剖面构型", FactorKind::Fixed),
                    EvaluationFactor::slot("土壤有机质含量", FactorKind::Fixed),
                    EvaluationFactor::slot("土壤PH值", FactorKind::Fixed),
                    EvaluationFactor::slot("障碍层距地表深度", FactorKind::Interval),
                    EvaluationFactor::slot("排水条件", FactorKind::Fixed),
                    EvaluationFactor::slot("灌溉保证率", FactorKind::Fixed),
                ],
                vec![Crop::designated("水稻"), Crop::designated("小麦")],
            ),
            // 水浇地沿用旱地的因素与作物模板
            LandClass::IrrigatedDryland | LandClass::Dryland => (
                vec![
                    EvaluationFactor::slot("有效土层厚度", FactorKind::Interval),
                    EvaluationFactor::slot("表层土壤质地", FactorKind::Fixed),
                    EvaluationFactor::slot("土壤有机质含量", FactorKind::Fixed),
                    EvaluationFactor::slot("土壤PH值", FactorKind::Fixed),
                    EvaluationFactor::slot("地形坡度", FactorKind::Interval),
                    EvaluationFactor::slot("灌溉保证率", FactorKind::Fixed),
                    EvaluationFactor::slot("地表岩石出露度", FactorKind::Fixed),
                ],
                vec![Crop::designated("小麦"), Crop::designated("玉米")],
            ),
        };

        Self {
            name: name.to_string(),
            county: county.to_string(),
            third_index_region: third_index_region.to_string(),
            land_class,
            area: 0.0,
            is_new: false,
            uses_climate_potential: true,
            utilization_coefficient: 0.0,
            economical_coefficient: 0.0,
            factors,
            crops,
            before_levels: UtilizationLevels::new(),
            after_levels: UtilizationLevels::new(),
        }
    }

    pub fn land_class(&self) -> LandClass {
        self.land_class
    }

    pub fn factors(&self) -> &[EvaluationFactor] {
        &self.factors
    }

    /// 按因素名填入实测值。未知因素名不生效。
    pub fn set_factor_value(&mut self, name: &str, value: &str) {
        if let Some(f) = self.factors.iter_mut().find(|f| f.name == name) {
            f.value = value.trim().to_string();
        }
    }

    pub fn crops(&self) -> &[Crop] {
        &self.crops
    }

    /// 填入指定作物的产量与成本
    pub fn set_crop_survey(&mut self, index: usize, grain_output: f64, cost: f64) {
        if let Some(c) = self.crops.get_mut(index) {
            c.grain_output = grain_output;
            c.cost = cost;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_land_class_codes() {
        assert_eq!(LandClass::from_code("011").unwrap(), LandClass::PaddyField);
        assert_eq!(
            LandClass::from_code(" 012 ").unwrap(),
            LandClass::IrrigatedDryland
        );
        assert_eq!(LandClass::from_code("013").unwrap(), LandClass::Dryland);
        assert!(LandClass::from_code("021").is_err());
    }

    #[test]
    fn test_irrigated_dryland_scores_as_dryland() {
        assert_eq!(
            LandClass::IrrigatedDryland.scoring_class(),
            LandClass::Dryland
        );
        assert_eq!(LandClass::PaddyField.scoring_class(), LandClass::PaddyField);
    }

    #[test]
    fn test_patch_factor_and_crop_templates() {
        let paddy = Patch::new(LandClass::PaddyField, "P1", "某县", "I区");
        assert_eq!(paddy.factors().len(), 7);
        assert_eq!(paddy.crops().len(), 2);
        assert_eq!(paddy.crops()[0].name, "水稻");
        assert_eq!(paddy.crops()[1].name, "小麦");
        assert!(paddy
            .factors()
            .iter()
            .any(|f| f.name == "障碍层距地表深度" && f.kind == FactorKind::Interval));

        let dry = Patch::new(LandClass::IrrigatedDryland, "P2", "某县", "I区");
        assert_eq!(dry.factors().len(), 7);
        assert_eq!(dry.crops()[0].name, "小麦");
        assert_eq!(dry.crops()[1].name, "玉米");
        assert!(dry
            .factors()
            .iter()
            .any(|f| f.name == "有效土层厚度" && f.kind == FactorKind::Interval));
    }

    #[test]
    fn test_yield_ratio_by_species() {
        assert_eq!(Crop::designated("水稻").yield_ratio(), 1.0);
        assert_eq!(Crop::designated("玉米").yield_ratio(), 0.8);
        assert_eq!(Crop::designated("小麦").yield_ratio(), 1.3);
        assert_eq!(Crop::designated("大豆").yield_ratio(), 0.0);
    }

    #[test]
    fn test_utilization_weights_sum_to_one() {
        let total: f64 = UtilizationKind::ALL.iter().map(|k| k.weight()).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_utilization_score_table() {
        assert_eq!(UtilizationKind::WaterSource.score(1), 100);
        assert_eq!(UtilizationKind::WaterSource.score(3), 50);
        assert_eq!(UtilizationKind::WaterSource.score(4), 0);
        assert_eq!(UtilizationKind::DrainageMethod.score(2), 80);
        assert_eq!(UtilizationKind::DrainageMethod.score(3), 0);
        assert_eq!(UtilizationKind::FieldFlatness.score(4), 30);
    }

    #[test]
    fn test_set_factor_value() {
        let mut p = Patch::new(LandClass::Dryland, "P", "县", "区");
        p.set_factor_value("地形坡度", " 5.0 ");
        let f = p.factors().iter().find(|f| f.name == "地形坡度").unwrap();
        assert_eq!(f.value, "5.0");
        // 未知因素名不生效
        p.set_factor_value("排水条件", "1");
        assert!(!p.factors().iter().any(|f| f.name == "排水条件"));
    }
}
