use std::path::Path;

use tracing::warn;

use crate::error::{Error, Result};
use crate::grading::{
    crop_index_potential, crop_natural_quality_score, utilization_score, PatchGrades,
};
use crate::model::Patch;
use crate::rules::RuleLookup;

/// 单元格强调色，交给外部模板引擎渲染
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellColor {
    Blue,
    Red,
    Green,
}

/// 评定结果表的一个单元格
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number {
        value: f64,
        decimals: usize,
    },
    /// 加粗着色的数值，用于三项国家级等别
    StyledNumber {
        value: f64,
        decimals: usize,
        color: CellColor,
    },
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn number(value: f64, decimals: usize) -> Self {
        Self::Number { value, decimals }
    }

    /// 渲染为纯文本（CSV 输出以及模板引擎的兜底表示）
    pub fn to_text(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Text(value) => value.clone(),
            Self::Number { value, decimals }
            | Self::StyledNumber {
                value, decimals, ..
            } => format!("{:.*}", decimals, value),
        }
    }
}

/// 占位区名称 + 二维单元格网格，即模板引擎的渲染载荷
#[derive(Debug, Clone)]
pub struct CellGrid {
    pub region: String,
    rows: Vec<Vec<Cell>>,
}

impl CellGrid {
    pub fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Cell>) {
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }
}

/// 渲染端的接口；外部的模板引擎与内置的 CSV 输出都实现它
pub trait SheetRenderer {
    fn render(&mut self, grid: &CellGrid) -> Result<()>;
}

const HEADER: [&str; 33] = [
    "单元编号",
    "县",
    "指标区",
    "地类",
    "面积",
    "类型",
    "作物一",
    "作物一评分",
    "作物一潜力指数",
    "作物一产量比",
    "作物一指数",
    "作物二",
    "作物二评分",
    "作物二潜力指数",
    "作物二产量比",
    "作物二指数",
    "自然质量分",
    "自然等指数",
    "自然等",
    "整治前评分",
    "整治后评分",
    "利用系数",
    "利用等指数",
    "利用等",
    "经济系数",
    "经济等指数",
    "经济等",
    "综合利用系数",
    "综合经济系数",
    "国家自然等",
    "国家利用等",
    "国家经济等",
    "备注",
];

/// 组装质量等别评定表：每地块一行（含逐作物的评分、潜力、
/// 产量比、分项指数与分段查得的综合系数），附「整理」「开发」
/// 两行面积加权汇总。利用系数无法修正的地块跳过并记日志。
pub fn evaluation_table(
    entries: &[(usize, Patch)],
    rules: &impl RuleLookup,
) -> Result<CellGrid> {
    let mut grid = CellGrid::new("质量等别评定");
    grid.push_row(HEADER.iter().map(|h| Cell::text(*h)).collect());

    // (等别×面积 的累计, 面积累计)：[0] 整理，[1] 开发
    let mut sums = [[0.0f64; 3]; 2];
    let mut areas = [0.0f64; 2];

    for (record, patch) in entries {
        let grades = match PatchGrades::evaluate(patch, rules) {
            Ok(grades) => grades,
            Err(Error::ZeroUtilizationScore) => {
                warn!(
                    "地块 {}（第 {} 条记录）整治前评分为 0，不列入评定表",
                    patch.name,
                    record + 1
                );
                continue;
            }
            Err(e) => return Err(e),
        };

        let group = usize::from(patch.is_new);
        sums[group][0] += grades.state_natural_quality_grade as f64 * patch.area;
        sums[group][1] += grades.state_utilization_grade as f64 * patch.area;
        sums[group][2] += grades.state_economical_grade as f64 * patch.area;
        areas[group] += patch.area;

        let mut row = vec![
            Cell::text(&patch.name),
            Cell::text(&patch.county),
            Cell::text(&patch.third_index_region),
            Cell::text(patch.land_class().name()),
            Cell::number(patch.area, 4),
            Cell::text(if patch.is_new { "开发" } else { "整理" }),
        ];
        for crop in patch.crops() {
            let score = crop_natural_quality_score(patch, &crop.name, rules);
            let potential = crop_index_potential(patch, &crop.name, rules);
            let ratio = crop.yield_ratio();
            row.extend([
                Cell::text(&crop.name),
                Cell::number(score, 3),
                Cell::number(potential, 0),
                Cell::number(ratio, 1),
                Cell::number(score * potential * ratio, 0),
            ]);
        }
        row.extend([
            Cell::number(grades.natural_quality_score, 4),
            Cell::number(grades.natural_quality_grade_index, 2),
            Cell::number(grades.natural_quality_grade as f64, 0),
            Cell::number(utilization_score(&patch.before_levels), 2),
            Cell::number(utilization_score(&patch.after_levels), 2),
            Cell::number(grades.utilization_coefficient, 4),
            Cell::number(grades.utilization_grade_index, 2),
            Cell::number(grades.utilization_grade as f64, 0),
            Cell::number(patch.economical_coefficient, 4),
            Cell::number(grades.economical_grade_index, 2),
            Cell::number(grades.economical_grade as f64, 0),
            Cell::number(
                rules.composite_utilization_coefficient(
                    &patch.county,
                    grades.utilization_coefficient,
                ),
                3,
            ),
            Cell::number(
                rules.composite_economical_coefficient(
                    &patch.county,
                    patch.economical_coefficient,
                ),
                3,
            ),
            Cell::StyledNumber {
                value: grades.state_natural_quality_grade as f64,
                decimals: 0,
                color: CellColor::Blue,
            },
            Cell::StyledNumber {
                value: grades.state_utilization_grade as f64,
                decimals: 0,
                color: CellColor::Red,
            },
            Cell::StyledNumber {
                value: grades.state_economical_grade as f64,
                decimals: 0,
                color: CellColor::Green,
            },
            Cell::Empty,
        ]);
        grid.push_row(row);
    }

    for (group, label) in [(0usize, "整理汇总"), (1usize, "开发汇总")] {
        let mut row = vec![Cell::text(label)];
        row.extend(std::iter::repeat(Cell::Empty).take(3));
        row.push(Cell::number(areas[group], 4));
        row.extend(std::iter::repeat(Cell::Empty).take(24));
        for i in 0..3 {
            let mean = if areas[group] == 0.0 {
                0.0
            } else {
                sums[group][i] / areas[group]
            };
            row.push(Cell::number(mean, 2));
        }
        row.push(Cell::Empty);
        grid.push_row(row);
    }

    Ok(grid)
}

/// 内置的 CSV 渲染端
pub struct CsvRenderer<W: std::io::Write> {
    writer: csv::Writer<W>,
}

impl<W: std::io::Write> CsvRenderer<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(inner),
        }
    }
}

impl<W: std::io::Write> SheetRenderer for CsvRenderer<W> {
    fn render(&mut self, grid: &CellGrid) -> Result<()> {
        for row in grid.rows() {
            let record: Vec<String> = row.iter().map(Cell::to_text).collect();
            self.writer.write_record(&record)?;
        }
        self.writer.flush().map_err(Error::Io)?;
        Ok(())
    }
}

/// 把评定表写成 CSV 文件
pub fn write_report_csv(path: &Path, grid: &CellGrid) -> Result<()> {
    let file = std::fs::File::create(path)?;
    CsvRenderer::new(file).render(grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EvaluationFactor, LandClass, UtilizationKind};

    struct FlatRules;

    impl RuleLookup for FlatRules {
        fn score(&self, _: &str, _: LandClass, _: &str, _: &EvaluationFactor) -> i32 {
            80
        }
        fn weight(&self, _: &str, _: &str, _: LandClass) -> f64 {
            1.0 / 7.0
        }
        fn light_temperature_potential(&self, _: &str, crop: &str) -> f64 {
            if crop == "水稻" {
                1200.0
            } else {
                900.0
            }
        }
        fn climate_potential(&self, county: &str, crop: &str) -> f64 {
            self.light_temperature_potential(county, crop)
        }
        fn max_yield(&self, _: &str, _: &str) -> i32 {
            600
        }
        fn max_goc_index(&self, _: &str) -> f64 {
            5.0
        }
        fn composite_utilization_coefficient(&self, _: &str, _: f64) -> f64 {
            0.88
        }
        fn composite_economical_coefficient(&self, _: &str, _: f64) -> f64 {
            0.92
        }
    }

    fn patch(name: &str, area: f64, is_new: bool) -> Patch {
        let mut patch = Patch::new(LandClass::PaddyField, name, "某县", "I区");
        patch.area = area;
        patch.is_new = is_new;
        patch.utilization_coefficient = 0.8;
        patch.economical_coefficient = 0.9;
        if !is_new {
            for kind in UtilizationKind::ALL {
                patch.before_levels.set(kind, 1);
                patch.after_levels.set(kind, 1);
            }
        }
        patch
    }

    #[test]
    fn test_table_shape_and_summary_rows() {
        let entries = vec![
            (0usize, patch("DY-001", 10.0, false)),
            (1usize, patch("DY-002", 30.0, false)),
            (2usize, patch("DY-003", 5.0, true)),
        ];
        let grid = evaluation_table(&entries, &FlatRules).unwrap();

        // 表头 + 3 个地块 + 2 行汇总
        assert_eq!(grid.rows().len(), 6);
        for row in grid.rows() {
            assert_eq!(row.len(), HEADER.len());
        }

        let improved = &grid.rows()[4];
        assert_eq!(improved[0], Cell::text("整理汇总"));
        assert_eq!(improved[4], Cell::number(40.0, 4));
        let reclaimed = &grid.rows()[5];
        assert_eq!(reclaimed[0], Cell::text("开发汇总"));
        assert_eq!(reclaimed[4], Cell::number(5.0, 4));
    }

    #[test]
    fn test_area_weighted_summary() {
        // 两个整理地块等别相同，面积加权平均仍等于该等别
        let entries = vec![
            (0usize, patch("DY-001", 10.0, false)),
            (1usize, patch("DY-002", 30.0, false)),
        ];
        let grid = evaluation_table(&entries, &FlatRules).unwrap();

        let parcel_row = &grid.rows()[1];
        let Cell::StyledNumber { value: grade, .. } = &parcel_row[29] else {
            panic!("国家自然等应为着色数值");
        };
        let summary = &grid.rows()[3];
        assert_eq!(summary[29], Cell::number(*grade, 2));
    }

    #[test]
    fn test_crop_detail_and_composite_columns() {
        let entries = vec![(0usize, patch("DY-001", 10.0, false))];
        let grid = evaluation_table(&entries, &FlatRules).unwrap();
        let row = &grid.rows()[1];

        // 水田两作物：水稻 0.8×1200×1.0、小麦 0.8×900×1.3
        assert_eq!(row[6], Cell::text("水稻"));
        assert_eq!(row[7].to_text(), "0.800");
        assert_eq!(row[8].to_text(), "1200");
        assert_eq!(row[9].to_text(), "1.0");
        assert_eq!(row[10].to_text(), "960");
        assert_eq!(row[11], Cell::text("小麦"));
        assert_eq!(row[15].to_text(), "936");

        // 分段查得的综合系数
        assert_eq!(row[27].to_text(), "0.880");
        assert_eq!(row[28].to_text(), "0.920");
    }

    #[test]
    fn test_zero_before_score_row_skipped() {
        let mut bad = patch("DY-009", 10.0, false);
        bad.before_levels = Default::default();
        let entries = vec![(0usize, bad), (1usize, patch("DY-010", 10.0, false))];
        let grid = evaluation_table(&entries, &FlatRules).unwrap();
        // 表头 + 1 个地块 + 2 行汇总
        assert_eq!(grid.rows().len(), 4);
    }

    #[test]
    fn test_csv_rendering() {
        let entries = vec![(0usize, patch("DY-001", 10.0, false))];
        let grid = evaluation_table(&entries, &FlatRules).unwrap();

        let mut out = Vec::new();
        CsvRenderer::new(&mut out).render(&grid).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("单元编号,县,指标区"));
        assert!(lines[1].contains("DY-001"));
        assert!(lines[1].contains("1896.00"));
    }

    #[test]
    fn test_cell_to_text() {
        assert_eq!(Cell::Empty.to_text(), "");
        assert_eq!(Cell::text("面").to_text(), "面");
        assert_eq!(Cell::number(0.75, 4).to_text(), "0.7500");
        let styled = Cell::StyledNumber {
            value: 12.0,
            decimals: 0,
            color: CellColor::Blue,
        };
        assert_eq!(styled.to_text(), "12");
    }
}
