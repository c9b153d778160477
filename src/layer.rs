use std::path::Path;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::grading::PatchGrades;
use crate::model::{LandClass, Patch, UtilizationKind};
use crate::rules::RuleLookup;
use crate::shapefile::{DbfFile, FieldType, ShpReader, ShpWriter};

/// 分等因素 → 调查表字段名
const FACTOR_FIELDS: [(&str, &str); 10] = [
    ("有效土层厚度", "YXTCHD"),
    ("表层土壤质地", "BCTRZD"),
    ("剖面构型", "PMGX"),
    ("土壤有机质含量", "TRYJZHL"),
    ("土壤PH值", "TRSJD"),
    ("障碍层距地表深度", "ZACJDBSD"),
    ("排水条件", "PSTJ"),
    ("地形坡度", "DXPD"),
    ("灌溉保证率", "GGBZL"),
    ("地表岩石出露度", "DBYSLTD"),
];

/// 利用状况因素 → 调查表字段名前缀（整治前缀 1，整治后缀 2）
const LEVEL_FIELDS: [(UtilizationKind, &str); 5] = [
    (UtilizationKind::WaterSource, "SYTJ"),
    (UtilizationKind::IrrigationMethod, "GGTJ"),
    (UtilizationKind::DrainageMethod, "PSTJ"),
    (UtilizationKind::RoadAccess, "DLTDD"),
    (UtilizationKind::FieldFlatness, "TKPZD"),
];

/// 从调查属性表装载地块，返回（记录号，地块）对
///
/// 地类编码无法识别的记录记日志后跳过，装载继续。
pub fn load_patches(dbf: &DbfFile, use_climate_potential: bool) -> Vec<(usize, Patch)> {
    let text = |record: usize, name: &str| -> String {
        dbf.field_index(name)
            .and_then(|i| dbf.read_string(record, i))
            .unwrap_or_default()
    };
    let number = |record: usize, name: &str| -> f64 {
        dbf.field_index(name)
            .and_then(|i| dbf.read_double(record, i))
            .unwrap_or(0.0)
    };
    let level = |record: usize, name: &str| -> i32 {
        dbf.field_index(name)
            .and_then(|i| dbf.read_integer(record, i))
            .unwrap_or(0) as i32
    };

    let mut patches = Vec::new();
    for record in 0..dbf.record_count() {
        let code = text(record, "DLDM");
        let class = match LandClass::from_code(&code) {
            Ok(class) => class,
            Err(e) => {
                warn!("第 {} 条记录跳过: {}", record + 1, e);
                continue;
            }
        };

        let mut patch = Patch::new(
            class,
            &text(record, "XJDYBH"),
            &text(record, "SJQMC"),
            &text(record, "X"),
        );
        patch.area = number(record, "ZRDMJ");
        // 旧版调查表把 SFXZGD 建成 Integer(1) 存 1/0，逻辑读不出来时回退按整数读
        patch.is_new = dbf
            .field_index("SFXZGD")
            .and_then(|i| {
                dbf.read_logical(record, i)
                    .or_else(|| dbf.read_integer(record, i).map(|v| v != 0))
            })
            .unwrap_or(false);
        patch.uses_climate_potential = use_climate_potential;
        patch.utilization_coefficient = number(record, "TDLYXS");
        patch.economical_coefficient = number(record, "TDJJXS");

        for (factor_name, field_name) in FACTOR_FIELDS {
            // 不属于该地类模板的因素名不生效
            patch.set_factor_value(factor_name, &text(record, field_name));
        }

        // 水田的第一指定作物取基准作物字段，其余地类取指定作物一、二
        let crop_fields: [(&str, &str); 2] = match class {
            LandClass::PaddyField => [("JZZWCL", "JZZWCB"), ("ZDZW1CL", "ZDZW1CB")],
            _ => [("ZDZW1CL", "ZDZW1CB"), ("ZDZW2CL", "ZDZW2CB")],
        };
        for (i, (output_field, cost_field)) in crop_fields.iter().enumerate() {
            patch.set_crop_survey(i, number(record, output_field), number(record, cost_field));
        }

        for (kind, prefix) in LEVEL_FIELDS {
            patch
                .before_levels
                .set(kind, level(record, &format!("{}1", prefix)));
            patch
                .after_levels
                .set(kind, level(record, &format!("{}2", prefix)));
        }

        patches.push((record, patch));
    }
    info!("装载 {} 个地块（共 {} 条记录）", patches.len(), dbf.record_count());
    patches
}

/// 产量、成本调查字段
const CROP_FIELDS: [&str; 6] = ["JZZWCL", "JZZWCB", "ZDZW1CL", "ZDZW1CB", "ZDZW2CL", "ZDZW2CB"];

/// 在调查表上补齐作物产量与利用状况调查字段（可重复调用）
pub fn add_assist_fields(dbf: &mut DbfFile) {
    for name in CROP_FIELDS {
        dbf.add_field(name, FieldType::Double, 7, 2);
    }
    dbf.add_field("SFXZGD", FieldType::Integer, 1, 0);
    dbf.add_field("TDLYXS", FieldType::Double, 7, 2);
    dbf.add_field("TDJJXS", FieldType::Double, 7, 2);
    for (_, prefix) in LEVEL_FIELDS {
        dbf.add_field(&format!("{}1", prefix), FieldType::Integer, 1, 0);
        dbf.add_field(&format!("{}2", prefix), FieldType::Integer, 1, 0);
    }
}

/// 评定结果回写字段：(字段名, 类型, 宽度, 小数位)
const GRADE_FIELDS: [(&str, FieldType, usize, usize); 15] = [
    ("ZHZLF", FieldType::Double, 7, 4),
    ("ZRDZS", FieldType::Double, 10, 2),
    ("ZRDB", FieldType::Integer, 2, 0),
    ("TDLYXS", FieldType::Double, 7, 2),
    ("LYDZS", FieldType::Double, 10, 2),
    ("LYD", FieldType::Integer, 2, 0),
    ("TDJJXS", FieldType::Double, 7, 2),
    ("DBZ", FieldType::Double, 10, 2),
    ("DB", FieldType::Integer, 2, 0),
    ("GJZRDZS", FieldType::Double, 10, 2),
    ("GJZRDB", FieldType::Integer, 2, 0),
    ("GJLYDZS", FieldType::Double, 10, 2),
    ("GJLYDB", FieldType::Integer, 2, 0),
    ("GJDBZS", FieldType::Double, 10, 2),
    ("GJDB", FieldType::Integer, 2, 0),
];

/// 把评定结果回写进属性表，返回成功回写的记录数
///
/// 整治前评分为 0 的地块按统一的领域错误策略跳过并记日志，
/// 绝不把 NaN/Infinity 写进 DBF 数值字段。
pub fn write_grades(
    dbf: &mut DbfFile,
    entries: &[(usize, Patch)],
    rules: &impl RuleLookup,
) -> Result<usize> {
    for (name, field_type, width, decimals) in GRADE_FIELDS {
        dbf.add_field(name, field_type, width, decimals);
    }
    let index = |dbf: &DbfFile, name: &str| -> Result<usize> {
        dbf.field_index(name)
            .ok_or_else(|| Error::FieldMissing(name.to_string()))
    };

    let mut written = 0;
    for (record, patch) in entries {
        let grades = match PatchGrades::evaluate(patch, rules) {
            Ok(grades) => grades,
            Err(Error::ZeroUtilizationScore) => {
                warn!(
                    "地块 {}（第 {} 条记录）整治前评分为 0，不回写",
                    patch.name,
                    record + 1
                );
                continue;
            }
            Err(e) => return Err(e),
        };

        let record = *record;
        let doubles = [
            ("ZHZLF", grades.natural_quality_score),
            ("ZRDZS", grades.natural_quality_grade_index),
            ("TDLYXS", grades.utilization_coefficient),
            ("LYDZS", grades.utilization_grade_index),
            ("TDJJXS", patch.economical_coefficient),
            ("DBZ", grades.economical_grade_index),
            ("GJZRDZS", grades.state_natural_quality_index),
            ("GJLYDZS", grades.state_utilization_index),
            ("GJDBZS", grades.state_economical_index),
        ];
        for (name, value) in doubles {
            let i = index(dbf, name)?;
            dbf.write_double(record, i, value);
        }
        let integers = [
            ("ZRDB", grades.natural_quality_grade),
            ("LYD", grades.utilization_grade),
            ("DB", grades.economical_grade),
            ("GJZRDB", grades.state_natural_quality_grade),
            ("GJLYDB", grades.state_utilization_grade),
            ("GJDB", grades.state_economical_grade),
        ];
        for (name, value) in integers {
            let i = index(dbf, name)?;
            dbf.write_integer(record, i, value as i64);
        }
        written += 1;
    }
    info!("回写 {} / {} 个地块的评定结果", written, entries.len());
    Ok(written)
}

/// 整层复制，损坏的几何记录跳过。返回（复制数，跳过数）。
pub fn copy_layer(src: &Path, dst: &Path) -> Result<(usize, usize)> {
    let reader = ShpReader::open(src)?;
    let src_dbf = DbfFile::open(&src.with_extension("dbf"))?;

    let mut writer = ShpWriter::create(dst, reader.shape_type());
    let mut dst_dbf = DbfFile::new();
    for field in src_dbf.fields() {
        dst_dbf.add_field(&field.name, field.field_type, field.width, field.decimals);
    }

    let mut copied = 0;
    let mut skipped = 0;
    for i in 0..reader.entity_count() {
        let Some(geometry) = reader.read(i)? else {
            warn!("第 {} 条几何记录为空或损坏，跳过", i + 1);
            skipped += 1;
            continue;
        };
        writer.write(None, geometry);
        for f in 0..src_dbf.field_count() {
            if let Some(value) = src_dbf.read_string(i, f) {
                dst_dbf.write_string(copied, f, &value);
            }
        }
        copied += 1;
    }

    writer.finish()?;
    dst_dbf.save(&dst.with_extension("dbf"))?;
    info!("复制 {} 条记录，跳过 {} 条", copied, skipped);
    Ok((copied, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::MemoryRuleLookup;

    /// 拼一张两条记录的调查表：一条水田、一条旱地
    fn survey_dbf() -> DbfFile {
        let mut dbf = DbfFile::new();
        for (name, width) in [("XJDYBH", 30), ("SJQMC", 50), ("X", 20), ("DLDM", 4)] {
            dbf.add_field(name, FieldType::String, width, 0);
        }
        dbf.add_field("ZRDMJ", FieldType::Double, 20, 4);
        add_assist_fields(&mut dbf);
        for (_, field) in FACTOR_FIELDS {
            dbf.add_field(field, FieldType::String, 10, 0);
        }

        let set = |dbf: &mut DbfFile, record: usize, name: &str, value: &str| {
            let i = dbf.field_index(name).unwrap();
            dbf.write_string(record, i, value);
        };

        set(&mut dbf, 0, "XJDYBH", "DY-001");
        set(&mut dbf, 0, "SJQMC", "某县");
        set(&mut dbf, 0, "X", "I区");
        set(&mut dbf, 0, "DLDM", "011");
        set(&mut dbf, 0, "ZRDMJ", "12.5");
        set(&mut dbf, 0, "SFXZGD", "0");
        set(&mut dbf, 0, "TDLYXS", "0.60");
        set(&mut dbf, 0, "TDJJXS", "0.90");
        set(&mut dbf, 0, "BCTRZD", "壤土");
        set(&mut dbf, 0, "ZACJDBSD", "95");
        set(&mut dbf, 0, "JZZWCL", "500");
        set(&mut dbf, 0, "JZZWCB", "120");
        set(&mut dbf, 0, "ZDZW1CL", "400");
        set(&mut dbf, 0, "ZDZW1CB", "100");
        for (_, prefix) in LEVEL_FIELDS {
            set(&mut dbf, 0, &format!("{}1", prefix), "2");
            set(&mut dbf, 0, &format!("{}2", prefix), "1");
        }

        set(&mut dbf, 1, "XJDYBH", "DY-002");
        set(&mut dbf, 1, "SJQMC", "某县");
        set(&mut dbf, 1, "X", "I区");
        set(&mut dbf, 1, "DLDM", "013");
        set(&mut dbf, 1, "ZRDMJ", "8.0");
        set(&mut dbf, 1, "SFXZGD", "1");
        set(&mut dbf, 1, "TDLYXS", "0.70");
        set(&mut dbf, 1, "TDJJXS", "0.80");
        set(&mut dbf, 1, "YXTCHD", "80");
        set(&mut dbf, 1, "ZDZW1CL", "350");
        set(&mut dbf, 1, "ZDZW1CB", "90");
        set(&mut dbf, 1, "ZDZW2CL", "450");
        set(&mut dbf, 1, "ZDZW2CB", "110");

        // 地类无法识别的第三条记录
        set(&mut dbf, 2, "XJDYBH", "DY-003");
        set(&mut dbf, 2, "DLDM", "021");
        dbf
    }

    #[test]
    fn test_load_patches_skips_unknown_class() {
        let dbf = survey_dbf();
        let patches = load_patches(&dbf, true);
        assert_eq!(patches.len(), 2);

        let (record, paddy) = &patches[0];
        assert_eq!(*record, 0);
        assert_eq!(paddy.name, "DY-001");
        assert_eq!(paddy.land_class(), LandClass::PaddyField);
        assert_eq!(paddy.area, 12.5);
        assert!(!paddy.is_new);
        assert_eq!(paddy.utilization_coefficient, 0.6);
        // 水田第一作物取基准作物字段
        assert_eq!(paddy.crops()[0].grain_output, 500.0);
        assert_eq!(paddy.crops()[1].grain_output, 400.0);
        let f = paddy
            .factors()
            .iter()
            .find(|f| f.name == "障碍层距地表深度")
            .unwrap();
        assert_eq!(f.value, "95");
        assert_eq!(paddy.before_levels.get(UtilizationKind::WaterSource), 2);
        assert_eq!(paddy.after_levels.get(UtilizationKind::WaterSource), 1);

        let (record, dry) = &patches[1];
        assert_eq!(*record, 1);
        assert_eq!(dry.land_class(), LandClass::Dryland);
        assert!(dry.is_new);
        // 旱地两作物取指定作物一、二
        assert_eq!(dry.crops()[0].grain_output, 350.0);
        assert_eq!(dry.crops()[1].grain_output, 450.0);
    }

    #[test]
    fn test_is_new_accepts_integer_and_logical_text() {
        let mut dbf = DbfFile::new();
        dbf.add_field("XJDYBH", FieldType::String, 30, 0);
        dbf.add_field("DLDM", FieldType::String, 4, 0);
        dbf.add_field("SFXZGD", FieldType::Integer, 1, 0);
        let class = dbf.field_index("DLDM").unwrap();
        let flag = dbf.field_index("SFXZGD").unwrap();
        for (record, value) in [(0usize, "1"), (1, "0"), (2, "T")] {
            dbf.write_string(record, class, "013");
            dbf.write_string(record, flag, value);
        }

        let patches = load_patches(&dbf, true);
        assert_eq!(patches.len(), 3);
        assert!(patches[0].1.is_new);
        assert!(!patches[1].1.is_new);
        assert!(patches[2].1.is_new);
    }

    fn paddy_rules() -> MemoryRuleLookup {
        let mut rules = MemoryRuleLookup::new();
        let paddy_factors = [
            "表层土壤质地",
            "剖面构型",
            "土壤有机质含量",
            "土壤PH值",
            "障碍层距地表深度",
            "排水条件",
            "灌溉保证率",
        ];
        for crop in ["水稻", "小麦"] {
            for factor in paddy_factors {
                if factor == "障碍层距地表深度" {
                    rules.add_score_rule(
                        "I区",
                        LandClass::PaddyField,
                        crop,
                        factor,
                        None,
                        Some((90.0, 10000.0)),
                        80,
                    );
                } else {
                    // 调查表里没填的固定因素值为空串
                    for value in ["壤土", ""] {
                        rules.add_score_rule(
                            "I区",
                            LandClass::PaddyField,
                            crop,
                            factor,
                            Some(value),
                            None,
                            80,
                        );
                    }
                }
            }
        }
        for factor in paddy_factors {
            rules.add_weight("I区", factor, LandClass::PaddyField, 1.0 / 7.0);
        }
        rules.add_potential("某县", "水稻", 1200.0, 1100.0);
        rules.add_potential("某县", "小麦", 900.0, 850.0);
        rules
    }

    #[test]
    fn test_write_grades_round_trip() {
        let mut dbf = survey_dbf();
        let patches: Vec<(usize, Patch)> = load_patches(&dbf, true)
            .into_iter()
            .filter(|(_, p)| p.land_class() == LandClass::PaddyField)
            .collect();
        let rules = paddy_rules();

        let written = write_grades(&mut dbf, &patches, &rules).unwrap();
        assert_eq!(written, 1);

        // 指数 = 0.8×1200×1.0 + 0.8×900×1.3 = 1896
        let zrdzs = dbf.field_index("ZRDZS").unwrap();
        assert!((dbf.read_double(0, zrdzs).unwrap() - 1896.0).abs() < 0.01);
        let zrdb = dbf.field_index("ZRDB").unwrap();
        assert_eq!(dbf.read_integer(0, zrdb).unwrap(), 10);
        // 整治前 80 分、整治后 100 分：0.60 × 100/80 = 0.75
        let lyxs = dbf.field_index("TDLYXS").unwrap();
        assert!((dbf.read_double(0, lyxs).unwrap() - 0.75).abs() < 1e-9);
        let lydzs = dbf.field_index("LYDZS").unwrap();
        assert!((dbf.read_double(0, lydzs).unwrap() - 1896.0 * 0.75).abs() < 0.01);
    }

    #[test]
    fn test_write_grades_skips_zero_before_score() {
        let mut dbf = survey_dbf();
        let mut patches: Vec<(usize, Patch)> = load_patches(&dbf, true)
            .into_iter()
            .filter(|(_, p)| p.land_class() == LandClass::PaddyField)
            .collect();
        // 整治地块且整治前全 0 级
        patches[0].1.before_levels = Default::default();

        let written = write_grades(&mut dbf, &patches, &paddy_rules()).unwrap();
        assert_eq!(written, 0);
        let zrdb = dbf.field_index("ZRDB").unwrap();
        assert!(dbf.read_integer(0, zrdb).is_none());
    }

    #[test]
    fn test_add_assist_fields_idempotent() {
        let mut dbf = DbfFile::new();
        add_assist_fields(&mut dbf);
        let count = dbf.field_count();
        add_assist_fields(&mut dbf);
        assert_eq!(dbf.field_count(), count);
        assert!(dbf.field_index("SYTJ1").is_some());
        assert!(dbf.field_index("TKPZD2").is_some());
        // 产量、成本调查字段也一并补齐
        for name in CROP_FIELDS {
            assert!(dbf.field_index(name).is_some());
        }
    }

    #[test]
    fn test_copy_layer_skips_broken_records() {
        use crate::shapefile::{Geometry, ShapeType};
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src.shp");
        let dst = dir.path().join("dst.shp");

        let mut writer = ShpWriter::create(&src, ShapeType::Polygon);
        writer.write(
            None,
            Geometry::simple(
                ShapeType::Polygon,
                vec![0.0, 1.0, 1.0, 0.0, 0.0],
                vec![0.0, 0.0, 1.0, 1.0, 0.0],
                Vec::new(),
            ),
        );
        // 空几何（Null 类型）在复制时会被跳过
        writer.write(None, Geometry::simple(ShapeType::Null, vec![], vec![], vec![]));
        writer.finish().unwrap();

        let mut dbf = DbfFile::new();
        let field = dbf.add_field("XJDYBH", FieldType::String, 30, 0);
        dbf.write_string(0, field, "DY-001");
        dbf.write_string(1, field, "DY-002");
        dbf.save(&src.with_extension("dbf")).unwrap();

        let (copied, skipped) = copy_layer(&src, &dst).unwrap();
        assert_eq!((copied, skipped), (1, 1));

        let restored = DbfFile::open(&dst.with_extension("dbf")).unwrap();
        assert_eq!(restored.record_count(), 1);
        assert_eq!(restored.read_string(0, 0).unwrap(), "DY-001");
    }
}
