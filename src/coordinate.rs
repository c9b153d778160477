use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::shapefile::{DbfFile, FieldType, Geometry, ShapeType, ShpReader, ShpWriter};

/// 坐标文件属性描述区的七项参数
#[derive(Debug, Clone)]
pub struct CoordinateProperty {
    pub coordinate_system: String,
    /// 几度分带（3 或 6）
    pub zone_type: i16,
    pub projection_type: String,
    pub unit: String,
    pub zone: i16,
    pub decimals: f64,
    pub parameters: String,
}

impl Default for CoordinateProperty {
    fn default() -> Self {
        Self {
            coordinate_system: "2000国家大地坐标系".to_string(),
            zone_type: 3,
            projection_type: "高斯克吕格".to_string(),
            unit: "米".to_string(),
            zone: 0,
            decimals: 0.001,
            parameters: ",,,,,,".to_string(),
        }
    }
}

/// 从坐标文件读出的一个地块，环已闭合（末顶点复写首顶点）
#[derive(Debug, Clone, PartialEq)]
pub struct ReportedParcel {
    pub identifier: String,
    /// 上报面积（万平方米，文件中 4 位小数）
    pub recorded_area: f64,
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
}

/// 把多边形图层导出为上报坐标文件，返回导出的地块数
///
/// 文件格式为对外交换契约：9 行属性描述、地块行
/// `点数,面积,序号,标识,面,,,,@`、界址点行 `J号,1,Y,X`，
/// 其中 J 号在整个文件内连续编号，面积 4 位小数、坐标 3 位小数。
pub fn write_coordinate_file(
    shp_path: &Path,
    txt_path: &Path,
    property: &CoordinateProperty,
    id_field: &str,
) -> Result<usize> {
    let reader = ShpReader::open(shp_path)?;
    let dbf = DbfFile::open(&shp_path.with_extension("dbf"))?;
    let field = dbf
        .field_index(id_field)
        .ok_or_else(|| Error::FieldMissing(id_field.to_string()))?;

    let mut text = String::new();
    let _ = writeln!(text, "[属性描述]");
    let _ = writeln!(text, "坐标系={}", property.coordinate_system);
    let _ = writeln!(text, "几度分带={}", property.zone_type);
    let _ = writeln!(text, "投影类型={}", property.projection_type);
    let _ = writeln!(text, "计量单位={}", property.unit);
    let _ = writeln!(text, "带号={}", property.zone);
    let _ = writeln!(text, "精度={}", property.decimals);
    let _ = writeln!(text, "转换参数={}", property.parameters);
    let _ = writeln!(text, "[地块坐标]");

    let mut exported = 0;
    let mut point_number = 0u64;
    for i in 0..reader.entity_count() {
        let Some(geometry) = reader.read(i)? else {
            warn!("第 {} 条几何记录损坏，跳过", i + 1);
            continue;
        };
        let n = geometry.vertex_count();
        if n < 2 {
            warn!("第 {} 条几何记录顶点不足，跳过", i + 1);
            continue;
        }
        let identifier = dbf.read_string(i, field).unwrap_or_default();
        let area = geometry.ring_area();
        let _ = writeln!(
            text,
            "{},{:.4},{},{},面,,,,@",
            n - 1,
            area / 10000.0,
            i + 1,
            identifier
        );
        for v in 0..n - 1 {
            point_number += 1;
            let _ = writeln!(
                text,
                "J{},1,{:.3},{:.3}",
                point_number, geometry.ys[v], geometry.xs[v]
            );
        }
        exported += 1;
    }

    fs::write(txt_path, text)?;
    info!("导出 {} 个地块到 {}", exported, txt_path.display());
    Ok(exported)
}

/// 解析上报坐标文件
///
/// 文件缺失或整体无法解析时返回空集合而不是错误，由调用方
/// 决定是否继续；个别残缺行记日志后跳过。
pub fn read_coordinate_file(txt_path: &Path) -> Result<Vec<ReportedParcel>> {
    if !txt_path.exists() {
        warn!("坐标文件 {} 不存在", txt_path.display());
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(txt_path)?;

    let mut parcels: Vec<ReportedParcel> = Vec::new();
    let mut current: Option<ReportedParcel> = None;

    // 前 9 行是属性描述区
    for (line_number, line) in text.lines().enumerate().skip(9) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if line.ends_with('@') {
            if let Some(parcel) = current.take() {
                parcels.push(close_ring(parcel));
            }
            if fields.len() < 4 {
                warn!("坐标文件第 {} 行字段不足，跳过该地块头", line_number + 1);
                continue;
            }
            current = Some(ReportedParcel {
                identifier: fields[3].to_string(),
                recorded_area: fields[1].parse().unwrap_or(0.0),
                xs: Vec::new(),
                ys: Vec::new(),
            });
        } else if let Some(parcel) = current.as_mut() {
            if fields.len() < 4 {
                warn!("坐标文件第 {} 行字段不足，跳过", line_number + 1);
                continue;
            }
            // 界址点行先写 Y 后写 X
            match (fields[2].parse::<f64>(), fields[3].parse::<f64>()) {
                (Ok(y), Ok(x)) => {
                    parcel.ys.push(y);
                    parcel.xs.push(x);
                }
                _ => warn!("坐标文件第 {} 行坐标无法解析，跳过", line_number + 1),
            }
        }
    }
    if let Some(parcel) = current.take() {
        parcels.push(close_ring(parcel));
    }

    parcels.retain(|p| {
        if p.xs.len() < 4 {
            warn!("地块 {} 顶点不足，丢弃", p.identifier);
            false
        } else {
            true
        }
    });
    Ok(parcels)
}

fn close_ring(mut parcel: ReportedParcel) -> ReportedParcel {
    if let (Some(&x0), Some(&y0)) = (parcel.xs.first(), parcel.ys.first()) {
        parcel.xs.push(x0);
        parcel.ys.push(y0);
    }
    parcel
}

/// 坐标文件 → 多边形图层。地块集合为空时不产生任何输出文件。
pub fn coordinate_file_to_shapefile(
    txt_path: &Path,
    shp_path: &Path,
    id_field: &str,
) -> Result<usize> {
    let parcels = read_coordinate_file(txt_path)?;
    if parcels.is_empty() {
        warn!("坐标文件 {} 未解析出地块，不生成图层", txt_path.display());
        return Ok(0);
    }

    let mut writer = ShpWriter::create(shp_path, ShapeType::Polygon);
    let mut dbf = DbfFile::new();
    let id_index = dbf.add_field(id_field, FieldType::String, 30, 0);
    let area_index = dbf.add_field("JLMJ", FieldType::Double, 20, 4);

    for (i, parcel) in parcels.iter().enumerate() {
        writer.write(
            None,
            Geometry::simple(
                ShapeType::Polygon,
                parcel.xs.clone(),
                parcel.ys.clone(),
                Vec::new(),
            ),
        );
        dbf.write_string(i, id_index, &parcel.identifier);
        dbf.write_double(i, area_index, parcel.recorded_area);
    }

    writer.finish()?;
    dbf.save(&shp_path.with_extension("dbf"))?;
    info!("从 {} 导入 {} 个地块", txt_path.display(), parcels.len());
    Ok(parcels.len())
}
