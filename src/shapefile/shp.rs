use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{Error, Result};

const FILE_CODE: i32 = 9994;
const VERSION: i32 = 1000;
const HEADER_LEN: usize = 100;

/// ESRI Shapefile 的几何类型编码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeType {
    Null,
    Point,
    PolyLine,
    Polygon,
    MultiPoint,
    PointZ,
    PolyLineZ,
    PolygonZ,
    MultiPointZ,
    PointM,
    PolyLineM,
    PolygonM,
    MultiPointM,
}

impl ShapeType {
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(Self::Null),
            1 => Ok(Self::Point),
            3 => Ok(Self::PolyLine),
            5 => Ok(Self::Polygon),
            8 => Ok(Self::MultiPoint),
            11 => Ok(Self::PointZ),
            13 => Ok(Self::PolyLineZ),
            15 => Ok(Self::PolygonZ),
            18 => Ok(Self::MultiPointZ),
            21 => Ok(Self::PointM),
            23 => Ok(Self::PolyLineM),
            25 => Ok(Self::PolygonM),
            28 => Ok(Self::MultiPointM),
            other => Err(Error::ShpFormat(format!("未知的几何类型编码 {}", other))),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Null => 0,
            Self::Point => 1,
            Self::PolyLine => 3,
            Self::Polygon => 5,
            Self::MultiPoint => 8,
            Self::PointZ => 11,
            Self::PolyLineZ => 13,
            Self::PolygonZ => 15,
            Self::MultiPointZ => 18,
            Self::PointM => 21,
            Self::PolyLineM => 23,
            Self::PolygonM => 25,
            Self::MultiPointM => 28,
        }
    }

    /// 去掉 Z/M 修饰后的基本类型。Z/M 变体只读取 XY，不另行处理。
    pub fn base(&self) -> ShapeType {
        match self {
            Self::PointZ | Self::PointM => Self::Point,
            Self::PolyLineZ | Self::PolyLineM => Self::PolyLine,
            Self::PolygonZ | Self::PolygonM => Self::Polygon,
            Self::MultiPointZ | Self::MultiPointM => Self::MultiPoint,
            other => *other,
        }
    }

    fn has_z(&self) -> bool {
        matches!(
            self,
            Self::PointZ | Self::PolyLineZ | Self::PolygonZ | Self::MultiPointZ
        )
    }
}

/// 一条几何记录
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub shape_type: ShapeType,
    /// 各部分（环）在顶点数组中的起始下标
    pub parts: Vec<usize>,
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
    pub zs: Vec<f64>,
    pub ms: Vec<f64>,
    /// x, y, z, m 最小值
    pub min: [f64; 4],
    /// x, y, z, m 最大值
    pub max: [f64; 4],
}

impl Geometry {
    /// 单部分几何的便捷构造，M 置 0，包围盒重新计算
    pub fn simple(shape_type: ShapeType, xs: Vec<f64>, ys: Vec<f64>, zs: Vec<f64>) -> Self {
        let n = xs.len();
        let zs = if zs.len() == n { zs } else { vec![0.0; n] };
        let ms = vec![0.0; n];
        let mut geometry = Self {
            shape_type,
            parts: vec![0],
            xs,
            ys,
            zs,
            ms,
            min: [0.0; 4],
            max: [0.0; 4],
        };
        geometry.recompute_bounds();
        geometry
    }

    pub fn vertex_count(&self) -> usize {
        self.xs.len()
    }

    fn recompute_bounds(&mut self) {
        let fold = |values: &[f64]| -> (f64, f64) {
            values.iter().fold((f64::MAX, f64::MIN), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
        };
        if self.xs.is_empty() {
            self.min = [0.0; 4];
            self.max = [0.0; 4];
            return;
        }
        for (i, values) in [&self.xs, &self.ys, &self.zs, &self.ms].into_iter().enumerate() {
            let (lo, hi) = fold(values);
            self.min[i] = lo;
            self.max[i] = hi;
        }
    }

    /// 第一个环的平面面积（鞋带公式）
    ///
    /// 末顶点视作首顶点的闭合复写，只累加 0..n-2 的边。
    pub fn ring_area(&self) -> f64 {
        let end = self
            .parts
            .get(1)
            .copied()
            .unwrap_or(self.xs.len())
            .min(self.xs.len());
        if end < 2 {
            return 0.0;
        }
        let mut sum = 0.0;
        for i in 0..end - 1 {
            sum += (self.xs[i + 1] - self.xs[i]) * (self.ys[i + 1] + self.ys[i]);
        }
        sum.abs() / 2.0
    }
}

/// 只读打开的 .shp 文件
///
/// 打开时整体读入并按记录头扫描建立索引，损坏的记录在
/// `read` 时返回 `None`，由调用方跳过。
pub struct ShpReader {
    shape_type: ShapeType,
    min: [f64; 4],
    max: [f64; 4],
    /// 每条记录的（内容偏移，内容字节数）
    records: Vec<(usize, usize)>,
    buf: Vec<u8>,
}

impl ShpReader {
    pub fn open(path: &Path) -> Result<Self> {
        let buf = fs::read(path)?;
        if buf.len() < HEADER_LEN {
            return Err(Error::ShpFormat(format!(
                "{} 不足 {} 字节文件头",
                path.display(),
                HEADER_LEN
            )));
        }
        if read_i32_be(&buf, 0)? != FILE_CODE {
            return Err(Error::ShpFormat(format!("{} 文件头魔数错误", path.display())));
        }
        if read_i32_le(&buf, 28)? != VERSION {
            return Err(Error::ShpFormat(format!("{} 版本号不是 1000", path.display())));
        }
        let shape_type = ShapeType::from_code(read_i32_le(&buf, 32)?)?;
        let min = [
            read_f64_le(&buf, 36)?,
            read_f64_le(&buf, 44)?,
            read_f64_le(&buf, 68)?,
            read_f64_le(&buf, 84)?,
        ];
        let max = [
            read_f64_le(&buf, 52)?,
            read_f64_le(&buf, 60)?,
            read_f64_le(&buf, 76)?,
            read_f64_le(&buf, 92)?,
        ];

        let mut records = Vec::new();
        let mut pos = HEADER_LEN;
        while pos + 8 <= buf.len() {
            let content_words = read_i32_be(&buf, pos + 4)?;
            if content_words < 0 {
                warn!("第 {} 条记录长度为负，停止扫描", records.len() + 1);
                break;
            }
            let len = content_words as usize * 2;
            if pos + 8 + len > buf.len() {
                warn!("第 {} 条记录超出文件末尾，停止扫描", records.len() + 1);
                break;
            }
            records.push((pos + 8, len));
            pos += 8 + len;
        }

        Ok(Self {
            shape_type,
            min,
            max,
            records,
            buf,
        })
    }

    /// (记录数, 几何类型, 最小包围值, 最大包围值)
    pub fn info(&self) -> (usize, ShapeType, [f64; 4], [f64; 4]) {
        (self.records.len(), self.shape_type, self.min, self.max)
    }

    pub fn entity_count(&self) -> usize {
        self.records.len()
    }

    pub fn shape_type(&self) -> ShapeType {
        self.shape_type
    }

    /// 读一条记录。下标越界、空几何或记录损坏返回 `None`，
    /// 批量复制的调用方据此跳过而不中断。
    pub fn read(&self, index: usize) -> Result<Option<Geometry>> {
        let Some(&(offset, len)) = self.records.get(index) else {
            return Ok(None);
        };
        match parse_record(&self.buf[offset..offset + len]) {
            Ok(geometry) => Ok(geometry),
            Err(e) => {
                warn!("第 {} 条记录损坏，跳过: {}", index + 1, e);
                Ok(None)
            }
        }
    }
}

fn parse_record(content: &[u8]) -> Result<Option<Geometry>> {
    let code = read_i32_le(content, 0)?;
    if code == 0 {
        return Ok(None);
    }
    let shape_type = ShapeType::from_code(code)?;

    match shape_type.base() {
        ShapeType::Point => {
            let x = read_f64_le(content, 4)?;
            let y = read_f64_le(content, 12)?;
            let z = if shape_type.has_z() && content.len() >= 28 {
                read_f64_le(content, 20)?
            } else {
                0.0
            };
            Ok(Some(Geometry::simple(shape_type, vec![x], vec![y], vec![z])))
        }
        ShapeType::MultiPoint => {
            let n = read_i32_le(content, 36)? as usize;
            let (xs, ys) = read_points(content, 40, n)?;
            let mut geometry = Geometry::simple(shape_type, xs, ys, Vec::new());
            read_z_values(content, 40 + 16 * n, n, shape_type, &mut geometry)?;
            Ok(Some(geometry))
        }
        ShapeType::Polygon | ShapeType::PolyLine => {
            let num_parts = read_i32_le(content, 36)? as usize;
            let num_points = read_i32_le(content, 40)? as usize;
            let mut parts = Vec::with_capacity(num_parts);
            for p in 0..num_parts {
                parts.push(read_i32_le(content, 44 + 4 * p)? as usize);
            }
            let points_offset = 44 + 4 * num_parts;
            let (xs, ys) = read_points(content, points_offset, num_points)?;
            let mut geometry = Geometry::simple(shape_type, xs, ys, Vec::new());
            geometry.parts = parts;
            read_z_values(
                content,
                points_offset + 16 * num_points,
                num_points,
                shape_type,
                &mut geometry,
            )?;
            Ok(Some(geometry))
        }
        other => Err(Error::ShpFormat(format!("不支持的几何类型 {:?}", other))),
    }
}

fn read_points(content: &[u8], offset: usize, n: usize) -> Result<(Vec<f64>, Vec<f64>)> {
    let mut xs = Vec::with_capacity(n);
    let mut ys = Vec::with_capacity(n);
    for i in 0..n {
        xs.push(read_f64_le(content, offset + 16 * i)?);
        ys.push(read_f64_le(content, offset + 16 * i + 8)?);
    }
    Ok((xs, ys))
}

/// Z 变体在 XY 之后携带 Z 值域与 Z 数组，有则读入，无则保持 0
fn read_z_values(
    content: &[u8],
    offset: usize,
    n: usize,
    shape_type: ShapeType,
    geometry: &mut Geometry,
) -> Result<()> {
    if !shape_type.has_z() || content.len() < offset + 16 + 8 * n {
        return Ok(());
    }
    for i in 0..n {
        geometry.zs[i] = read_f64_le(content, offset + 16 + 8 * i)?;
    }
    Ok(())
}

/// 新建 .shp/.shx 文件对
///
/// 记录先缓存在内存中，`finish` 时一次性落盘，失败不会留下
/// 残缺文件。
pub struct ShpWriter {
    path: PathBuf,
    shape_type: ShapeType,
    geometries: Vec<Geometry>,
}

impl ShpWriter {
    pub fn create(path: &Path, shape_type: ShapeType) -> Self {
        Self {
            path: path.to_path_buf(),
            shape_type,
            geometries: Vec::new(),
        }
    }

    /// 写一条记录并返回其下标。`index` 为 `None` 或越界时追加。
    pub fn write(&mut self, index: Option<usize>, geometry: Geometry) -> usize {
        match index {
            Some(i) if i < self.geometries.len() => {
                self.geometries[i] = geometry;
                i
            }
            _ => {
                self.geometries.push(geometry);
                self.geometries.len() - 1
            }
        }
    }

    pub fn entity_count(&self) -> usize {
        self.geometries.len()
    }

    pub fn finish(self) -> Result<()> {
        let mut contents = Vec::with_capacity(self.geometries.len());
        for geometry in &self.geometries {
            contents.push(serialize_record(geometry));
        }

        let total_len: usize = contents.iter().map(|c| c.len() + 8).sum();
        let (min, max) = union_bounds(&self.geometries);

        let mut shp = Vec::with_capacity(HEADER_LEN + total_len);
        write_header(
            &mut shp,
            (HEADER_LEN + total_len) / 2,
            self.shape_type,
            min,
            max,
        );
        let mut shx = Vec::with_capacity(HEADER_LEN + 8 * contents.len());
        write_header(
            &mut shx,
            (HEADER_LEN + 8 * contents.len()) / 2,
            self.shape_type,
            min,
            max,
        );

        let mut offset = HEADER_LEN;
        for (i, content) in contents.iter().enumerate() {
            shx.extend_from_slice(&((offset / 2) as i32).to_be_bytes());
            shx.extend_from_slice(&((content.len() / 2) as i32).to_be_bytes());

            shp.extend_from_slice(&((i + 1) as i32).to_be_bytes());
            shp.extend_from_slice(&((content.len() / 2) as i32).to_be_bytes());
            shp.extend_from_slice(content);
            offset += 8 + content.len();
        }

        fs::write(&self.path, shp)?;
        fs::write(self.path.with_extension("shx"), shx)?;
        Ok(())
    }
}

fn union_bounds(geometries: &[Geometry]) -> ([f64; 4], [f64; 4]) {
    let mut min = [0.0; 4];
    let mut max = [0.0; 4];
    let mut first = true;
    for g in geometries {
        if g.vertex_count() == 0 {
            continue;
        }
        if first {
            min = g.min;
            max = g.max;
            first = false;
        } else {
            for i in 0..4 {
                min[i] = min[i].min(g.min[i]);
                max[i] = max[i].max(g.max[i]);
            }
        }
    }
    (min, max)
}

fn write_header(buf: &mut Vec<u8>, length_words: usize, shape_type: ShapeType, min: [f64; 4], max: [f64; 4]) {
    buf.extend_from_slice(&FILE_CODE.to_be_bytes());
    buf.extend_from_slice(&[0u8; 20]);
    buf.extend_from_slice(&(length_words as i32).to_be_bytes());
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf.extend_from_slice(&shape_type.code().to_le_bytes());
    // x/y 包围盒
    buf.extend_from_slice(&min[0].to_le_bytes());
    buf.extend_from_slice(&min[1].to_le_bytes());
    buf.extend_from_slice(&max[0].to_le_bytes());
    buf.extend_from_slice(&max[1].to_le_bytes());
    // z/m 值域
    buf.extend_from_slice(&min[2].to_le_bytes());
    buf.extend_from_slice(&max[2].to_le_bytes());
    buf.extend_from_slice(&min[3].to_le_bytes());
    buf.extend_from_slice(&max[3].to_le_bytes());
}

fn serialize_record(geometry: &Geometry) -> Vec<u8> {
    let mut buf = Vec::new();
    let base = geometry.shape_type.base();
    buf.extend_from_slice(&base.code().to_le_bytes());
    match base {
        ShapeType::Point => {
            let x = geometry.xs.first().copied().unwrap_or(0.0);
            let y = geometry.ys.first().copied().unwrap_or(0.0);
            buf.extend_from_slice(&x.to_le_bytes());
            buf.extend_from_slice(&y.to_le_bytes());
        }
        ShapeType::MultiPoint => {
            write_bbox(&mut buf, geometry);
            buf.extend_from_slice(&(geometry.vertex_count() as i32).to_le_bytes());
            write_points(&mut buf, geometry);
        }
        ShapeType::Polygon | ShapeType::PolyLine => {
            write_bbox(&mut buf, geometry);
            buf.extend_from_slice(&(geometry.parts.len() as i32).to_le_bytes());
            buf.extend_from_slice(&(geometry.vertex_count() as i32).to_le_bytes());
            for &part in &geometry.parts {
                buf.extend_from_slice(&(part as i32).to_le_bytes());
            }
            write_points(&mut buf, geometry);
        }
        // Null 或不支持的类型写成空几何
        _ => {}
    }
    buf
}

fn write_bbox(buf: &mut Vec<u8>, geometry: &Geometry) {
    buf.extend_from_slice(&geometry.min[0].to_le_bytes());
    buf.extend_from_slice(&geometry.min[1].to_le_bytes());
    buf.extend_from_slice(&geometry.max[0].to_le_bytes());
    buf.extend_from_slice(&geometry.max[1].to_le_bytes());
}

fn write_points(buf: &mut Vec<u8>, geometry: &Geometry) {
    for i in 0..geometry.vertex_count() {
        buf.extend_from_slice(&geometry.xs[i].to_le_bytes());
        buf.extend_from_slice(&geometry.ys[i].to_le_bytes());
    }
}

fn read_i32_be(buf: &[u8], offset: usize) -> Result<i32> {
    let bytes: [u8; 4] = buf
        .get(offset..offset + 4)
        .ok_or_else(|| Error::ShpFormat(format!("偏移 {} 处数据不足 4 字节", offset)))?
        .try_into()
        .unwrap_or([0; 4]);
    Ok(i32::from_be_bytes(bytes))
}

fn read_i32_le(buf: &[u8], offset: usize) -> Result<i32> {
    let bytes: [u8; 4] = buf
        .get(offset..offset + 4)
        .ok_or_else(|| Error::ShpFormat(format!("偏移 {} 处数据不足 4 字节", offset)))?
        .try_into()
        .unwrap_or([0; 4]);
    Ok(i32::from_le_bytes(bytes))
}

fn read_f64_le(buf: &[u8], offset: usize) -> Result<f64> {
    let bytes: [u8; 8] = buf
        .get(offset..offset + 8)
        .ok_or_else(|| Error::ShpFormat(format!("偏移 {} 处数据不足 8 字节", offset)))?
        .try_into()
        .unwrap_or([0; 8]);
    Ok(f64::from_le_bytes(bytes))
}
