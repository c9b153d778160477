use std::fs;
use std::path::Path;

use chrono::Datelike;
use tracing::warn;

use crate::error::{Error, Result};

const DESCRIPTOR_LEN: usize = 32;
const HEADER_TERMINATOR: u8 = 0x0d;
const EOF_MARKER: u8 = 0x1a;
const DELETED_FLAG: u8 = b'*';

/// DBF 属性字段类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Double,
    Logical,
    Date,
}

impl FieldType {
    fn type_char(&self) -> u8 {
        match self {
            Self::String => b'C',
            Self::Integer | Self::Double => b'N',
            Self::Logical => b'L',
            Self::Date => b'D',
        }
    }

    fn from_descriptor(type_char: u8, decimals: usize) -> Self {
        match type_char {
            b'N' | b'F' => {
                if decimals == 0 {
                    Self::Integer
                } else {
                    Self::Double
                }
            }
            b'L' => Self::Logical,
            b'D' => Self::Date,
            _ => Self::String,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DbfField {
    pub name: String,
    pub field_type: FieldType,
    pub width: usize,
    pub decimals: usize,
}

/// dBase III 属性表
///
/// 打开时整表解析进内存，字段值统一以去掉两端空白的文本保存，
/// 类型化读写在文本之上转换。`save` 时一次性序列化落盘。
#[derive(Debug, Default)]
pub struct DbfFile {
    fields: Vec<DbfField>,
    records: Vec<Vec<String>>,
}

impl DbfFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(path: &Path) -> Result<Self> {
        let buf = fs::read(path)?;
        if buf.len() < 33 {
            return Err(Error::DbfFormat(format!("{} 不足最小文件头", path.display())));
        }
        let record_count = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
        let header_size = u16::from_le_bytes([buf[8], buf[9]]) as usize;
        let record_size = u16::from_le_bytes([buf[10], buf[11]]) as usize;

        let mut fields = Vec::new();
        let mut pos = 32;
        let descriptor_end = header_size.min(buf.len());
        while pos + DESCRIPTOR_LEN <= descriptor_end && buf.get(pos) != Some(&HEADER_TERMINATOR) {
            let descriptor = &buf[pos..pos + DESCRIPTOR_LEN];
            let name_len = descriptor[..11].iter().position(|&b| b == 0).unwrap_or(11);
            let name = String::from_utf8_lossy(&descriptor[..name_len]).to_string();
            let decimals = descriptor[17] as usize;
            fields.push(DbfField {
                name,
                field_type: FieldType::from_descriptor(descriptor[11], decimals),
                width: descriptor[16] as usize,
                decimals,
            });
            pos += DESCRIPTOR_LEN;
        }
        if fields.is_empty() {
            return Err(Error::DbfFormat(format!("{} 无字段描述", path.display())));
        }

        let expected_size: usize = 1 + fields.iter().map(|f| f.width).sum::<usize>();
        if record_size != expected_size {
            warn!(
                "{} 记录长度 {} 与字段宽度之和 {} 不符，按字段宽度解析",
                path.display(),
                record_size,
                expected_size
            );
        }

        let mut records = Vec::with_capacity(record_count);
        for i in 0..record_count {
            let start = header_size + i * record_size;
            let Some(raw) = buf.get(start..start + record_size) else {
                warn!("{} 第 {} 条记录超出文件末尾，停止解析", path.display(), i + 1);
                break;
            };
            if raw[0] == DELETED_FLAG {
                continue;
            }
            let mut values = Vec::with_capacity(fields.len());
            let mut offset = 1;
            for field in &fields {
                let slice = raw.get(offset..offset + field.width).unwrap_or(&[]);
                values.push(String::from_utf8_lossy(slice).trim().to_string());
                offset += field.width;
            }
            records.push(values);
        }

        Ok(Self { fields, records })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let record_size: usize = 1 + self.fields.iter().map(|f| f.width).sum::<usize>();
        let header_size = 32 + DESCRIPTOR_LEN * self.fields.len() + 1;

        let mut buf = Vec::with_capacity(header_size + record_size * self.records.len() + 1);
        let today = chrono::Local::now();
        buf.push(0x03);
        buf.push((today.year() % 100) as u8);
        buf.push(today.month() as u8);
        buf.push(today.day() as u8);
        buf.extend_from_slice(&(self.records.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(header_size as u16).to_le_bytes());
        buf.extend_from_slice(&(record_size as u16).to_le_bytes());
        buf.extend_from_slice(&[0u8; 20]);

        for field in &self.fields {
            let mut descriptor = [0u8; DESCRIPTOR_LEN];
            let name = field.name.as_bytes();
            let name_len = name.len().min(10);
            descriptor[..name_len].copy_from_slice(&name[..name_len]);
            descriptor[11] = field.field_type.type_char();
            descriptor[16] = field.width as u8;
            descriptor[17] = field.decimals as u8;
            buf.extend_from_slice(&descriptor);
        }
        buf.push(HEADER_TERMINATOR);

        for record in &self.records {
            buf.push(b' ');
            for (field, value) in self.fields.iter().zip(record) {
                push_cell(&mut buf, field, value);
            }
        }
        buf.push(EOF_MARKER);

        fs::write(path, buf)?;
        Ok(())
    }

    pub fn fields(&self) -> &[DbfField] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// 字段名不区分大小写。不存在返回 `None`，调用方按「字段缺失」处理。
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// 追加字段并返回其下标；同名字段已存在时直接返回既有下标。
    /// 已有记录的新字段填空值。
    pub fn add_field(
        &mut self,
        name: &str,
        field_type: FieldType,
        width: usize,
        decimals: usize,
    ) -> usize {
        if let Some(index) = self.field_index(name) {
            return index;
        }
        self.fields.push(DbfField {
            name: name.to_string(),
            field_type,
            width,
            decimals,
        });
        for record in &mut self.records {
            record.push(String::new());
        }
        self.fields.len() - 1
    }

    fn cell(&self, record: usize, field: usize) -> Option<&str> {
        self.records
            .get(record)
            .and_then(|r| r.get(field))
            .map(|v| v.as_str())
    }

    pub fn read_string(&self, record: usize, field: usize) -> Option<String> {
        self.cell(record, field).map(|v| v.to_string())
    }

    pub fn read_double(&self, record: usize, field: usize) -> Option<f64> {
        self.cell(record, field).and_then(|v| v.parse().ok())
    }

    /// 数值文本向零截断，「12.7」读作 12
    pub fn read_integer(&self, record: usize, field: usize) -> Option<i64> {
        self.cell(record, field)
            .and_then(|v| v.parse::<f64>().ok())
            .map(|v| v.trunc() as i64)
    }

    pub fn read_logical(&self, record: usize, field: usize) -> Option<bool> {
        match self.cell(record, field)?.as_bytes().first()? {
            b'T' | b't' | b'Y' | b'y' => Some(true),
            b'F' | b'f' | b'N' | b'n' => Some(false),
            _ => None,
        }
    }

    /// 日期以 YYYYMMDD 文本返回
    pub fn read_date(&self, record: usize, field: usize) -> Option<String> {
        self.cell(record, field)
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string())
    }

    /// 写到 record_count 位置时先追加一条空记录；
    /// 字段下标越界时本次写入不生效。
    fn write_cell(&mut self, record: usize, field: usize, value: String) {
        if field >= self.fields.len() {
            return;
        }
        while self.records.len() <= record {
            self.records.push(vec![String::new(); self.fields.len()]);
        }
        self.records[record][field] = value;
    }

    pub fn write_string(&mut self, record: usize, field: usize, value: &str) {
        self.write_cell(record, field, value.trim().to_string());
    }

    pub fn write_double(&mut self, record: usize, field: usize, value: f64) {
        let decimals = match self.fields.get(field) {
            Some(f) => f.decimals,
            None => return,
        };
        self.write_cell(record, field, format!("{:.*}", decimals, value));
    }

    pub fn write_integer(&mut self, record: usize, field: usize, value: i64) {
        self.write_cell(record, field, value.to_string());
    }

    pub fn write_logical(&mut self, record: usize, field: usize, value: bool) {
        self.write_cell(record, field, if value { "T" } else { "F" }.to_string());
    }

    pub fn write_date(&mut self, record: usize, field: usize, value: &str) {
        self.write_cell(record, field, value.trim().to_string());
    }
}

/// 字符字段左对齐、数值字段右对齐补空格；超宽的数值按 dBase
/// 惯例填星号，超宽的字符在字符边界截断。
fn push_cell(buf: &mut Vec<u8>, field: &DbfField, value: &str) {
    let bytes = value.as_bytes();
    match field.field_type {
        FieldType::String | FieldType::Date => {
            let text = truncate_at_char_boundary(value, field.width);
            buf.extend_from_slice(text.as_bytes());
            buf.extend(std::iter::repeat(b' ').take(field.width - text.len()));
        }
        FieldType::Integer | FieldType::Double => {
            if bytes.len() > field.width {
                buf.extend(std::iter::repeat(b'*').take(field.width));
            } else {
                buf.extend(std::iter::repeat(b' ').take(field.width - bytes.len()));
                buf.extend_from_slice(bytes);
            }
        }
        FieldType::Logical => {
            let flag = bytes.first().copied().unwrap_or(b'?');
            buf.push(flag);
            buf.extend(std::iter::repeat(b' ').take(field.width.saturating_sub(1)));
        }
    }
}

fn truncate_at_char_boundary(value: &str, width: usize) -> &str {
    if value.len() <= width {
        return value;
    }
    let mut end = width;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}
