use std::path::PathBuf;
use thiserror::Error;

/// 库内部统一的错误类型
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("SHP 文件格式错误: {0}")]
    ShpFormat(String),

    #[error("DBF 文件格式错误: {0}")]
    DbfFormat(String),

    #[error("未知的地类编码: {0}")]
    UnknownLandClass(String),

    #[error("整治前利用状况评分为 0，无法修正土地利用系数")]
    ZeroUtilizationScore,

    #[error("缺少字段: {0}")]
    FieldMissing(String),

    #[error("无法打开规则表 {path}: {source}")]
    RuleTableOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("规则表 {path} 加载失败: {source}")]
    RuleTable {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("CSV 错误: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
