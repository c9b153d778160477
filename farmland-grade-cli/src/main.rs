use anyhow::Result;
use clap::{Parser, Subcommand};
use rayon::ThreadPoolBuilder;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use farmland_grade::coordinate::{self, CoordinateProperty};
use farmland_grade::layer;
use farmland_grade::report;
use farmland_grade::rules::MemoryRuleLookup;
use farmland_grade::shapefile::DbfFile;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 并行处理线程数（默认: CPU 核数）
    #[arg(short, long)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 把多边形图层导出为上报坐标文件
    ToCoord {
        /// 输入 .shp 文件或目录
        input: PathBuf,

        /// 输出目录
        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,

        /// 地块标识字段名
        #[arg(long, default_value = "XJDYBH")]
        id_field: String,

        /// 坐标系名称
        #[arg(long, default_value = "2000国家大地坐标系")]
        coordinate_system: String,

        /// 几度分带（3 或 6）
        #[arg(long, default_value_t = 3)]
        zone_type: i16,

        /// 带号
        #[arg(long, default_value_t = 0)]
        zone: i16,
    },

    /// 把上报坐标文件导入为多边形图层
    FromCoord {
        /// 输入 .txt 坐标文件
        input: PathBuf,

        /// 输出 .shp 路径
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// 地块标识字段名
        #[arg(long, default_value = "XJDYBH")]
        id_field: String,
    },

    /// 按调查属性评定质量等别并回写属性表
    Grade {
        /// 输入 .shp（属性表与其同名）
        input: PathBuf,

        /// 规则表 CSV 目录
        #[arg(short, long, value_name = "DIR")]
        rules: PathBuf,

        /// 水浇地分等指数采用气候生产潜力
        #[arg(long)]
        cppc: bool,

        /// 评定前补齐利用状况调查字段
        #[arg(long)]
        add_fields: bool,

        /// 质量等别评定表的 CSV 输出路径
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },

    /// 整层复制，损坏的几何记录跳过
    Copy {
        /// 输入 .shp
        input: PathBuf,

        /// 输出 .shp
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // 日志初始化
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let start_time = std::time::Instant::now();

    if let Some(threads) = args.threads {
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .expect("Failed to build thread pool");
    }

    match args.command {
        Command::ToCoord {
            input,
            output,
            id_field,
            coordinate_system,
            zone_type,
            zone,
        } => {
            fs::create_dir_all(&output)?;
            let property = CoordinateProperty {
                coordinate_system,
                zone_type,
                zone,
                ..CoordinateProperty::default()
            };
            if input.is_file() {
                export_file(&input, &output, &property, &id_field)?;
            } else if input.is_dir() {
                info!("处理目录: {:?}", input);
                export_directory(&input, &output, &property, &id_field)?;
            } else {
                error!("输入路径无效: {:?}", input);
                anyhow::bail!("Input path must be a file or directory");
            }
        }
        Command::FromCoord {
            input,
            output,
            id_field,
        } => {
            let imported = coordinate::coordinate_file_to_shapefile(&input, &output, &id_field)?;
            if imported == 0 {
                anyhow::bail!("{} 未解析出任何地块", input.display());
            }
            info!("导入 {} 个地块: {:?}", imported, output);
        }
        Command::Grade {
            input,
            rules,
            cppc,
            add_fields,
            report,
        } => {
            grade_layer(&input, &rules, cppc, add_fields, report.as_deref())?;
        }
        Command::Copy { input, output } => {
            let (copied, skipped) = layer::copy_layer(&input, &output)?;
            info!("复制 {} 条记录，跳过 {} 条: {:?}", copied, skipped, output);
        }
    }

    let elapsed = start_time.elapsed();
    info!("Total processing time: {:?}", elapsed);

    Ok(())
}

fn export_file(
    input: &Path,
    output_dir: &Path,
    property: &CoordinateProperty,
    id_field: &str,
) -> Result<()> {
    info!("处理文件: {:?}", input);
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("parcels");
    let txt_path = output_dir.join(format!("{}.txt", stem));
    let exported = coordinate::write_coordinate_file(input, &txt_path, property, id_field)?;
    info!("导出 {} 个地块: {:?}", exported, txt_path);
    Ok(())
}

fn export_directory(
    dir: &Path,
    output_dir: &Path,
    property: &CoordinateProperty,
    id_field: &str,
) -> Result<()> {
    use rayon::prelude::*;

    let input_files = collect_shp_files(dir)?;
    info!("发现 {} 个 .shp 文件", input_files.len());

    let results: Vec<Result<()>> = input_files
        .par_iter()
        .map(|path| export_file(path, output_dir, property, id_field))
        .collect();

    let mut errors = Vec::new();
    for (i, result) in results.into_iter().enumerate() {
        if let Err(e) = result {
            errors.push(format!("{}: {}", input_files[i].display(), e));
        }
    }

    if !errors.is_empty() {
        error!("{} 个文件处理失败:", errors.len());
        for err in &errors {
            error!("  {}", err);
        }
        anyhow::bail!("{} files failed to process", errors.len());
    }

    Ok(())
}

fn collect_shp_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            files.extend(collect_shp_files(&path)?);
        } else if path.extension().and_then(|s| s.to_str()) == Some("shp") {
            files.push(path);
        }
    }
    Ok(files)
}

fn grade_layer(
    input: &Path,
    rules_dir: &Path,
    cppc: bool,
    add_fields: bool,
    report_path: Option<&Path>,
) -> Result<()> {
    let dbf_path = input.with_extension("dbf");
    let mut dbf = DbfFile::open(&dbf_path)?;
    if add_fields {
        layer::add_assist_fields(&mut dbf);
    }

    let rules = MemoryRuleLookup::load(rules_dir)?;
    let patches = layer::load_patches(&dbf, cppc);
    if patches.is_empty() {
        anyhow::bail!("{} 未装载到任何地块", dbf_path.display());
    }

    let written = layer::write_grades(&mut dbf, &patches, &rules)?;
    dbf.save(&dbf_path)?;
    info!("评定并回写 {} / {} 个地块", written, patches.len());

    if let Some(path) = report_path {
        let grid = report::evaluation_table(&patches, &rules)?;
        report::write_report_csv(path, &grid)?;
        info!("评定表已输出: {:?}", path);
    }

    Ok(())
}
