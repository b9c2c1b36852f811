//! Minecraft 区域文件批量编辑工具

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use mcabatch::ops::{
    ChangeDirective, ChangeOperation, ChangeParams, ChunkMatcher, DeleteBlockOperation, DeleteBlockParams,
    DeleteOperation, DeleteParams, ExportOperation, ExportParams, IdSet, ImportOperation, ImportParams,
    SectionRange,
};
use mcabatch::{Config, Operation, Pipeline, Progress, SelectionSet, Summary};

/// Minecraft 区域文件批量编辑工具
#[derive(Parser)]
#[command(name = "mcabatch", version, about)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 任一文件出错即中止
    #[arg(long, global = true)]
    fail_fast: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SelectionArg {
    /// 选区 CSV 文件（每行 `x,z` 区块坐标）
    #[arg(short, long)]
    selection: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// 把选中的区块导出到另一个目录
    Export {
        /// 区域文件夹路径
        region: PathBuf,
        /// 输出文件夹路径
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        selection: SelectionArg,
    },
    /// 删除选中的区块
    Delete {
        /// 区域文件夹路径
        region: PathBuf,
        #[command(flatten)]
        selection: SelectionArg,
    },
    /// 修改区块字段
    Change {
        /// 区域文件夹路径
        region: PathBuf,
        /// 修改指令：`path=value`、`path+=value`、`!path`，可重复
        #[arg(short, long = "field", required = true)]
        fields: Vec<String>,
        /// 缺失的中间节点按需创建
        #[arg(long)]
        force: bool,
        #[command(flatten)]
        selection: SelectionArg,
    },
    /// 从另一个世界导入区块
    Import {
        /// 源区域文件夹路径
        input: PathBuf,
        /// 目标区域文件夹路径
        #[arg(short, long)]
        output: PathBuf,
        /// X 方向区块偏移
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        offset_x: i32,
        /// Z 方向区块偏移
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        offset_z: i32,
        /// 覆盖目标中已存在的区块
        #[arg(long)]
        overwrite: bool,
        /// 只导入这些垂直分段，如 `0:4,8`
        #[arg(long)]
        sections: Option<String>,
        #[command(flatten)]
        selection: SelectionArg,
    },
    /// 按 ID 删除选中区块里的实体和方块实体
    DeleteBlock {
        /// 区域文件夹路径
        region: PathBuf,
        /// 选区 CSV 文件
        #[arg(short, long)]
        selection: PathBuf,
        /// 要删除的 ID，逗号分隔
        #[arg(short = 'i', long, value_delimiter = ',', required = true)]
        block_id: Vec<String>,
    },
    /// 生成默认配置文件
    Config {
        /// 输出路径（默认: mcabatch.toml）
        #[arg(short, long, default_value = mcabatch::config::LOCAL_CONFIG)]
        output: PathBuf,
        /// 覆盖已存在的文件
        #[arg(long)]
        force: bool,
    },
}

fn load_config(config_path: Option<PathBuf>) -> Config {
    if let Some(path) = config_path {
        match Config::load_from_file(&path) {
            Ok(config) => {
                eprintln!("已加载配置: {}", path.display());
                return config;
            }
            Err(e) => {
                eprintln!("警告: 无法加载配置 {}: {}", path.display(), e);
            }
        }
    }
    Config::load()
}

fn load_selection(path: Option<&Path>) -> Result<Option<SelectionSet>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let selection =
        SelectionSet::load_csv(path).with_context(|| format!("无法读取选区 {}", path.display()))?;
    println!("选区: {} 个区块", selection.chunk_count());
    Ok(Some(selection))
}

fn print_progress(p: &Progress) {
    println!("  [{}/{}] 完成 {}", p.completed, p.total, p.file);
}

fn print_summary(summary: &Summary) {
    println!();
    println!(
        "共 {} 个文件: 写入 {}, 无修改 {}, 失败 {}",
        summary.total,
        summary.written,
        summary.skipped,
        summary.failed.len()
    );
    for (file, reason) in &summary.failed {
        eprintln!("  失败 {}: {}", file, reason);
    }
}

fn run<O: Operation>(config: &Config, op: O) -> Result<()> {
    let pipeline = Pipeline::new(config.pipeline.clone())?;
    let start = Instant::now();
    let summary = pipeline.run(Arc::new(op), print_progress)?;
    print_summary(&summary);
    println!("\n耗时: {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config);
    if cli.fail_fast {
        config.pipeline.fail_fast = true;
    }
    config.validate()?;

    let policy = config.selection.empty_region;

    match cli.command {
        Commands::Export {
            region,
            output,
            selection,
        } => {
            let selection = load_selection(selection.selection.as_deref())?;
            println!("导出区块: {:?}", region);
            println!("输出目录: {:?}", output);
            println!();
            let op = ExportOperation::new(ExportParams {
                dir: region,
                output,
                matcher: ChunkMatcher::new(None, selection, policy),
            });
            run(&config, op)?;
        }

        Commands::Delete { region, selection } => {
            let selection = load_selection(selection.selection.as_deref())?;
            println!("删除区块: {:?}", region);
            println!();
            let op = DeleteOperation::new(DeleteParams {
                dir: region,
                matcher: ChunkMatcher::new(None, selection, policy),
                empty_file: config.region.empty_file,
            });
            run(&config, op)?;
        }

        Commands::Change {
            region,
            fields,
            force,
            selection,
        } => {
            let selection = load_selection(selection.selection.as_deref())?;
            let directives = fields
                .iter()
                .map(|f| f.parse::<ChangeDirective>())
                .collect::<mcabatch::Result<Vec<_>>>()?;
            println!("修改字段: {:?}", region);
            for d in &directives {
                println!("  {}", d);
            }
            println!("强制创建: {}", if force { "是" } else { "否" });
            println!();
            let matcher = match selection {
                Some(s) => ChunkMatcher::new(None, Some(s), policy),
                None => ChunkMatcher::all(),
            };
            let op = ChangeOperation::new(ChangeParams {
                dir: region,
                matcher,
                directives,
                force,
            });
            run(&config, op)?;
        }

        Commands::Import {
            input,
            output,
            offset_x,
            offset_z,
            overwrite,
            sections,
            selection,
        } => {
            let selection = load_selection(selection.selection.as_deref())?;
            let sections = match sections {
                Some(s) => SectionRange::parse_list(&s)?,
                None => Vec::new(),
            };
            println!("导入区块: {:?}", input);
            println!("目标目录: {:?}", output);
            println!("区块偏移: ({}, {})", offset_x, offset_z);
            println!("覆盖已有区块: {}", if overwrite { "是" } else { "否" });
            if !sections.is_empty() {
                let list: Vec<String> = sections.iter().map(ToString::to_string).collect();
                println!("垂直分段: {}", list.join(","));
            }
            println!();
            let op = ImportOperation::new(ImportParams {
                input,
                target: output,
                offset: (offset_x, offset_z),
                overwrite,
                selection,
                policy,
                sections,
            });
            run(&config, op)?;
        }

        Commands::DeleteBlock {
            region,
            selection,
            block_id,
        } => {
            let selection = SelectionSet::load_csv(&selection)
                .with_context(|| format!("无法读取选区 {}", selection.display()))?;
            println!("删除方块: {:?}", region);
            println!("ID: {}", block_id.join(","));
            println!("选区: {} 个区块", selection.chunk_count());
            println!();
            let op = DeleteBlockOperation::new(DeleteBlockParams {
                dir: region,
                selection,
                policy,
                ids: IdSet::new(&block_id),
            });
            run(&config, op)?;
        }

        Commands::Config { output, force } => {
            if output.exists() && !force {
                anyhow::bail!("文件已存在: {:?}\n使用 --force 覆盖", output);
            }

            let default_config = Config::default();
            default_config.save_to_file(&output)?;
            println!("已生成配置文件: {:?}", output);
            println!("\n配置项说明:");
            println!("  [pipeline]");
            println!(
                "    load_threads = {}      # 读取线程数",
                default_config.pipeline.load_threads
            );
            println!(
                "    process_threads = {}   # 处理线程数",
                default_config.pipeline.process_threads
            );
            println!(
                "    write_threads = {}     # 写入线程数",
                default_config.pipeline.write_threads
            );
            println!(
                "    max_loaded_files = {}  # 同时加载的文件上限",
                default_config.pipeline.max_loaded_files
            );
            println!("    fail_fast = false      # 任一文件出错即中止");
            println!("  [selection]");
            println!("    empty_region = \"nothing\"  # 空区域: nothing / whole_region");
            println!("  [region]");
            println!("    empty_file = \"remove\"     # 空文件: remove / keep_header");
            println!("  [cache]");
            println!(
                "    min_zoom = {}, max_zoom = {}",
                default_config.cache.min_zoom, default_config.cache.max_zoom
            );
        }
    }

    Ok(())
}
