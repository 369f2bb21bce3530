//! CLI 命令行参数解析
//!
//! 使用 clap 定义命令行接口并进行参数解析

use crate::config::APP_NAME;
use crate::core::models::parse_timestamp;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::ffi::OsString;
use std::path::PathBuf;

/// proctree - 从进程创建事件重建进程树
#[derive(Parser, Debug, Clone)]
#[command(
    name = APP_NAME,
    about = "Rebuild process ancestry trees from process-creation events",
    version
)]
pub struct Cli {
    /// 日志级别（EnvFilter 语法，例如 debug 或 proctree=trace）
    #[arg(long, global = true, value_name = "FILTER")]
    pub log_level: Option<String>,

    /// 配置文件路径（默认 ~/.proctree/config.json）
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// 从事件文件构建进程树并输出
    Build(BuildArgs),

    /// 显示生效的配置
    Config,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct BuildArgs {
    /// JSON 数组或逐行 JSON 事件文件，`-` 表示标准输入
    #[arg(value_name = "FILE")]
    pub input: PathBuf,

    /// 输出格式
    #[arg(long, value_enum, default_value_t = OutputFormat::Dependentree)]
    pub format: OutputFormat,

    /// 跳过无法校验的记录而不是中止
    #[arg(long)]
    pub skip_invalid: bool,

    /// 保持输入顺序，不按创建时间排序
    #[arg(long)]
    pub no_sort: bool,

    /// 只导出该时间之后创建的进程（保留其祖先）
    #[arg(long, value_name = "TIME", value_parser = parse_timestamp)]
    pub start: Option<DateTime<Utc>>,

    /// 只导出该时间之前创建的进程
    #[arg(long, value_name = "TIME", value_parser = parse_timestamp)]
    pub end: Option<DateTime<Utc>>,
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// dependentree JSON（默认）
    #[default]
    Dependentree,
    /// 缩进树形文本
    Display,
    /// 每行一个进程 ID
    Pids,
}

impl Cli {
    /// 解析进程参数（失败时由 clap 处理错误输出和退出）
    pub fn parse_args() -> Self {
        Self::parse_args_from(std::env::args_os())
    }

    /// 尝试解析命令行参数（用于测试或自定义 argv）
    pub fn try_parse_args_from<I, T>(iter: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Cli::try_parse_from(iter)
    }

    pub fn parse_args_from<I, T>(iter: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        match Self::try_parse_args_from(iter) {
            Ok(cli) => cli,
            Err(err) => err.exit(),
        }
    }
}
