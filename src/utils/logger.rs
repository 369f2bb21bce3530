//! 日志系统
//!
//! 提供统一的日志记录功能

use crate::config::{DEFAULT_LOG_FILTER, LOG_ENV};
use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 初始化日志系统
///
/// # Arguments
/// * `log_level` - 日志级别 (trace, debug, info, warn, error)，为 None 时依次读取
///   `PROCTREE_LOG`、`RUST_LOG`
/// * `log_file` - 日志文件路径，如果为 None 则只输出到标准错误
///
/// # Examples
/// ```no_run
/// use proctree::utils::logger::init_logger;
///
/// // 使用默认配置（从环境变量读取）
/// init_logger(None, None).unwrap();
///
/// // 指定日志级别
/// init_logger(Some("debug"), None).unwrap();
/// ```
pub fn init_logger(log_level: Option<&str>, log_file: Option<PathBuf>) -> Result<()> {
    let env_filter = build_filter(log_level)?;

    // Logs go to stderr so stdout stays clean for exported JSON
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_ansi(true)
        .compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if let Some(log_path) = log_file {
        // 确保日志文件的父目录存在
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(std::sync::Arc::new(file))
            .with_target(true)
            .with_ansi(false) // 文件中不使用 ANSI 颜色
            .with_level(true);

        registry.with(file_layer).try_init()?;
    } else {
        registry.try_init()?;
    }

    tracing::debug!("Logger initialized");
    Ok(())
}

fn build_filter(log_level: Option<&str>) -> Result<EnvFilter> {
    if let Some(level) = log_level {
        return Ok(EnvFilter::try_new(level)?);
    }
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
        return Ok(filter);
    }
    Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_level_is_used_verbatim() {
        let filter = build_filter(Some("proctree=trace")).expect("valid filter");
        assert!(filter.to_string().contains("proctree=trace"));
    }

    #[test]
    fn invalid_level_is_rejected() {
        assert!(build_filter(Some("proctree=notalevel")).is_err());
    }
}
