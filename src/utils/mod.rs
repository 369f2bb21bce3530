//! 工具模块
//!
//! 日志初始化与配置路径解析

pub mod config_paths;
pub mod logger;
