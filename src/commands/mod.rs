//! CLI 命令处理模块
//!
//! 处理所有命令行接口的解析和路由

pub mod build;
pub mod parser;

// Re-exports (used by main.rs)
pub use parser::*;
