//! 核心业务逻辑模块
//!
//! 进程记录模型、进程树存储与 dependentree 导出

pub mod export;
pub mod models;
pub mod process_tree;
