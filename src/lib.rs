//! proctree
//!
//! Rebuilds process ancestry trees from process-creation events that may
//! arrive incomplete or duplicated, and exports them in the dependentree
//! format for hierarchical visualization.

pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod utils;

// Re-export commonly used types for convenience
pub use crate::core::export::{
    filter_by_time_window, process_id_for, to_dependentree, DependentreeEntry, SelectedProcess,
};
pub use crate::core::models::{
    ProcessIdentity, ProcessRecord, MISSING_CREATION_TIME, MISSING_FILE_NAME, MISSING_PROCESS_ID,
    ROOT_IDENTIFIER,
};
pub use crate::core::process_tree::{BuildPolicy, BuildReport, MergeOutcome, ProcessTree, TreeNode};
pub use error::{ErrorCategory, ProcessTreeError, ProcessTreeResult};
