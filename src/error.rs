//! Unified error handling for proctree
//!
//! Every fallible operation in the crate returns [`ProcessTreeResult`]. The
//! variants are classified so the CLI can decide how loudly to report them.

use std::fmt;
use std::io;
use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum ProcessTreeError {
    /// A required field was absent or could not be coerced to its type
    #[error("Validation error on field '{field}': {message}")]
    Validation {
        field: String,
        message: String,
        value: Option<String>,
    },

    /// Moving `identifier` under `new_parent` would make it its own ancestor
    #[error("Cycle error: moving '{identifier}' under '{new_parent}' would create a cycle")]
    Cycle {
        identifier: String,
        new_parent: String,
    },

    /// A node references a parent identifier that is not in the tree
    #[error("Unknown parent '{parent}' for node '{identifier}'")]
    UnknownParent { identifier: String, parent: String },

    /// A record inside a batch failed; wraps the underlying error with its position
    #[error("Record #{index} rejected: {source}")]
    Record {
        index: usize,
        #[source]
        source: Box<ProcessTreeError>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Malformed JSON input
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem errors
    #[error("I/O error: {message} (path: {path})")]
    Io {
        message: String,
        path: String,
        #[source]
        source: io::Error,
    },
}

impl ProcessTreeError {
    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProcessTreeError::Validation { .. } => ErrorCategory::Validation,
            ProcessTreeError::Cycle { .. } | ProcessTreeError::UnknownParent { .. } => {
                ErrorCategory::Structure
            }
            ProcessTreeError::Record { source, .. } => source.category(),
            ProcessTreeError::Config { .. } => ErrorCategory::Config,
            ProcessTreeError::Json(_) => ErrorCategory::Input,
            ProcessTreeError::Io { .. } => ErrorCategory::Filesystem,
        }
    }

    /// Whether a batch build may skip the failing record and carry on.
    ///
    /// Per-record failures leave the tree untouched, so they are recoverable;
    /// anything that happens before or around the batch is not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ProcessTreeError::Validation { .. } => true,
            ProcessTreeError::Cycle { .. } => true,
            ProcessTreeError::UnknownParent { .. } => true,
            ProcessTreeError::Record { source, .. } => source.is_recoverable(),
            ProcessTreeError::Config { .. } => false,
            ProcessTreeError::Json(_) => false,
            ProcessTreeError::Io { .. } => false,
        }
    }

    /// The offending field for validation failures, looking through `Record` wrappers.
    pub fn field(&self) -> Option<&str> {
        match self {
            ProcessTreeError::Validation { field, .. } => Some(field),
            ProcessTreeError::Record { source, .. } => source.field(),
            _ => None,
        }
    }

    /// Strip any `Record` wrappers and return the underlying error.
    pub fn root_cause(&self) -> &ProcessTreeError {
        match self {
            ProcessTreeError::Record { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            ProcessTreeError::Validation { field, message, .. } => {
                format!("Input validation failed for {}: {}", field, message)
            }
            ProcessTreeError::Cycle {
                identifier,
                new_parent,
            } => format!(
                "Refused to move {} under {}: the tree would contain a cycle",
                identifier, new_parent
            ),
            ProcessTreeError::UnknownParent { identifier, parent } => {
                format!("{} points at {} which is not in the tree", identifier, parent)
            }
            ProcessTreeError::Record { index, source } => {
                format!("Record #{}: {}", index, source.user_message())
            }
            ProcessTreeError::Config { message, .. } => {
                format!("Configuration problem: {}", message)
            }
            ProcessTreeError::Json(err) => format!("Input is not valid JSON: {}", err),
            ProcessTreeError::Io { message, path, .. } => {
                format!("File system problem: {} ({})", message, path)
            }
        }
    }

    pub(crate) fn at_record(self, index: usize) -> Self {
        ProcessTreeError::Record {
            index,
            source: Box::new(self),
        }
    }
}

/// Error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Structure,
    Config,
    Input,
    Filesystem,
}

impl ErrorCategory {
    pub fn display_name(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "Validation",
            ErrorCategory::Structure => "Tree structure",
            ErrorCategory::Config => "Configuration",
            ErrorCategory::Input => "Input",
            ErrorCategory::Filesystem => "Filesystem",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Result type alias for convenience
pub type ProcessTreeResult<T> = Result<T, ProcessTreeError>;

/// Convenience functions for creating common errors
pub mod errors {
    use super::*;

    pub fn validation_error(
        field: impl Into<String>,
        message: impl Into<String>,
        value: Option<String>,
    ) -> ProcessTreeError {
        ProcessTreeError::Validation {
            field: field.into(),
            message: message.into(),
            value,
        }
    }

    pub fn config_error(message: impl Into<String>) -> ProcessTreeError {
        ProcessTreeError::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_error_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> ProcessTreeError {
        ProcessTreeError::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn io_error(
        message: impl Into<String>,
        path: impl Into<String>,
        source: io::Error,
    ) -> ProcessTreeError {
        ProcessTreeError::Io {
            message: message.into(),
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let validation = errors::validation_error("TargetProcessId", "missing", None);
        assert_eq!(validation.category(), ErrorCategory::Validation);
        assert!(validation.is_recoverable());

        let cycle = ProcessTreeError::Cycle {
            identifier: "1|a".to_string(),
            new_parent: "2|b".to_string(),
        };
        assert_eq!(cycle.category(), ErrorCategory::Structure);
        assert!(cycle.is_recoverable());

        let config = errors::config_error("bad policy");
        assert_eq!(config.category(), ErrorCategory::Config);
        assert!(!config.is_recoverable());
    }

    #[test]
    fn record_wrapper_delegates_to_source() {
        let err = errors::validation_error("TargetProcessFilename", "expected a string", None)
            .at_record(7);

        assert_eq!(err.category(), ErrorCategory::Validation);
        assert_eq!(err.field(), Some("TargetProcessFilename"));
        assert!(matches!(
            err.root_cause(),
            ProcessTreeError::Validation { .. }
        ));

        let message = err.user_message();
        assert!(message.contains("#7"));
        assert!(message.contains("TargetProcessFilename"));
    }

    #[test]
    fn io_errors_are_not_recoverable() {
        let err = errors::io_error(
            "cannot read input",
            "/nope/events.json",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.category(), ErrorCategory::Filesystem);
        assert!(!err.is_recoverable());
        assert!(err.user_message().contains("/nope/events.json"));
    }
}
