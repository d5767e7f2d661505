//
// reparse/error.rs
//
// Error taxonomy for the reparse core
//

use std::path::PathBuf;

use super::types::FileKey;

/// Failures surfaced by the scheduler and the worker step.
///
/// Cache and graph lookups never fail; they answer with empty results that
/// callers read as "must reparse".
#[derive(Debug, thiserror::Error)]
pub enum ReparseError {
    /// The scheduler was shut down while (or before) a worker waited for work
    #[error("reparse scheduler was shut down")]
    Cancelled,

    /// The external parser reported a failure; the file stays stale
    #[error("failed to parse {file}: {source}")]
    ParseFailed {
        file: FileKey,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl ReparseError {
    pub fn parse_failed(file: &FileKey, error: anyhow::Error) -> Self {
        ReparseError::ParseFailed {
            file: file.clone(),
            source: error.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ReparseError::Cancelled)
    }
}

/// Malformed boundary arrays handed to `ConditionalFingerprint::build`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FingerprintError {
    #[error("odd number of conditional boundaries ({count}) for {}", .path.display())]
    OddBoundaryCount { path: PathBuf, count: usize },

    #[error("conditional boundary {offset} at index {index} is out of order for {}", .path.display())]
    Unsorted {
        path: PathBuf,
        index: usize,
        offset: u64,
    },
}
