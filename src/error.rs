//! Error types for the sheetstream engine

use thiserror::Error;

/// Result type alias for sheetstream operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main error type for all engine operations
///
/// Each variant corresponds to one user-visible failure kind. Cell-level
/// parse failures are not errors; they are recorded as warnings on the
/// per-run [`RunStats`](crate::memory::RunStats).
#[derive(Error, Debug)]
pub enum EngineError {
    /// Path missing, permission denied, or zero-byte file
    #[error("file unreadable: {0}")]
    FileUnreadable(String),

    /// The format probe could not classify the input
    #[error("unknown format: {0}")]
    FormatUnknown(String),

    /// Archive structure invalid or a required part is missing
    #[error("corrupt container: {0}")]
    CorruptContainer(String),

    /// The pull parser reported a syntactic XML error
    #[error("malformed XML: {0}")]
    XmlMalformed(String),

    /// Requested sheet name or index absent
    #[error("sheet '{sheet}' not found. Available sheets: {available}")]
    SheetNotFound { sheet: String, available: String },

    /// Range string fails the syntactic check or end < start
    #[error("invalid range '{0}': expected A1:C10 style with end >= start")]
    InvalidRange(String),

    /// Shared-string index exceeds the table's declared count
    #[error("shared string index {index} out of range (declared count {count})")]
    SharedStringMissing { index: usize, count: usize },

    /// Underlying write failed; the sink is poisoned
    #[error("sink write failed: {0}")]
    SinkWrite(String),

    /// Reclamation failed to bring usage below the cleanup threshold
    #[error("memory limit exceeded: {0}")]
    MemoryLimit(String),

    /// A user-supplied filter/transform/chunk callback failed
    #[error("callback failed: {0}")]
    Callback(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Rich-writer surface invoked on the streaming path
    #[error("'{0}' is not implemented in streaming mode")]
    NotImplementedInStreamingMode(&'static str),

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Wrap a user-callback error for propagation through the engine
    pub fn callback<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        EngineError::Callback(Box::new(err))
    }

    /// Process exit code for the CLI surface: 1 I/O, 2 format/parse
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::FileUnreadable(_) | EngineError::SinkWrite(_) | EngineError::Io(_) => 1,
            _ => 2,
        }
    }
}
