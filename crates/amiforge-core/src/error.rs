//! Error types for the amiforge core.

use std::path::PathBuf;

/// Core error type for local configuration failures.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The credential key file could not be read.
    #[error("cannot read key file {path}: {source}")]
    KeyFileIo {
        /// Path of the key file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The credential key file is malformed.
    #[error("invalid key file: {0}")]
    KeyFileFormat(String),

    /// A topic ARN does not have the `arn:<partition>:sns:<region>:...` shape.
    #[error("invalid topic ARN: {0}")]
    InvalidTopicArn(String),
}

/// Convenience result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
