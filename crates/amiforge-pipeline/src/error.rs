//! Pipeline error types.

use std::io;
use std::path::PathBuf;

use amiforge_core::CoreError;
use amiforge_http::HttpError;
use amiforge_xml::XmlError;

/// Errors that abort the pipeline.
///
/// Nothing created before the failure is rolled back.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A request failed at the transport or protocol level.
    #[error("{operation} request failed: {source}")]
    Request {
        /// The API action or upload step.
        operation: &'static str,
        /// Underlying transport error.
        #[source]
        source: HttpError,
    },

    /// An expected element is absent from a response.
    #[error("could not find <{field}> in {operation} response:\n{body}")]
    MissingField {
        /// The API action.
        operation: &'static str,
        /// The missing element.
        field: &'static str,
        /// The response body.
        body: String,
    },

    /// A polled resource reported a status that is neither pending nor done.
    #[error("bad status from {operation}: {status}")]
    UnexpectedStatus {
        /// The API action.
        operation: &'static str,
        /// The reported status.
        status: String,
    },

    /// A call that must return `<return>true</return>` did not.
    #[error("{operation} failed:\n{body}")]
    OperationFailed {
        /// The API action.
        operation: &'static str,
        /// The response body.
        body: String,
    },

    /// The disk image could not be read.
    #[error("error reading image {path}: {source}")]
    Io {
        /// Path of the image.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The disk image has no content to import.
    #[error("image {0} is empty")]
    EmptyImage(PathBuf),

    /// The region list came back empty.
    #[error("could not find any regions in DescribeRegions response:\n{0}")]
    NoRegions(String),

    /// A response or the manifest could not be processed as XML.
    #[error(transparent)]
    Xml(#[from] XmlError),

    /// Local configuration is invalid.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The notification message could not be encoded.
    #[error("failed to encode notification: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Wrap a transport error with the operation that raised it.
    pub(crate) fn request(operation: &'static str) -> impl FnOnce(HttpError) -> Self {
        move |source| Self::Request { operation, source }
    }
}

/// Convenience result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
