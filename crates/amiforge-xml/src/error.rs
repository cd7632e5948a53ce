//! XML error types.

use std::io;

/// Errors raised while writing the manifest or reading response bodies.
#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    /// An I/O error during XML writing.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An error from the underlying quick-xml library, such as an
    /// unterminated or mismatched element.
    #[error("XML processing error: {0}")]
    QuickXml(#[from] quick_xml::Error),

    /// An element was opened but never closed.
    #[error("unterminated element <{0}>")]
    Unterminated(String),

    /// Element text could not be decoded or unescaped.
    #[error("failed to decode text of <{tag}>: {message}")]
    Text {
        /// The element whose content failed to decode.
        tag: String,
        /// Decoder message.
        message: String,
    },

    /// The manifest parts do not cover the whole object.
    #[error("manifest parts cover {covered} of {size} bytes")]
    IncompleteParts {
        /// Object size declared in the manifest.
        size: u64,
        /// Bytes covered by the appended parts.
        covered: u64,
    },
}
