//! Transport and protocol errors.

use std::io;
use std::time::Duration;

/// Errors raised while sending a signed request or validating its response.
///
/// Every variant is retryable by the retrying call variants: a connection
/// that drops mid-response looks the same as a malformed one.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// Connecting, writing, or reading failed.
    #[error("request to {host} failed: {source}")]
    Transport {
        /// Remote host.
        host: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The exchange did not finish within the I/O timeout.
    #[error("request to {host} timed out after {timeout:?}")]
    Timeout {
        /// Remote host.
        host: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The TLS client could not be configured for the host.
    #[error("TLS setup for {host} failed: {message}")]
    Tls {
        /// Remote host.
        host: String,
        /// Error reported by rustls.
        message: String,
    },

    /// The status line did not carry a 200 status.
    #[error("request failed with status line {status_line:?}:\n{response}")]
    BadStatus {
        /// First line of the response.
        status_line: String,
        /// The whole response, lossily decoded.
        response: String,
    },

    /// The response contains a NUL byte.
    #[error("NUL byte in API response")]
    NulInResponse,

    /// The response has no `\r\n\r\n` header terminator.
    #[error("bad API response received:\n{response}")]
    MissingSeparator {
        /// The whole response, lossily decoded.
        response: String,
    },

    /// The response exceeded the buffer ceiling.
    #[error("response exceeds {limit} bytes")]
    ResponseTooLarge {
        /// The ceiling in bytes.
        limit: usize,
    },

    /// The response body is not valid UTF-8.
    #[error("response body is not valid UTF-8")]
    NonUtf8Body,
}

/// Convenience result type for transport operations.
pub type HttpResult<T> = Result<T, HttpError>;
