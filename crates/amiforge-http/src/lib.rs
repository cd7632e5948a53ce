//! Signed request transport for amiforge.
//!
//! Every remote call follows the same path: sign with a fresh timestamp,
//! build the raw HTTP/1.x request, send it through a [`Transport`], and
//! validate the response. Calls either make a single attempt or retry up to
//! a fixed budget with [`with_retries`].
//!
//! # Modules
//!
//! - [`client`] - [`AwsClient`], the signed storage and API client
//! - [`form`] - Form-encoded API bodies
//! - [`request`] - Wire request builders
//! - [`response`] - Response reading and validation
//! - [`retry`] - Bounded retry
//! - [`transport`] - The transport trait and its TLS implementation

pub mod client;
pub mod error;
pub mod form;
pub mod request;
pub mod response;
pub mod retry;
pub mod transport;

pub use client::AwsClient;
pub use error::{HttpError, HttpResult};
pub use form::FormBody;
pub use response::MAX_RESPONSE_BYTES;
pub use retry::with_retries;
pub use transport::{HTTPS_PORT, TlsTransport, Transport};
