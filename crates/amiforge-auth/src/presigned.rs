//! Presigned (query-string) URL generation.
//!
//! A presigned URL carries the signature in its query string so the import
//! service can fetch, probe, or delete a staged object without holding
//! credentials. Only `host` is signed and the payload is `UNSIGNED-PAYLOAD`.

use sha2::{Digest, Sha256};

use crate::canonical::{build_canonical_request, canonical_headers, uri_encode};
use crate::sigv4::{ALGORITHM, SigningContext, build_string_to_sign};

/// Payload hash placeholder used by presigned requests.
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Lifetime of manifest URLs: 7 days, the longest SigV4 allows.
pub const PRESIGN_EXPIRY_SECS: u64 = 604_800;

/// Build the signed query string for `method host path`.
///
/// The returned string holds the `X-Amz-*` parameters in canonical order with
/// `X-Amz-Signature` last, ready to follow `?` in a URL.
///
/// # Examples
///
/// ```
/// use amiforge_auth::presigned::presign_query;
/// use amiforge_auth::sigv4::SigningContext;
/// use amiforge_core::{Credentials, Region, Service};
///
/// let credentials = Credentials::new("AKID", "secret");
/// let region = Region::new("us-east-1");
/// let ctx = SigningContext {
///     credentials: &credentials,
///     region: &region,
///     service: Service::Storage,
///     time: chrono::Utc::now(),
/// };
/// let query = presign_query(&ctx, "GET", "bucket.s3.amazonaws.com", "/n/part0", 3600);
/// assert!(query.starts_with("X-Amz-Algorithm=AWS4-HMAC-SHA256&X-Amz-Credential=AKID%2F"));
/// assert!(query.contains("&X-Amz-Signature="));
/// ```
#[must_use]
pub fn presign_query(
    ctx: &SigningContext<'_>,
    method: &str,
    host: &str,
    path: &str,
    expires_secs: u64,
) -> String {
    let amz_date = ctx.amz_date();
    let credential_scope = ctx.credential_scope();
    let credential = format!("{}/{credential_scope}", ctx.credentials.access_key_id());

    let query = format!(
        "X-Amz-Algorithm={ALGORITHM}\
         &X-Amz-Credential={}\
         &X-Amz-Date={amz_date}\
         &X-Amz-Expires={expires_secs}\
         &X-Amz-SignedHeaders=host",
        uri_encode(&credential),
    );

    let headers = canonical_headers(&[("host", host)]);
    let canonical_request =
        build_canonical_request(method, path, &query, &headers, UNSIGNED_PAYLOAD);
    let canonical_request_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));

    let string_to_sign =
        build_string_to_sign(&amz_date, &credential_scope, &canonical_request_hash);
    let signature = ctx.signature_for(&string_to_sign);

    format!("{query}&X-Amz-Signature={signature}")
}

/// Build a complete presigned `https://` URL for a virtual-hosted object.
#[must_use]
pub fn presign_url(
    ctx: &SigningContext<'_>,
    method: &str,
    host: &str,
    path: &str,
    expires_secs: u64,
) -> String {
    format!(
        "https://{host}{path}?{}",
        presign_query(ctx, method, host, path, expires_secs)
    )
}
