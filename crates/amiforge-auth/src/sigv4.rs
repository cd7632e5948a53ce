//! AWS Signature Version 4 header signing.
//!
//! Signing follows the usual four steps:
//!
//! 1. Build the canonical request from the method, path, query, headers, and
//!    payload hash.
//! 2. Build the string to sign from the timestamp, credential scope, and the
//!    canonical request hash.
//! 3. Derive the signing key from the secret key and credential scope.
//! 4. HMAC the string to sign and assemble the `Authorization` value.
//!
//! The main entry point is [`sign_request`].

use chrono::{DateTime, Utc};
use hmac::{Hmac, KeyInit, Mac};
use sha2::{Digest, Sha256};
use tracing::debug;

use amiforge_core::{Credentials, Region, Service};

use crate::canonical::{build_canonical_request, canonical_headers};

/// The only signing algorithm amiforge produces.
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// SHA-256 of the empty payload.
pub const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

type HmacSha256 = Hmac<Sha256>;

/// Who signs, where, and when.
///
/// The timestamp is captured by the caller immediately before each attempt,
/// so a retried request never reuses a stale signature.
#[derive(Debug, Clone, Copy)]
pub struct SigningContext<'a> {
    /// The access key pair.
    pub credentials: &'a Credentials,
    /// Region in the credential scope.
    pub region: &'a Region,
    /// Service in the credential scope.
    pub service: Service,
    /// Signing time.
    pub time: DateTime<Utc>,
}

impl SigningContext<'_> {
    /// The `YYYYMMDD` date stamp.
    #[must_use]
    pub fn date_stamp(&self) -> String {
        self.time.format("%Y%m%d").to_string()
    }

    /// The `YYYYMMDDTHHMMSSZ` timestamp.
    #[must_use]
    pub fn amz_date(&self) -> String {
        self.time.format("%Y%m%dT%H%M%SZ").to_string()
    }

    /// The credential scope, `date/region/service/aws4_request`.
    #[must_use]
    pub fn credential_scope(&self) -> String {
        format!(
            "{}/{}/{}/aws4_request",
            self.date_stamp(),
            self.region,
            self.service.signing_name()
        )
    }

    /// Sign a prepared string to sign with the derived key.
    #[must_use]
    pub(crate) fn signature_for(&self, string_to_sign: &str) -> String {
        let signing_key = derive_signing_key(
            self.credentials.secret_access_key(),
            &self.date_stamp(),
            self.region.as_str(),
            self.service.signing_name(),
        );
        compute_signature(&signing_key, string_to_sign)
    }
}

/// The parts of an outgoing request that take part in the signature.
#[derive(Debug, Clone, Copy)]
pub struct UnsignedRequest<'a> {
    /// HTTP method, e.g. `PUT`.
    pub method: &'a str,
    /// Value of the `Host` header.
    pub host: &'a str,
    /// Unencoded request path.
    pub path: &'a str,
    /// Already-encoded query string, possibly empty.
    pub query: &'a str,
    /// Extra headers to sign besides `host`, `x-amz-content-sha256`, and `x-amz-date`.
    pub headers: &'a [(&'a str, &'a str)],
    /// Hex SHA-256 of the body.
    pub payload_hash: &'a str,
}

/// Header values produced by [`sign_request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSignature {
    /// Value for `x-amz-content-sha256`.
    pub content_sha256: String,
    /// Value for `x-amz-date`.
    pub amz_date: String,
    /// Value for `Authorization`.
    pub authorization: String,
}

/// Sign a request in header mode.
///
/// # Examples
///
/// ```
/// use amiforge_auth::sigv4::{EMPTY_PAYLOAD_SHA256, SigningContext, UnsignedRequest, sign_request};
/// use amiforge_core::{Credentials, Region, Service};
///
/// let credentials = Credentials::new("AKID", "secret");
/// let region = Region::new("us-east-1");
/// let ctx = SigningContext {
///     credentials: &credentials,
///     region: &region,
///     service: Service::Compute,
///     time: chrono::Utc::now(),
/// };
/// let signature = sign_request(
///     &ctx,
///     &UnsignedRequest {
///         method: "POST",
///         host: "ec2.us-east-1.amazonaws.com",
///         path: "/",
///         query: "",
///         headers: &[],
///         payload_hash: EMPTY_PAYLOAD_SHA256,
///     },
/// );
/// assert!(signature.authorization.starts_with("AWS4-HMAC-SHA256 Credential=AKID/"));
/// ```
#[must_use]
pub fn sign_request(ctx: &SigningContext<'_>, request: &UnsignedRequest<'_>) -> RequestSignature {
    debug_assert!(
        !ctx.credentials.access_key_id().is_empty(),
        "signing requires an access key ID"
    );
    let amz_date = ctx.amz_date();

    let mut headers: Vec<(&str, &str)> = vec![
        ("host", request.host),
        ("x-amz-content-sha256", request.payload_hash),
        ("x-amz-date", amz_date.as_str()),
    ];
    headers.extend_from_slice(request.headers);
    let headers = canonical_headers(&headers);

    let canonical_request = build_canonical_request(
        request.method,
        request.path,
        request.query,
        &headers,
        request.payload_hash,
    );
    let canonical_request_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));

    let credential_scope = ctx.credential_scope();
    let string_to_sign =
        build_string_to_sign(&amz_date, &credential_scope, &canonical_request_hash);
    let signature = ctx.signature_for(&string_to_sign);

    debug!(
        method = %request.method,
        host = %request.host,
        path = %request.path,
        signed_headers = %headers.signed,
        "signed request"
    );

    RequestSignature {
        content_sha256: request.payload_hash.to_owned(),
        authorization: format!(
            "{ALGORITHM} Credential={}/{credential_scope},SignedHeaders={},Signature={signature}",
            ctx.credentials.access_key_id(),
            headers.signed,
        ),
        amz_date,
    }
}

/// Build the string to sign.
///
/// ```text
/// AWS4-HMAC-SHA256\n
/// <timestamp>\n
/// <credential_scope>\n
/// <hex(SHA256(canonical_request))>
/// ```
#[must_use]
pub fn build_string_to_sign(
    timestamp: &str,
    credential_scope: &str,
    canonical_request_hash: &str,
) -> String {
    format!("{ALGORITHM}\n{timestamp}\n{credential_scope}\n{canonical_request_hash}")
}

/// Derive the SigV4 signing key using the HMAC-SHA256 chain.
///
/// ```text
/// DateKey              = HMAC-SHA256("AWS4" + secret_key, date)
/// DateRegionKey        = HMAC-SHA256(DateKey, region)
/// DateRegionServiceKey = HMAC-SHA256(DateRegionKey, service)
/// SigningKey           = HMAC-SHA256(DateRegionServiceKey, "aws4_request")
/// ```
#[must_use]
pub fn derive_signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let date_key = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date.as_bytes());
    let date_region_key = hmac_sha256(&date_key, region.as_bytes());
    let date_region_service_key = hmac_sha256(&date_region_key, service.as_bytes());
    hmac_sha256(&date_region_service_key, b"aws4_request")
}

/// Hex-encoded HMAC-SHA256 of `data` under `signing_key`.
#[must_use]
pub fn compute_signature(signing_key: &[u8], data: &str) -> String {
    hex::encode(hmac_sha256(signing_key, data.as_bytes()))
}

/// Hex-encoded SHA-256 of a request body.
///
/// # Examples
///
/// ```
/// use amiforge_auth::sigv4::{EMPTY_PAYLOAD_SHA256, hash_payload};
///
/// assert_eq!(hash_payload(b""), EMPTY_PAYLOAD_SHA256);
/// ```
#[must_use]
pub fn hash_payload(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can accept keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}
