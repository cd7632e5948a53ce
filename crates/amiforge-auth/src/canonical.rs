//! Canonical request construction for AWS Signature Version 4.
//!
//! The canonical request is the byte-exact serialization that gets hashed
//! into the string to sign:
//!
//! ```text
//! HTTPRequestMethod\n
//! CanonicalURI\n
//! CanonicalQueryString\n
//! CanonicalHeaders\n\n
//! SignedHeaders\n
//! HashedPayload
//! ```

use std::collections::BTreeMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Everything except the RFC 3986 unreserved characters
/// (A-Z, a-z, 0-9, `-`, `_`, `.`, `~`) is percent-encoded.
const URI_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode a string using the SigV4 (RFC 3986) rules.
///
/// Slashes are encoded too, so this is suitable for query values and form
/// bodies but not for whole paths; use [`canonical_uri`] for those.
///
/// # Examples
///
/// ```
/// use amiforge_auth::canonical::uri_encode;
///
/// assert_eq!(uri_encode("AKID/20130524/us-east-1"), "AKID%2F20130524%2Fus-east-1");
/// assert_eq!(uri_encode("a b&c"), "a%20b%26c");
/// ```
#[must_use]
pub fn uri_encode(input: &str) -> String {
    utf8_percent_encode(input, URI_ENCODE_SET).to_string()
}

/// Build the canonical URI by encoding each path segment individually.
///
/// Forward slashes are preserved and an empty path becomes `/`. The same
/// string is used on the request line so the signed and sent paths agree.
///
/// # Examples
///
/// ```
/// use amiforge_auth::canonical::canonical_uri;
///
/// assert_eq!(canonical_uri("/3f2a/part0"), "/3f2a/part0");
/// assert_eq!(canonical_uri("/test$file.text"), "/test%24file.text");
/// assert_eq!(canonical_uri(""), "/");
/// ```
#[must_use]
pub fn canonical_uri(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return "/".to_owned();
    }

    path.split('/')
        .map(uri_encode)
        .collect::<Vec<_>>()
        .join("/")
}

/// Build the canonical query string from already-encoded `key=value` pairs.
///
/// Parameters are sorted by key, then by value for duplicate keys.
#[must_use]
pub fn canonical_query(query: &str) -> String {
    let mut params: Vec<(&str, &str)> = query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|param| param.split_once('=').unwrap_or((param, "")))
        .collect();

    params.sort_unstable();

    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Canonicalized headers together with their signed-headers list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalHeaders {
    /// `name:value` lines joined by `\n`, without a trailing newline.
    pub canonical: String,
    /// Lowercase header names joined by `;`.
    pub signed: String,
}

/// Canonicalize the headers that take part in the signature.
///
/// Names are lowercased and sorted, values are trimmed and internal runs of
/// whitespace collapse to a single space. Repeated names are joined with `,`.
///
/// # Examples
///
/// ```
/// use amiforge_auth::canonical::canonical_headers;
///
/// let headers = canonical_headers(&[("X-Amz-Date", "20130524T000000Z"), ("Host", "example.com")]);
/// assert_eq!(headers.canonical, "host:example.com\nx-amz-date:20130524T000000Z");
/// assert_eq!(headers.signed, "host;x-amz-date");
/// ```
#[must_use]
pub fn canonical_headers(headers: &[(&str, &str)]) -> CanonicalHeaders {
    let mut header_map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let trimmed_value = collapse_whitespace(value.trim());
        header_map
            .entry(name.to_lowercase())
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&trimmed_value);
            })
            .or_insert(trimmed_value);
    }

    CanonicalHeaders {
        canonical: header_map
            .iter()
            .map(|(name, value)| format!("{name}:{value}"))
            .collect::<Vec<_>>()
            .join("\n"),
        signed: header_map
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(";"),
    }
}

/// Build the full canonical request string.
#[must_use]
pub fn build_canonical_request(
    method: &str,
    path: &str,
    query: &str,
    headers: &CanonicalHeaders,
    payload_hash: &str,
) -> String {
    format!(
        "{method}\n{}\n{}\n{}\n\n{}\n{payload_hash}",
        canonical_uri(path),
        canonical_query(query),
        headers.canonical,
        headers.signed,
    )
}

fn collapse_whitespace(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut prev_was_space = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !prev_was_space {
                result.push(' ');
                prev_was_space = true;
            }
        } else {
            result.push(ch);
            prev_was_space = false;
        }
    }
    result
}
