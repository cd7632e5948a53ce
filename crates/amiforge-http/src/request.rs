//! Wire-format request builders.
//!
//! Requests are written as raw HTTP/1.x bytes: the header block carries the
//! signature values and `Connection: close`, so the response is read to EOF.

use amiforge_auth::RequestSignature;
use amiforge_auth::canonical::canonical_uri;
use bytes::{BufMut, Bytes, BytesMut};

/// Content type of form-encoded API calls.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Build a storage `PUT <path> HTTP/1.1` request carrying `body`.
///
/// # Examples
///
/// ```
/// use amiforge_auth::RequestSignature;
/// use amiforge_http::request::put_object_request;
///
/// let signature = RequestSignature {
///     content_sha256: "abc".to_owned(),
///     amz_date: "20130524T000000Z".to_owned(),
///     authorization: "AWS4-HMAC-SHA256 ...".to_owned(),
/// };
/// let request = put_object_request("b.s3.amazonaws.com", "/n/part0", &signature, b"data");
/// assert!(request.starts_with(b"PUT /n/part0 HTTP/1.1\r\nHost: b.s3.amazonaws.com\r\n"));
/// assert!(request.ends_with(b"\r\n\r\ndata"));
/// ```
#[must_use]
pub fn put_object_request(
    host: &str,
    path: &str,
    signature: &RequestSignature,
    body: &[u8],
) -> Bytes {
    let head = format!(
        "PUT {} HTTP/1.1\r\n\
         Host: {host}\r\n\
         X-Amz-Date: {}\r\n\
         X-Amz-Content-SHA256: {}\r\n\
         Authorization: {}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n",
        canonical_uri(path),
        signature.amz_date,
        signature.content_sha256,
        signature.authorization,
        body.len(),
    );
    assemble(&head, body)
}

/// Build a form-encoded `POST / HTTP/1.0` API request.
#[must_use]
pub fn api_request(host: &str, signature: &RequestSignature, body: &str) -> Bytes {
    let head = format!(
        "POST / HTTP/1.0\r\n\
         Host: {host}\r\n\
         X-Amz-Date: {}\r\n\
         X-Amz-Content-SHA256: {}\r\n\
         Authorization: {}\r\n\
         Content-Length: {}\r\n\
         Content-Type: {FORM_CONTENT_TYPE}\r\n\
         Connection: close\r\n\
         \r\n",
        signature.amz_date,
        signature.content_sha256,
        signature.authorization,
        body.len(),
    );
    assemble(&head, body.as_bytes())
}

fn assemble(head: &str, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(head.len() + body.len());
    buf.put_slice(head.as_bytes());
    buf.put_slice(body);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signature() -> RequestSignature {
        RequestSignature {
            content_sha256: "e3b0".to_owned(),
            amz_date: "20260101T000000Z".to_owned(),
            authorization: "AWS4-HMAC-SHA256 Credential=AKID/x,SignedHeaders=host,Signature=ff"
                .to_owned(),
        }
    }

    #[test]
    fn test_should_build_put_request_with_exact_header_block() {
        let request =
            put_object_request("img.s3.amazonaws.com", "/abc/part1", &signature(), b"xyz");
        assert_eq!(
            &request[..],
            b"PUT /abc/part1 HTTP/1.1\r\n\
              Host: img.s3.amazonaws.com\r\n\
              X-Amz-Date: 20260101T000000Z\r\n\
              X-Amz-Content-SHA256: e3b0\r\n\
              Authorization: AWS4-HMAC-SHA256 Credential=AKID/x,SignedHeaders=host,Signature=ff\r\n\
              Content-Length: 3\r\n\
              Connection: close\r\n\
              \r\n\
              xyz"
        );
    }

    #[test]
    fn test_should_build_api_request_with_form_content_type() {
        let body = "Action=DescribeRegions&Version=2014-09-01";
        let request = api_request("ec2.eu-west-1.amazonaws.com", &signature(), body);
        let text = std::str::from_utf8(&request).unwrap();

        assert!(text.starts_with("POST / HTTP/1.0\r\nHost: ec2.eu-west-1.amazonaws.com\r\n"));
        assert!(text.contains("\r\nContent-Length: 41\r\n"));
        assert!(text.contains("\r\nContent-Type: application/x-www-form-urlencoded\r\n"));
        assert!(
            text.ends_with("\r\nConnection: close\r\n\r\nAction=DescribeRegions&Version=2014-09-01")
        );
    }
}
