//! Response reading and validation.

use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{HttpError, HttpResult};

/// Largest response accepted from any endpoint (1 MiB).
pub const MAX_RESPONSE_BYTES: usize = 1 << 20;

const INITIAL_CAPACITY: usize = 16 * 1024;

/// Read until EOF, failing once more than `limit` bytes arrive.
///
/// Servers that close the connection without a TLS `close_notify` surface as
/// `UnexpectedEof`; once some data has been read that is treated as EOF.
pub async fn read_response<R>(reader: &mut R, host: &str, limit: usize) -> HttpResult<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(INITIAL_CAPACITY.min(limit.saturating_add(1)));
    loop {
        match reader.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(_) if buf.len() > limit => return Err(HttpError::ResponseTooLarge { limit }),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && !buf.is_empty() => break,
            Err(source) => {
                return Err(HttpError::Transport {
                    host: host.to_owned(),
                    source,
                });
            }
        }
    }
    Ok(buf.freeze())
}

/// The first line of a response, without its terminator.
#[must_use]
pub fn status_line(response: &[u8]) -> &[u8] {
    let end = response
        .iter()
        .position(|b| *b == b'\r' || *b == b'\n')
        .unwrap_or(response.len());
    &response[..end]
}

/// Require a ` 200 ` token on the first line.
///
/// # Examples
///
/// ```
/// use amiforge_http::response::check_status;
///
/// assert!(check_status(b"HTTP/1.1 200 OK\r\n\r\n").is_ok());
/// assert!(check_status(b"HTTP/1.1 403 Forbidden\r\n\r\n").is_err());
/// ```
pub fn check_status(response: &[u8]) -> HttpResult<()> {
    let line = status_line(response);
    if line.windows(5).any(|w| w == b" 200 ") {
        Ok(())
    } else {
        Err(HttpError::BadStatus {
            status_line: String::from_utf8_lossy(line).into_owned(),
            response: String::from_utf8_lossy(response).into_owned(),
        })
    }
}

/// Validate an API response and return its body with headers stripped.
///
/// Requires a 200 status, no NUL bytes, a `\r\n\r\n` separator, and a UTF-8
/// body.
pub fn api_body(response: &[u8]) -> HttpResult<String> {
    if response.contains(&0) {
        return Err(HttpError::NulInResponse);
    }
    check_status(response)?;

    let separator = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| HttpError::MissingSeparator {
            response: String::from_utf8_lossy(response).into_owned(),
        })?;

    String::from_utf8(response[separator + 4..].to_vec())
        .map_err(|_| HttpError::NonUtf8Body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_accept_200_on_first_line_only() {
        assert!(check_status(b"HTTP/1.0 200 OK\r\nX: y\r\n\r\n").is_ok());
        assert!(check_status(b"HTTP/1.1 500 Error\r\nX-Note: 200 fine\r\n\r\n").is_err());
        assert!(check_status(b"HTTP/1.1 2000 Odd\r\n\r\n").is_err());
        assert!(check_status(b"").is_err());
    }

    #[test]
    fn test_should_carry_status_line_in_error() {
        let err = check_status(b"HTTP/1.1 403 Forbidden\r\n\r\n<Error/>").unwrap_err();
        assert!(matches!(
            err,
            HttpError::BadStatus { ref status_line, .. } if status_line == "HTTP/1.1 403 Forbidden"
        ));
    }

    #[test]
    fn test_should_strip_headers_from_api_body() {
        let body = api_body(b"HTTP/1.1 200 OK\r\nContent-Type: text/xml\r\n\r\n<r>ok</r>").unwrap();
        assert_eq!(body, "<r>ok</r>");
    }

    #[test]
    fn test_should_reject_nul_in_api_response() {
        let result = api_body(b"HTTP/1.1 200 OK\r\n\r\n<r>\0</r>");
        assert!(matches!(result, Err(HttpError::NulInResponse)));
    }

    #[test]
    fn test_should_reject_missing_separator() {
        let result = api_body(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n");
        assert!(matches!(result, Err(HttpError::MissingSeparator { .. })));
    }

    #[test]
    fn test_should_reject_non_utf8_body() {
        let result = api_body(b"HTTP/1.1 200 OK\r\n\r\n\xff\xfe");
        assert!(matches!(result, Err(HttpError::NonUtf8Body)));
    }

    #[tokio::test]
    async fn test_should_read_whole_response() {
        let mut reader: &[u8] = b"HTTP/1.1 200 OK\r\n\r\nbody";
        let response = read_response(&mut reader, "h", MAX_RESPONSE_BYTES).await.unwrap();
        assert_eq!(&response[..], b"HTTP/1.1 200 OK\r\n\r\nbody");
    }

    #[tokio::test]
    async fn test_should_fail_when_response_exceeds_limit() {
        let data = vec![b'x'; 100];
        let mut reader: &[u8] = &data;
        let result = read_response(&mut reader, "h", 64).await;
        assert!(matches!(result, Err(HttpError::ResponseTooLarge { limit: 64 })));
    }

    #[tokio::test]
    async fn test_should_accept_response_at_exact_limit() {
        let data = vec![b'x'; 64];
        let mut reader: &[u8] = &data;
        let response = read_response(&mut reader, "h", 64).await.unwrap();
        assert_eq!(response.len(), 64);
    }
}
