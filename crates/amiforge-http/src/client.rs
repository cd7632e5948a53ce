//! Signed AWS client.
//!
//! [`AwsClient`] ties the signer to the transport: every attempt captures a
//! fresh timestamp, signs, builds the wire request, sends it, and validates
//! the response. The `*_with_retry` variants wrap a call in the bounded retry
//! policy; [`AwsClient::call`] makes exactly one attempt.

use std::sync::Arc;

use amiforge_auth::{SigningContext, UnsignedRequest, hash_payload, presign_url, sign_request};
use amiforge_core::{Credentials, Region, Service};
use chrono::Utc;
use tracing::debug;

use crate::error::HttpResult;
use crate::form::FormBody;
use crate::request::{api_request, put_object_request};
use crate::response::{api_body, check_status};
use crate::retry::with_retries;
use crate::transport::{HTTPS_PORT, Transport};

/// Client for storage uploads and form-encoded API calls.
#[derive(Debug, Clone)]
pub struct AwsClient {
    transport: Arc<dyn Transport>,
    credentials: Credentials,
    max_attempts: u32,
}

impl AwsClient {
    /// Create a client that retries up to `max_attempts` times.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, credentials: Credentials, max_attempts: u32) -> Self {
        Self {
            transport,
            credentials,
            max_attempts,
        }
    }

    /// Attempts made by the retrying variants.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn signing_context<'a>(&'a self, region: &'a Region, service: Service) -> SigningContext<'a> {
        SigningContext {
            credentials: &self.credentials,
            region,
            service,
            time: Utc::now(),
        }
    }

    /// Presign a virtual-hosted storage URL for `method` on `bucket` `path`.
    #[must_use]
    pub fn presign_object_url(
        &self,
        region: &Region,
        bucket: &str,
        method: &str,
        path: &str,
        expires_secs: u64,
    ) -> String {
        presign_url(
            &self.signing_context(region, Service::Storage),
            method,
            &Service::bucket_host(bucket),
            path,
            expires_secs,
        )
    }

    /// Upload `body` to `bucket` `path`, retrying failed attempts.
    pub async fn put_object_with_retry(
        &self,
        region: &Region,
        bucket: &str,
        path: &str,
        body: &[u8],
    ) -> HttpResult<()> {
        let payload_hash = hash_payload(body);
        let payload_hash = payload_hash.as_str();
        with_retries(self.max_attempts, "S3 PUT", move |_| {
            self.send_put(region, bucket, path, body, payload_hash)
        })
        .await
    }

    async fn send_put(
        &self,
        region: &Region,
        bucket: &str,
        path: &str,
        body: &[u8],
        payload_hash: &str,
    ) -> HttpResult<()> {
        let host = Service::bucket_host(bucket);
        let signature = sign_request(
            &self.signing_context(region, Service::Storage),
            &UnsignedRequest {
                method: "PUT",
                host: &host,
                path,
                query: "",
                headers: &[],
                payload_hash,
            },
        );

        let endpoint = Service::Storage.endpoint(region);
        debug!(%endpoint, %host, path, bytes = body.len(), "uploading object");
        let response = self
            .transport
            .send(
                &endpoint,
                HTTPS_PORT,
                put_object_request(&host, path, &signature, body),
            )
            .await?;
        check_status(&response)
    }

    /// Issue an API call with a single attempt and return the response body.
    pub async fn call(
        &self,
        service: Service,
        region: &Region,
        form: &FormBody,
    ) -> HttpResult<String> {
        let host = service.endpoint(region);
        let body = form.encode();
        let payload_hash = hash_payload(body.as_bytes());
        let signature = sign_request(
            &self.signing_context(region, service),
            &UnsignedRequest {
                method: "POST",
                host: &host,
                path: "/",
                query: "",
                headers: &[],
                payload_hash: &payload_hash,
            },
        );

        debug!(action = form.action(), %host, "calling API");
        let response = self
            .transport
            .send(&host, HTTPS_PORT, api_request(&host, &signature, &body))
            .await?;
        api_body(&response)
    }

    /// Issue an API call, retrying failed attempts.
    pub async fn call_with_retry(
        &self,
        service: Service,
        region: &Region,
        form: &FormBody,
    ) -> HttpResult<String> {
        let label = format!("{service} {}", form.action());
        with_retries(self.max_attempts, &label, move |_| {
            self.call(service, region, form)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use amiforge_auth::SigningContext;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::NaiveDateTime;
    use parking_lot::Mutex;

    use super::*;
    use crate::error::HttpError;

    const OK: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: text/xml\r\n\r\n<ok/>";
    const UNAVAILABLE: &[u8] = b"HTTP/1.1 503 Service Unavailable\r\n\r\n";

    #[derive(Debug, Default)]
    struct RecordingTransport {
        responses: Mutex<VecDeque<&'static [u8]>>,
        requests: Mutex<Vec<(String, u16, Bytes)>>,
        first_delay: Option<Duration>,
    }

    impl RecordingTransport {
        fn with_responses(responses: &[&'static [u8]]) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.iter().copied().collect()),
                requests: Mutex::default(),
                first_delay: None,
            })
        }

        fn request_text(&self, index: usize) -> String {
            String::from_utf8_lossy(&self.requests.lock()[index].2).into_owned()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, host: &str, port: u16, request: Bytes) -> HttpResult<Bytes> {
            let first = {
                let mut requests = self.requests.lock();
                requests.push((host.to_owned(), port, request));
                requests.len() == 1
            };
            if let (true, Some(delay)) = (first, self.first_delay) {
                tokio::time::sleep(delay).await;
            }
            Ok(Bytes::from_static(self.responses.lock().pop_front().unwrap_or(OK)))
        }
    }

    fn header<'a>(text: &'a str, name: &str) -> &'a str {
        text.lines()
            .find_map(|line| line.strip_prefix(name))
            .unwrap()
    }

    fn client(transport: Arc<RecordingTransport>) -> AwsClient {
        AwsClient::new(transport, Credentials::new("AKIDEXAMPLE", "secret"), 10)
    }

    #[tokio::test]
    async fn test_should_put_object_through_global_endpoint() {
        let transport = RecordingTransport::with_responses(&[]);
        let client = client(transport.clone());

        client
            .put_object_with_retry(&Region::new("us-east-1"), "images", "/n/part0", b"abc")
            .await
            .unwrap();

        let requests = transport.requests.lock();
        assert_eq!(requests[0].0, "s3.amazonaws.com");
        assert_eq!(requests[0].1, 443);
        drop(requests);

        let text = transport.request_text(0);
        assert!(
            text.starts_with("PUT /n/part0 HTTP/1.1\r\nHost: images.s3.amazonaws.com\r\n")
        );
        assert!(text.contains("/us-east-1/s3/aws4_request,"));
        assert!(text.contains(",SignedHeaders=host;x-amz-content-sha256;x-amz-date,"));
        assert!(text.ends_with("\r\n\r\nabc"));
    }

    #[tokio::test]
    async fn test_should_return_api_body_and_sign_for_service() {
        let transport = RecordingTransport::with_responses(&[OK]);
        let client = client(transport.clone());
        let form = FormBody::new("DescribeRegions", "2014-09-01");

        let body = client
            .call(Service::Compute, &Region::new("eu-west-1"), &form)
            .await
            .unwrap();

        assert_eq!(body, "<ok/>");
        assert_eq!(
            transport.requests.lock()[0].0,
            "ec2.eu-west-1.amazonaws.com"
        );
        let text = transport.request_text(0);
        assert!(text.contains("/eu-west-1/ec2/aws4_request,"));
        assert!(text.ends_with("Action=DescribeRegions&Version=2014-09-01"));
    }

    #[tokio::test]
    async fn test_should_not_retry_single_attempt_call() {
        let transport = RecordingTransport::with_responses(&[UNAVAILABLE, OK]);
        let client = client(transport.clone());
        let form = FormBody::new("CreateSnapshot", "2014-09-01");

        let result = client
            .call(Service::Compute, &Region::new("eu-west-1"), &form)
            .await;

        assert!(matches!(result, Err(HttpError::BadStatus { .. })));
        assert_eq!(transport.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_should_retry_until_success() {
        let transport = RecordingTransport::with_responses(&[UNAVAILABLE, UNAVAILABLE, OK]);
        let client = client(transport.clone());
        let form = FormBody::new("DescribeImages", "2014-09-01");

        let body = client
            .call_with_retry(Service::Compute, &Region::new("eu-west-1"), &form)
            .await
            .unwrap();

        assert_eq!(body, "<ok/>");
        assert_eq!(transport.requests.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_should_sign_each_attempt_with_its_own_timestamp() {
        let transport = Arc::new(RecordingTransport {
            responses: Mutex::new(VecDeque::from([UNAVAILABLE, OK])),
            requests: Mutex::default(),
            first_delay: Some(Duration::from_millis(1100)),
        });
        let client = client(transport.clone());
        let region = Region::new("eu-west-1");
        let form = FormBody::new("DescribeImages", "2014-09-01");

        client
            .call_with_retry(Service::Compute, &region, &form)
            .await
            .unwrap();

        assert_eq!(transport.requests.lock().len(), 2);
        let first = transport.request_text(0);
        let second = transport.request_text(1);
        assert_ne!(
            header(&first, "X-Amz-Date: "),
            header(&second, "X-Amz-Date: ")
        );
        assert_ne!(
            header(&first, "Authorization: "),
            header(&second, "Authorization: ")
        );

        let payload_hash = hash_payload(form.encode().as_bytes());
        for text in [&first, &second] {
            let date = header(text, "X-Amz-Date: ");
            let time = NaiveDateTime::parse_from_str(date, "%Y%m%dT%H%M%SZ")
                .unwrap()
                .and_utc();
            let expected = sign_request(
                &SigningContext {
                    credentials: &client.credentials,
                    region: &region,
                    service: Service::Compute,
                    time,
                },
                &UnsignedRequest {
                    method: "POST",
                    host: "ec2.eu-west-1.amazonaws.com",
                    path: "/",
                    query: "",
                    headers: &[],
                    payload_hash: &payload_hash,
                },
            );
            assert_eq!(header(text, "Authorization: "), expected.authorization);
        }
    }

    #[tokio::test]
    async fn test_should_give_up_after_max_attempts() {
        let transport = RecordingTransport::with_responses(&[UNAVAILABLE; 12]);
        let client = client(transport.clone());

        let result = client
            .put_object_with_retry(&Region::new("eu-west-1"), "images", "/n/part0", b"x")
            .await;

        assert!(matches!(result, Err(HttpError::BadStatus { .. })));
        assert_eq!(transport.requests.lock().len(), 10);
        assert_eq!(transport.requests.lock()[0].0, "s3.eu-west-1.amazonaws.com");
    }

    #[test]
    fn test_should_presign_object_url_for_bucket_host() {
        let client = client(RecordingTransport::with_responses(&[]));
        let url = client.presign_object_url(
            &Region::new("eu-west-1"),
            "images",
            "GET",
            "/n/manifest.xml",
            604_800,
        );
        assert!(url.starts_with("https://images.s3.amazonaws.com/n/manifest.xml?"));
        assert!(url.contains("?X-Amz-Algorithm=AWS4-HMAC-SHA256&"));
        assert!(url.contains("%2Feu-west-1%2Fs3%2Faws4_request&"));
    }
}
