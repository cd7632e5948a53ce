//! Scripted transport for pipeline tests.

use std::collections::VecDeque;
use std::sync::Arc;

use amiforge_core::Credentials;
use amiforge_http::{AwsClient, HttpResult, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

/// One request seen by the transport.
#[derive(Debug, Clone)]
pub(crate) struct Recorded {
    pub(crate) host: String,
    pub(crate) request: Vec<u8>,
}

impl Recorded {
    pub(crate) fn text(&self) -> String {
        String::from_utf8_lossy(&self.request).into_owned()
    }

    /// `PUT <path>` for uploads, the `Action` value for API calls.
    pub(crate) fn label(&self) -> String {
        let text = self.text();
        if let Some(rest) = text.strip_prefix("PUT ") {
            let path = rest.split(' ').next().unwrap_or_default();
            return format!("PUT {path}");
        }
        text.split_once("\r\n\r\nAction=")
            .map(|(_, rest)| rest.split('&').next().unwrap_or_default().to_owned())
            .unwrap_or_default()
    }

    pub(crate) fn body(&self) -> &[u8] {
        let at = self
            .request
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map_or(self.request.len(), |p| p + 4);
        &self.request[at..]
    }
}

/// Replies to requests in order and records each one.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    replies: Mutex<VecDeque<Vec<u8>>>,
    requests: Mutex<Vec<Recorded>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a 200 reply with `body`.
    pub(crate) fn ok(&self, body: &str) -> &Self {
        self.reply(format!("HTTP/1.1 200 OK\r\nContent-Type: text/xml\r\n\r\n{body}"))
    }

    /// Queue `n` empty 200 replies.
    pub(crate) fn ok_times(&self, n: usize) -> &Self {
        for _ in 0..n {
            self.ok("");
        }
        self
    }

    /// Queue a failure reply with the given status line.
    pub(crate) fn fail(&self, status_line: &str) -> &Self {
        self.reply(format!("{status_line}\r\n\r\n<Error/>"))
    }

    fn reply(&self, response: String) -> &Self {
        self.replies.lock().push_back(response.into_bytes());
        self
    }

    pub(crate) fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }

    pub(crate) fn labels(&self) -> Vec<String> {
        self.requests.lock().iter().map(Recorded::label).collect()
    }

    pub(crate) fn remaining(&self) -> usize {
        self.replies.lock().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, host: &str, _port: u16, request: Bytes) -> HttpResult<Bytes> {
        self.requests.lock().push(Recorded {
            host: host.to_owned(),
            request: request.to_vec(),
        });
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| b"HTTP/1.1 599 Script Exhausted\r\n\r\n".to_vec());
        Ok(Bytes::from(reply))
    }
}

pub(crate) fn client(transport: &Arc<ScriptedTransport>) -> AwsClient {
    AwsClient::new(
        transport.clone(),
        Credentials::new("AKIDEXAMPLE", "secret"),
        3,
    )
}
