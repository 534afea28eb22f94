//! Scriptable transport so programs can test their range handling without
//! a live server.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use url::form_urlencoded;

use crate::client::Client;
use crate::config::Config;
use crate::error::TransportError;
use crate::transport::{RangeRequest, RangeResponse, Transport};

/// Handler a [`MockConfig`] may use to answer each query individually.
/// Receives the decoded expression and returns result lines or an error.
pub type MockCallback =
    Box<dyn Fn(&str) -> Result<Vec<String>, TransportError> + Send + Sync>;

/// Canned behavior for a mock-backed [`Client`].
///
/// With no fields set, every query resolves to an empty result list. Set
/// individual fields to force results, transport errors, `RangeException`
/// headers, status codes, or an artificial delay before the response.
#[derive(Default)]
pub struct MockConfig {
    /// Result lines returned for every query.
    pub results: Vec<String>,
    /// Forces a transport-level failure with this message.
    pub error: Option<String>,
    /// Forces a `RangeException` header on the response.
    pub range_exception: Option<String>,
    /// Forces a non-200 status code on the response.
    pub status: Option<StatusCode>,
    /// Delay imposed before the response is produced.
    pub delay: Option<Duration>,
    /// When set, answers each query instead of `results`/`error`.
    pub callback: Option<MockCallback>,
}

#[async_trait]
impl Transport for MockConfig {
    async fn send(&self, request: RangeRequest) -> Result<RangeResponse, TransportError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let results = match &self.callback {
            Some(callback) => callback(&decode_expression(&request))?,
            None => {
                if let Some(message) = &self.error {
                    return Err(Box::new(io::Error::other(message.clone())));
                }
                self.results.clone()
            }
        };

        Ok(RangeResponse {
            status: self.status.unwrap_or(StatusCode::OK),
            range_exception: self
                .range_exception
                .clone()
                .filter(|message| !message.is_empty()),
            body: results.join("\n").into_bytes(),
        })
    }
}

impl Client {
    /// Builds a client whose every query is answered by `mock` instead of
    /// a live server.
    pub fn with_mock(mock: MockConfig) -> Self {
        // The mock never dials the address, but the pool requires one.
        let config = Config {
            servers: vec!["mock.invalid:80".to_string()],
            transport: Some(Arc::new(mock)),
            ..Config::default()
        };
        match Client::new(config) {
            Ok(client) => client,
            Err(_) => unreachable!("mock client configuration is statically valid"),
        }
    }
}

/// Recovers the expression from the wire form: the raw query string of a
/// GET request, or the `query` field of a PUT body.
fn decode_expression(request: &RangeRequest) -> String {
    if let Some(body) = &request.body {
        form_urlencoded::parse(body.as_bytes())
            .find(|(key, _)| key == "query")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default()
    } else {
        let raw = request
            .url
            .split_once('?')
            .map(|(_, query)| query)
            .unwrap_or("");
        form_urlencoded::parse(raw.as_bytes())
            .next()
            .map(|(key, _)| key.into_owned())
            .unwrap_or_default()
    }
}
