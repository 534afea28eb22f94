//! Transport seam between the query engine and the HTTP stack.

use async_trait::async_trait;
use log::debug;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, StatusCode};

use crate::config::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_KEEP_ALIVE, DEFAULT_MAX_IDLE_PER_HOST, DEFAULT_QUERY_TIMEOUT,
};
use crate::error::TransportError;

/// Content type for form-encoded PUT queries.
pub(crate) const PUT_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Response header a range server uses to signal a protocol error.
pub(crate) const RANGE_EXCEPTION_HEADER: &str = "RangeException";

/// One range query, ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRequest {
    pub method: Method,
    pub url: String,
    /// Form-encoded payload for PUT dispatch; GET requests carry none.
    pub body: Option<String>,
}

/// The parts of a range server response the classifier cares about.
///
/// Implementations read the body to completion before returning so the
/// underlying connection can go back to the pool for reuse.
#[derive(Debug, Clone)]
pub struct RangeResponse {
    pub status: StatusCode,
    /// Value of the `RangeException` header, when present and non-empty.
    pub range_exception: Option<String>,
    pub body: Vec<u8>,
}

/// Capability to perform one HTTP round trip for a range query.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: RangeRequest) -> Result<RangeResponse, TransportError>;
}

/// Production transport backed by a shared [`reqwest::Client`].
pub struct HttpTransport {
    client: reqwest::Client,
    user_agent: String,
}

impl HttpTransport {
    /// Wraps an existing reqwest client.
    pub fn new(client: reqwest::Client, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
        }
    }

    /// Builds a transport with the default timeouts: 5 seconds to connect,
    /// 30 seconds for the whole query, 30 second TCP keep-alive, and one
    /// idle connection kept per server.
    pub fn with_defaults(user_agent: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(DEFAULT_QUERY_TIMEOUT)
            .tcp_keepalive(DEFAULT_KEEP_ALIVE)
            .pool_max_idle_per_host(DEFAULT_MAX_IDLE_PER_HOST)
            .build()
            .map_err(|e| Box::new(e) as TransportError)?;
        Ok(Self::new(client, user_agent))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: RangeRequest) -> Result<RangeResponse, TransportError> {
        debug!("{} {}", request.method, request.url);

        let mut builder = self
            .client
            .request(request.method, request.url.as_str())
            .header(USER_AGENT, &self.user_agent);
        if let Some(body) = request.body {
            builder = builder.header(CONTENT_TYPE, PUT_CONTENT_TYPE).body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Box::new(e) as TransportError)?;

        let status = response.status();
        let range_exception = response
            .headers()
            .get(RANGE_EXCEPTION_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|message| !message.is_empty())
            .map(str::to_owned);

        // Read the body on every path so keep-alive connections return to
        // the pool. For a plain 200 the payload is the result; everywhere
        // else it is a best-effort diagnostic snapshot.
        let body = match response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(err) if status == StatusCode::OK && range_exception.is_none() => {
                return Err(Box::new(err));
            }
            Err(_) => Vec::new(),
        };

        Ok(RangeResponse {
            status,
            range_exception,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn transport() -> HttpTransport {
        HttpTransport::new(reqwest::Client::new(), "test-agent")
    }

    #[tokio::test]
    async fn get_sends_user_agent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/range/list")
            .match_query(Matcher::Any)
            .match_header("user-agent", "test-agent")
            .with_status(200)
            .with_body("result1\n")
            .create_async()
            .await;

        let response = transport()
            .send(RangeRequest {
                method: Method::GET,
                url: format!("{}/range/list?foo", server.url()),
                body: None,
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, StatusCode::OK);
        assert!(response.range_exception.is_none());
        assert_eq!(response.body, b"result1\n");
    }

    #[tokio::test]
    async fn put_sends_form_encoded_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/range/list")
            .match_header("content-type", PUT_CONTENT_TYPE)
            .match_body("query=%7Bfoo%2Cbar%7D")
            .with_status(200)
            .with_body("result1\n")
            .create_async()
            .await;

        let response = transport()
            .send(RangeRequest {
                method: Method::PUT,
                url: format!("{}/range/list", server.url()),
                body: Some("query=%7Bfoo%2Cbar%7D".to_string()),
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn range_exception_header_is_extracted() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/range/list")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("RangeException", "NOCLUSTER")
            .with_body("junk")
            .create_async()
            .await;

        let response = transport()
            .send(RangeRequest {
                method: Method::GET,
                url: format!("{}/range/list?foo", server.url()),
                body: None,
            })
            .await
            .unwrap();

        assert_eq!(response.range_exception.as_deref(), Some("NOCLUSTER"));
        assert_eq!(response.body, b"junk");
    }

    #[tokio::test]
    async fn empty_range_exception_header_is_ignored() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/range/list")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("RangeException", "")
            .with_body("result1\n")
            .create_async()
            .await;

        let response = transport()
            .send(RangeRequest {
                method: Method::GET,
                url: format!("{}/range/list?foo", server.url()),
                body: None,
            })
            .await
            .unwrap();

        assert!(response.range_exception.is_none());
    }

    #[tokio::test]
    async fn error_status_body_is_captured() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/range/list")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body("could not parse expression")
            .create_async()
            .await;

        let response = transport()
            .send(RangeRequest {
                method: Method::GET,
                url: format!("{}/range/list?foo", server.url()),
                body: None,
            })
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.body, b"could not parse expression");
    }

    #[tokio::test]
    async fn invalid_url_is_a_transport_error() {
        let err = transport()
            .send(RangeRequest {
                method: Method::GET,
                url: "http://bad url/range/list".to_string(),
                body: None,
            })
            .await
            .unwrap_err();
        let cause = err.downcast_ref::<reqwest::Error>().unwrap();
        assert!(cause.is_builder());
    }
}
