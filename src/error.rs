//! Error taxonomy for client construction and query resolution.

use std::io;
use std::sync::Arc;

use reqwest::StatusCode;

use crate::config::RetryPredicate;

/// Boxed cause produced by a [`Transport`](crate::transport::Transport)
/// implementation.
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that prevent construction of a [`Client`](crate::client::Client).
#[derive(Debug)]
pub enum ConfigError {
    /// No server addresses were configured.
    EmptyServerList,
    /// The default HTTP transport could not be built.
    Transport(TransportError),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EmptyServerList => {
                write!(f, "cannot create range client without at least one server")
            }
            ConfigError::Transport(cause) => {
                write!(f, "cannot create default transport: {}", cause)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::EmptyServerList => None,
            ConfigError::Transport(cause) => Some(cause.as_ref()),
        }
    }
}

/// Errors produced while resolving a query.
///
/// The `Display` form carries only the protocol-level message. Response body
/// snapshots are reachable through [`QueryError::body`] for programs that
/// want the full diagnostic payload, e.g. for a cache or logging pipeline.
#[derive(Debug)]
pub enum QueryError {
    /// The transport failed before a response could be classified.
    Transport(TransportError),
    /// The server reported a protocol error through the `RangeException`
    /// header despite a 200 status.
    RangeException { message: String, body: Vec<u8> },
    /// The server answered with a status that is neither 200 nor one of the
    /// method-negotiation statuses.
    Status { status: StatusCode, body: Vec<u8> },
    /// The caller's cancellation token or deadline fired.
    Cancelled,
}

impl QueryError {
    /// Best-effort snapshot of the response body. Empty for transport
    /// failures and cancellations.
    pub fn body(&self) -> &[u8] {
        match self {
            QueryError::RangeException { body, .. } | QueryError::Status { body, .. } => body,
            _ => &[],
        }
    }
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::Transport(cause) => write!(f, "{}", cause),
            QueryError::RangeException { message, .. } => {
                write!(f, "RangeException: {}", message)
            }
            QueryError::Status { status, .. } => write!(f, "{}", status),
            QueryError::Cancelled => write!(f, "query cancelled"),
        }
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueryError::Transport(cause) => Some(cause.as_ref()),
            _ => None,
        }
    }
}

/// Builds the retry predicate used when the caller supplies none: retry
/// transport-level timeouts and transient connection failures, and retry a
/// name-resolution failure only when another configured server might resolve
/// where this one did not. Protocol and status errors are never retried.
pub(crate) fn default_retry_predicate(server_count: usize) -> RetryPredicate {
    Arc::new(move |err: &QueryError| {
        let QueryError::Transport(cause) = err else {
            return false;
        };
        let Some(cause) = cause.downcast_ref::<reqwest::Error>() else {
            return false;
        };
        if cause.is_timeout() || is_transient(cause) {
            return true;
        }
        if cause.is_connect() && mentions_dns(cause) {
            // "no such host": another server in the pool may still resolve.
            return server_count > 1;
        }
        false
    })
}

/// Reports whether the error chain bottoms out in an I/O condition worth
/// retrying against the same server.
fn is_transient(err: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::TimedOut
            );
        }
        source = cause.source();
    }
    false
}

/// Reports whether the error chain includes a name-resolution failure.
/// reqwest exposes no structured discriminator for these, so this walks the
/// chain looking for the resolver's wording.
fn mentions_dns(err: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if cause.to_string().to_ascii_lowercase().contains("dns") {
            return true;
        }
        source = cause.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::EmptyServerList;
        assert!(err.to_string().contains("at least one server"));
    }

    #[test]
    fn range_exception_display_excludes_body() {
        let err = QueryError::RangeException {
            message: "boom".to_string(),
            body: b"diagnostic junk".to_vec(),
        };
        assert_eq!(err.to_string(), "RangeException: boom");
        assert!(!err.to_string().contains("junk"));
        assert_eq!(err.body(), b"diagnostic junk");
    }

    #[test]
    fn status_display_excludes_body() {
        let err = QueryError::Status {
            status: StatusCode::BAD_REQUEST,
            body: b"the server said no".to_vec(),
        };
        assert_eq!(err.to_string(), "400 Bad Request");
        assert!(!err.to_string().contains("server said no"));
        assert_eq!(err.body(), b"the server said no");
    }

    #[test]
    fn cancelled_display() {
        assert_eq!(QueryError::Cancelled.to_string(), "query cancelled");
    }

    #[test]
    fn transport_error_exposes_source() {
        let err = QueryError::Transport(Box::new(io::Error::other("wire fell out")));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.to_string(), "wire fell out");
        assert!(err.body().is_empty());
    }

    #[test]
    fn default_predicate_rejects_protocol_errors() {
        let predicate = default_retry_predicate(3);
        assert!(!predicate(&QueryError::RangeException {
            message: "boom".to_string(),
            body: Vec::new(),
        }));
        assert!(!predicate(&QueryError::Status {
            status: StatusCode::BAD_GATEWAY,
            body: Vec::new(),
        }));
        assert!(!predicate(&QueryError::Cancelled));
    }

    #[test]
    fn default_predicate_rejects_foreign_transport_errors() {
        // Only reqwest-produced failures are classified; a scripted mock
        // error carries no temporary/timeout signal.
        let predicate = default_retry_predicate(3);
        let err = QueryError::Transport(Box::new(io::Error::other("scripted failure")));
        assert!(!predicate(&err));
    }

    #[tokio::test]
    async fn default_predicate_retries_timeouts() {
        use std::io::Write as _;

        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/")
            .with_chunked_body(|writer| {
                std::thread::sleep(std::time::Duration::from_millis(500));
                writer.write_all(b"too late")
            })
            .create_async()
            .await;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(50))
            .build()
            .unwrap();
        let cause = client.get(server.url()).send().await.map(|_| ()).unwrap_err();
        assert!(cause.is_timeout());

        let err = QueryError::Transport(Box::new(cause));
        assert!(default_retry_predicate(1)(&err));
    }

    #[tokio::test]
    async fn default_predicate_rejects_connection_refused() {
        // Nothing listens on the discard port; refused connections are not
        // temporary and go back to the caller on a single-server pool and
        // multi-server pools alike.
        let cause = reqwest::get("http://127.0.0.1:9/range/list")
            .await
            .map(|_| ())
            .unwrap_err();
        let err = QueryError::Transport(Box::new(cause));
        assert!(!default_retry_predicate(1)(&err));
        assert!(!default_retry_predicate(3)(&err));
    }

    #[tokio::test]
    async fn default_predicate_retries_dns_failures_only_with_fallback_servers() {
        let cause = reqwest::get("http://rangeq-no-such-host.invalid/range/list")
            .await
            .map(|_| ())
            .unwrap_err();
        assert!(mentions_dns(&cause));

        let err = QueryError::Transport(Box::new(cause));
        assert!(!default_retry_predicate(1)(&err));
        assert!(default_retry_predicate(2)(&err));
    }
}
