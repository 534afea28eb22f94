//! Range client: query dispatch across a server pool with method
//! negotiation, retry, and cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, warn};
use reqwest::{Method, StatusCode};
use tokio_util::sync::CancellationToken;
use url::form_urlencoded;

use crate::config::{Config, RetryPredicate};
use crate::error::{ConfigError, QueryError, default_retry_predicate};
use crate::pool::ServerPool;
use crate::response::Response;
use crate::transport::{HttpTransport, RangeRequest, Transport};

/// GET queries whose URI would exceed this many characters go out as PUT
/// instead.
pub(crate) const QUERY_URI_LENGTH_THRESHOLD: usize = 4096;

/// Client that resolves range expressions against a pool of servers.
///
/// Cloning is cheap; clones share the rotation cursor, the transport, and
/// the statistics counters. A client holds no per-query state, so any
/// number of queries may run concurrently.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    servers: ServerPool,
    transport: Arc<dyn Transport>,
    retry_predicate: RetryPredicate,
    retry_count: usize,
    retry_pause: Duration,
    stats: StatsCounters,
}

impl Client {
    /// Creates a client from the provided configuration.
    ///
    /// ```no_run
    /// use rangeq::client::Client;
    /// use rangeq::config::Config;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let client = Client::new(Config {
    ///     servers: vec!["range1:80".to_string(), "range2:80".to_string()],
    ///     ..Config::default()
    /// })?;
    /// let hosts = client.query("%foo.example.1").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let servers = ServerPool::new(config.servers)?;
        let retry_predicate = config
            .retry_predicate
            .unwrap_or_else(|| default_retry_predicate(servers.len()));
        let transport = match config.transport {
            Some(transport) => transport,
            None => Arc::new(
                HttpTransport::with_defaults(build_user_agent(config.user_agent))
                    .map_err(ConfigError::Transport)?,
            ),
        };
        Ok(Self {
            inner: Arc::new(ClientInner {
                servers,
                transport,
                retry_predicate,
                retry_count: config.retry_count,
                retry_pause: config.retry_pause,
                stats: StatsCounters::default(),
            }),
        })
    }

    /// Resolves a query and splits the response into result lines.
    #[tracing::instrument(skip(self))]
    pub async fn query(&self, expression: &str) -> Result<Vec<String>, QueryError> {
        self.query_with_cancel(&CancellationToken::new(), expression)
            .await
    }

    /// Like [`Client::query`], returning as soon as `token` is cancelled.
    #[tracing::instrument(skip(self, token))]
    pub async fn query_with_cancel(
        &self,
        token: &CancellationToken,
        expression: &str,
    ) -> Result<Vec<String>, QueryError> {
        let raw = self.query_raw_with_cancel(token, expression).await?;
        Ok(Response::from_bytes(raw).lines())
    }

    /// Like [`Client::query`], abandoning the query after `timeout`.
    ///
    /// Note that the default transport applies its own overall deadline;
    /// the shorter of the two wins.
    #[tracing::instrument(skip(self))]
    pub async fn query_with_timeout(
        &self,
        timeout: Duration,
        expression: &str,
    ) -> Result<Vec<String>, QueryError> {
        let token = CancellationToken::new();
        let deadline = token.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            deadline.cancel();
        });
        let result = self.query_with_cancel(&token, expression).await;
        timer.abort();
        result
    }

    /// Resolves a query and returns the unsplit response payload.
    #[tracing::instrument(skip(self))]
    pub async fn query_raw(&self, expression: &str) -> Result<Vec<u8>, QueryError> {
        self.query_raw_with_cancel(&CancellationToken::new(), expression)
            .await
    }

    /// Like [`Client::query_raw`], returning as soon as `token` is
    /// cancelled.
    ///
    /// The retry loop runs on its own task and is raced against the token,
    /// so a cancelled caller gets its answer immediately even when an
    /// attempt is still in flight; that attempt finishes on the detached
    /// task and its result is discarded.
    #[tracing::instrument(skip(self, token))]
    pub async fn query_raw_with_cancel(
        &self,
        token: &CancellationToken,
        expression: &str,
    ) -> Result<Vec<u8>, QueryError> {
        let inner = Arc::clone(&self.inner);
        let task_token = token.clone();
        let expression = expression.to_owned();
        let attempts = tokio::spawn(async move { inner.run(&task_token, &expression).await });

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(QueryError::Cancelled),
            finished = attempts => finished
                .unwrap_or_else(|join_error| Err(QueryError::Transport(Box::new(join_error)))),
        };
        self.inner.stats.record(&result);
        result
    }

    /// Returns the counters accumulated since the previous snapshot and
    /// resets them.
    pub fn stats(&self) -> Stats {
        self.inner.stats.snapshot()
    }
}

impl ClientInner {
    /// Drives one logical query: rotate through the pool, apply the retry
    /// budget and predicate, and pause between attempts with the pause
    /// raced against cancellation.
    async fn run(&self, token: &CancellationToken, expression: &str) -> Result<Vec<u8>, QueryError> {
        let mut attempts = 0usize;
        loop {
            if attempts > 0 && !self.retry_pause.is_zero() {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(QueryError::Cancelled),
                    _ = tokio::time::sleep(self.retry_pause) => {}
                }
            }

            let server = self.servers.next();
            match self.attempt(token, expression, server).await {
                Ok(body) => return Ok(body),
                Err(QueryError::Cancelled) => return Err(QueryError::Cancelled),
                Err(err) => {
                    if attempts == self.retry_count || !(self.retry_predicate)(&err) {
                        return Err(err);
                    }
                    warn!(
                        "attempt {}/{} against {} failed ({}), retrying",
                        attempts + 1,
                        self.retry_count + 1,
                        server,
                        err
                    );
                    attempts += 1;
                }
            }
        }
    }

    /// Issues one logical attempt against one server, negotiating the HTTP
    /// method: GET for short queries, PUT for long ones, with at most one
    /// fallback when the server answers 414 or 405.
    async fn attempt(
        &self,
        token: &CancellationToken,
        expression: &str,
        server: &str,
    ) -> Result<Vec<u8>, QueryError> {
        let endpoint = format!("http://{}/range/list", server);
        let escaped: String = form_urlencoded::byte_serialize(expression.as_bytes()).collect();
        let uri = format!("{}?{}", endpoint, escaped);

        // Most servers accept GET; extremely long expressions go out as
        // PUT to stay under common URI limits.
        let mut method = if uri.len() > QUERY_URI_LENGTH_THRESHOLD {
            Method::PUT
        } else {
            Method::GET
        };
        let mut get_tried = false;
        let mut put_tried = false;

        loop {
            let request = if method == Method::GET {
                get_tried = true;
                RangeRequest {
                    method: Method::GET,
                    url: uri.clone(),
                    body: None,
                }
            } else {
                put_tried = true;
                RangeRequest {
                    method: Method::PUT,
                    url: endpoint.clone(),
                    body: Some(format!("query={}", escaped)),
                }
            };

            if token.is_cancelled() {
                return Err(QueryError::Cancelled);
            }
            let response = self
                .transport
                .send(request)
                .await
                .map_err(QueryError::Transport)?;

            if response.status == StatusCode::OK {
                if let Some(message) = response.range_exception {
                    return Err(QueryError::RangeException {
                        message,
                        body: response.body,
                    });
                }
                return Ok(response.body);
            }

            match response.status {
                StatusCode::URI_TOO_LONG if !put_tried => {
                    debug!("{} rejected the query URI as too long, retrying via PUT", server);
                    method = Method::PUT;
                }
                StatusCode::METHOD_NOT_ALLOWED if !get_tried => {
                    debug!("{} does not allow PUT queries, retrying via GET", server);
                    method = Method::GET;
                }
                status => {
                    return Err(QueryError::Status {
                        status,
                        body: response.body,
                    });
                }
            }
        }
    }
}

/// Identifies the calling program on every query so range server operators
/// can tell their traffic apart. Computed once at client construction.
fn build_user_agent(application: Option<String>) -> String {
    let application = application.unwrap_or_else(|| {
        std::env::current_exe()
            .ok()
            .and_then(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_owned())
    });
    let account = std::env::var("LOGNAME")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_else(|_| "UNKNOWN".to_owned());
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "UNKNOWN".to_owned());
    format!(
        "{} {}@{} via {}",
        application,
        account,
        hostname,
        env!("CARGO_PKG_NAME")
    )
}

#[derive(Default)]
struct StatsCounters {
    success: AtomicU64,
    cancelled: AtomicU64,
    range_exception: AtomicU64,
    status_not_ok: AtomicU64,
    unknown: AtomicU64,
}

impl StatsCounters {
    fn record(&self, result: &Result<Vec<u8>, QueryError>) {
        let counter = match result {
            Ok(_) => &self.success,
            Err(QueryError::Cancelled) => &self.cancelled,
            Err(QueryError::RangeException { .. }) => &self.range_exception,
            Err(QueryError::Status { .. }) => &self.status_not_ok,
            Err(QueryError::Transport(_)) => &self.unknown,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> Stats {
        Stats {
            success: self.success.swap(0, Ordering::Relaxed),
            cancelled: self.cancelled.swap(0, Ordering::Relaxed),
            range_exception: self.range_exception.swap(0, Ordering::Relaxed),
            status_not_ok: self.status_not_ok.swap(0, Ordering::Relaxed),
            unknown: self.unknown.swap(0, Ordering::Relaxed),
        }
    }
}

/// Query counters accumulated between [`Client::stats`] snapshots.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Stats {
    pub success: u64,
    pub cancelled: u64,
    pub range_exception: u64,
    pub status_not_ok: u64,
    pub unknown: u64,
}
