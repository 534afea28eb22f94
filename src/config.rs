//! Client configuration and connection defaults.

use std::sync::Arc;
use std::time::Duration;

use crate::error::QueryError;
use crate::transport::Transport;

/// How long a query may stay in flight before the default transport
/// abandons it.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection-establishment timeout for the default transport.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP keep-alive interval for the default transport.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Idle connections the default transport keeps per server.
pub const DEFAULT_MAX_IDLE_PER_HOST: usize = 1;

/// Predicate deciding whether a failed attempt should be retried.
pub type RetryPredicate = Arc<dyn Fn(&QueryError) -> bool + Send + Sync>;

/// Options for constructing a [`Client`](crate::client::Client).
///
/// Only `servers` is required; every other field has a usable default.
#[derive(Default)]
pub struct Config {
    /// Range server addresses as "host:port" strings. Must not be empty.
    pub servers: Vec<String>,

    /// Transport used for every query. When absent, an HTTP transport is
    /// built with the default timeouts above.
    pub transport: Option<Arc<dyn Transport>>,

    /// Decides whether a failed attempt is retried. When absent, only
    /// transient transport failures are retried.
    pub retry_predicate: Option<RetryPredicate>,

    /// Retries issued after a failed query. Zero never retries.
    pub retry_count: usize,

    /// Pause between retries. Zero retries immediately.
    pub retry_pause: Duration,

    /// Replaces the leading application token of the User-Agent header
    /// sent by the default transport.
    pub user_agent: Option<String>,
}
