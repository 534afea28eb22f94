//! Thread-safe round-robin rotation over a fixed pool of server addresses.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::ConfigError;

/// CAS rounds attempted before the selector stops insisting on strict
/// rotation order and takes whatever slot the counter hands back.
const MAX_CAS_ATTEMPTS: usize = 8;

/// Fixed list of server addresses with an atomic rotation cursor.
///
/// The list never changes after construction, so concurrent queries share
/// the pool without locking and only contend on the cursor.
#[derive(Debug)]
pub struct ServerPool {
    servers: Vec<String>,
    cursor: AtomicUsize,
}

impl ServerPool {
    /// Creates a pool from the configured addresses. At least one address
    /// is required.
    pub fn new(servers: Vec<String>) -> Result<Self, ConfigError> {
        if servers.is_empty() {
            return Err(ConfigError::EmptyServerList);
        }
        Ok(Self {
            servers,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Number of configured addresses.
    pub(crate) fn len(&self) -> usize {
        self.servers.len()
    }

    /// Returns the next address in rotation, starting from the first
    /// configured address.
    ///
    /// Under contention the selector may hand out slots slightly out of
    /// order rather than loop on the compare-and-swap indefinitely; every
    /// call still consumes exactly one slot, so no address is skipped
    /// farther than the number of concurrent callers.
    pub fn next(&self) -> &str {
        let mut current = self.cursor.load(Ordering::Relaxed);
        for _ in 0..MAX_CAS_ATTEMPTS {
            match self.cursor.compare_exchange_weak(
                current,
                current.wrapping_add(1),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(taken) => return &self.servers[taken % self.servers.len()],
                Err(observed) => current = observed,
            }
        }
        let taken = self.cursor.fetch_add(1, Ordering::Relaxed);
        &self.servers[taken % self.servers.len()]
    }
}
