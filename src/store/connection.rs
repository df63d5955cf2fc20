//! Lazily established, shared connection handle.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::OnceCell;

/// A connection created on first use and reused afterwards.
///
/// Concurrent first callers are single-flighted: exactly one of them runs the
/// connect future while the others wait for its result. A failed attempt
/// leaves the slot empty so a later call can try again.
#[derive(Debug)]
pub struct LazyConnection<C> {
    cell: OnceCell<C>,
    attempts: AtomicUsize,
}

impl<C: Clone> LazyConnection<C> {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Return the shared connection, running `connect` if none exists yet.
    pub async fn get_or_connect<F, Fut, E>(&self, connect: F) -> Result<C, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<C, E>>,
    {
        let conn = self
            .cell
            .get_or_try_init(|| {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                connect()
            })
            .await?;
        Ok(conn.clone())
    }

    /// Whether a connection has been established.
    pub fn is_connected(&self) -> bool {
        self.cell.initialized()
    }

    /// Number of times a connect future has been started.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl<C: Clone> Default for LazyConnection<C> {
    fn default() -> Self {
        Self::new()
    }
}
