//! Pool of directory connections.
//!
//! A checkout hands out a [`PooledConnection`] guard; dropping the guard
//! returns the connection, so every exit path of the caller releases it.

use super::config::PoolConfig;
use super::connection::{DirectoryConnection, DirectoryError, DirectoryResult};
use log::trace;
use parking_lot::{Condvar, Mutex};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Instant;

type ConnectFn = dyn Fn() -> DirectoryResult<Box<dyn DirectoryConnection>> + Send + Sync;

struct PoolState {
    idle: Vec<Box<dyn DirectoryConnection>>,
    /// Connections in existence, idle or checked out
    open: usize,
}

struct PoolInner {
    connect: Box<ConnectFn>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    available: Condvar,
}

#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(
        config: PoolConfig,
        connect: impl Fn() -> DirectoryResult<Box<dyn DirectoryConnection>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connect: Box::new(connect),
                config,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    open: 0,
                }),
                available: Condvar::new(),
            }),
        }
    }

    /// Check out a connection, opening one if the pool has room and
    /// waiting up to the checkout timeout otherwise
    pub fn checkout(&self) -> DirectoryResult<PooledConnection> {
        let deadline = Instant::now() + self.inner.config.checkout_timeout();
        let mut state = self.inner.state.lock();
        loop {
            if let Some(conn) = state.idle.pop() {
                trace!("Checked out idle directory connection ({} open)", state.open);
                return Ok(self.guard(conn));
            }

            if state.open < self.inner.config.max_connections {
                state.open += 1;
                drop(state);
                // Gives the slot back if connecting fails or panics
                let mut slot = OpenSlot {
                    inner: &self.inner,
                    reserved: true,
                };
                let conn = (self.inner.connect)()?;
                slot.reserved = false;
                trace!("Opened new directory connection");
                return Ok(self.guard(conn));
            }

            if self
                .inner
                .available
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return Err(DirectoryError::PoolExhausted {
                    timeout_ms: self.inner.config.checkout_timeout_ms,
                });
            }
        }
    }

    fn guard(&self, conn: Box<dyn DirectoryConnection>) -> PooledConnection {
        PooledConnection {
            inner: Arc::clone(&self.inner),
            conn: Some(conn),
        }
    }

    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    pub fn open_count(&self) -> usize {
        self.inner.state.lock().open
    }
}

struct OpenSlot<'a> {
    inner: &'a PoolInner,
    reserved: bool,
}

impl Drop for OpenSlot<'_> {
    fn drop(&mut self) {
        if self.reserved {
            self.inner.state.lock().open -= 1;
            self.inner.available.notify_one();
        }
    }
}

/// Checked-out connection, returned to the pool on drop
pub struct PooledConnection {
    inner: Arc<PoolInner>,
    conn: Option<Box<dyn DirectoryConnection>>,
}

impl Deref for PooledConnection {
    type Target = dyn DirectoryConnection;

    fn deref(&self) -> &Self::Target {
        // Only taken in drop
        self.conn.as_deref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_deref_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let mut state = self.inner.state.lock();
        if conn.is_valid() {
            state.idle.push(conn);
        } else {
            // Broken connections are discarded and their slot freed
            state.open -= 1;
        }
        trace!("Released directory connection ({} idle)", state.idle.len());
        drop(state);
        self.inner.available.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::connection::{EntryStream, SearchRequest};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    struct StubConnection {
        valid: bool,
    }

    impl DirectoryConnection for StubConnection {
        fn search(&mut self, _request: &SearchRequest) -> DirectoryResult<EntryStream<'_>> {
            Ok(Box::new(std::iter::empty()))
        }

        fn is_valid(&self) -> bool {
            self.valid
        }
    }

    fn pool(max_connections: usize, timeout_ms: u64) -> (ConnectionPool, Arc<AtomicUsize>) {
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opened);
        let config = PoolConfig {
            max_connections,
            checkout_timeout_ms: timeout_ms,
        };
        let pool = ConnectionPool::new(config, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(StubConnection { valid: true }) as Box<dyn DirectoryConnection>)
        });
        (pool, opened)
    }

    #[test]
    fn test_connections_are_reused() -> DirectoryResult<()> {
        let (pool, opened) = pool(2, 100);
        {
            let _a = pool.checkout()?;
            assert_eq!(pool.idle_count(), 0);
        }
        assert_eq!(pool.idle_count(), 1);
        let _b = pool.checkout()?;
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn test_checkout_times_out_when_exhausted() -> DirectoryResult<()> {
        let (pool, _) = pool(1, 20);
        let _held = pool.checkout()?;
        assert_eq!(
            pool.checkout().err(),
            Some(DirectoryError::PoolExhausted { timeout_ms: 20 })
        );
        Ok(())
    }

    #[test]
    fn test_waiter_gets_released_connection() -> DirectoryResult<()> {
        let (pool, opened) = pool(1, 2000);
        let held = pool.checkout()?;
        thread::scope(|s| {
            let waiter = s.spawn(|| pool.checkout().map(|_| ()));
            thread::sleep(Duration::from_millis(20));
            drop(held);
            waiter.join().unwrap_or(Err(DirectoryError::Connection("panicked".into())))
        })?;
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn test_invalid_connections_are_discarded() -> DirectoryResult<()> {
        let pool = ConnectionPool::new(PoolConfig::default(), || {
            Ok(Box::new(StubConnection { valid: false }) as Box<dyn DirectoryConnection>)
        });
        drop(pool.checkout()?);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.open_count(), 0);
        Ok(())
    }

    #[test]
    fn test_failed_connect_frees_slot() {
        let pool = ConnectionPool::new(
            PoolConfig {
                max_connections: 1,
                checkout_timeout_ms: 10,
            },
            || Err(DirectoryError::Connection("refused".to_string())),
        );
        assert!(matches!(pool.checkout(), Err(DirectoryError::Connection(_))));
        assert!(matches!(pool.checkout(), Err(DirectoryError::Connection(_))));
        assert_eq!(pool.open_count(), 0);
    }

    #[test]
    fn test_panicking_connect_frees_slot() -> DirectoryResult<()> {
        let attempts = AtomicUsize::new(0);
        let pool = ConnectionPool::new(
            PoolConfig {
                max_connections: 1,
                checkout_timeout_ms: 10,
            },
            move || {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("connector bug");
                }
                Ok(Box::new(StubConnection { valid: true }) as Box<dyn DirectoryConnection>)
            },
        );
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| pool.checkout().map(|_| ())));
        assert!(outcome.is_err());
        assert_eq!(pool.open_count(), 0);

        let _conn = pool.checkout()?;
        assert_eq!(pool.open_count(), 1);
        Ok(())
    }
}
