//! Bounded TCP connection pool for a single target.
//!
//! A [`TargetPool`] owns up to `max_total` concurrently checked-out
//! connections to one backend address. Borrowed connections are handed out
//! as [`PooledConnection`] guards that return their stream to the idle list
//! on drop. Idle streams from a restarted backend are detected and redialed
//! transparently on the next borrow.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Errors surfaced to borrow callers. These are recoverable: the broker runs
/// its recovery path and one retry before propagating them.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("no pool registered for target \"{0}\" and no \"default\" pool available")]
    NoPool(String),

    #[error("pool \"{name}\" exhausted: no connection freed within {waited_ms} ms")]
    Exhausted { name: String, waited_ms: u64 },

    #[error("failed to connect to target \"{name}\" at {addr}: {source}")]
    Connect {
        name: String,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Resolved sizing for one pool, produced by the factory from raw
/// configuration values.
#[derive(Debug, Clone, Copy)]
pub struct PoolSizing {
    /// Maximum connections checked out concurrently.
    pub max_total: u32,

    /// Maximum idle connections kept for reuse.
    pub max_idle: u32,

    /// How long a borrow waits for a free connection.
    pub max_wait: Duration,

    /// Dial timeout for fresh connections. Fixed per process, not
    /// configurable per target.
    pub connect_timeout: Duration,
}

/// Counters for one pool, snapshot via [`TargetPool::stats`].
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Connections dialed.
    pub created: u64,

    /// Borrows served from the idle list.
    pub reused: u64,

    /// Idle connections discarded as stale.
    pub discarded: u64,

    /// Connections currently checked out.
    pub in_flight: u32,

    /// Connections currently idle.
    pub idle: u32,
}

struct IdleConn {
    stream: TcpStream,
    since: Instant,
}

/// A bounded pool of TCP connections to one backend address.
///
/// Thread-safe; shared behind `Arc`. Replaced wholesale by the broker's
/// recovery path, never mutated in place: an abandoned pool drains as its
/// outstanding [`PooledConnection`] guards drop.
pub struct TargetPool {
    name: String,
    addr: SocketAddr,
    sizing: PoolSizing,
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<IdleConn>>,
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
}

impl TargetPool {
    pub fn new(name: impl Into<String>, addr: SocketAddr, sizing: PoolSizing) -> Self {
        Self {
            name: name.into(),
            addr,
            sizing,
            semaphore: Arc::new(Semaphore::new(sizing.max_total as usize)),
            idle: Mutex::new(Vec::new()),
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Target name this pool was built for.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend address this pool dials.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Borrow one connection.
    ///
    /// Waits up to `max_wait` for a free slot when `max_total` connections
    /// are already checked out; this wait is the pool's only backpressure.
    /// A stale idle stream (remote closed, or unsolicited data pending) is
    /// discarded and a fresh connection dialed in its place.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection, ConnectionError> {
        let semaphore = Arc::clone(&self.semaphore);
        let permit = match tokio::time::timeout(self.sizing.max_wait, semaphore.acquire_owned())
            .await
        {
            Ok(Ok(permit)) => permit,
            // The semaphore is never closed; a closed error counts as
            // exhaustion.
            Ok(Err(_)) | Err(_) => {
                return Err(ConnectionError::Exhausted {
                    name: self.name.clone(),
                    waited_ms: self.sizing.max_wait.as_millis() as u64,
                })
            }
        };

        while let Some(idle) = self.idle_list().pop() {
            if stream_is_live(&idle.stream) {
                self.reused.fetch_add(1, Ordering::Relaxed);
                debug!(
                    target_name = %self.name,
                    idle_secs = idle.since.elapsed().as_secs(),
                    "reusing idle connection"
                );
                return Ok(PooledConnection::new(Arc::clone(self), idle.stream, permit));
            }
            self.discarded.fetch_add(1, Ordering::Relaxed);
            debug!(target_name = %self.name, "discarding stale idle connection");
        }

        let stream = self.dial().await?;
        self.created.fetch_add(1, Ordering::Relaxed);
        debug!(target_name = %self.name, addr = %self.addr, "dialed new connection");
        Ok(PooledConnection::new(Arc::clone(self), stream, permit))
    }

    async fn dial(&self) -> Result<TcpStream, ConnectionError> {
        match tokio::time::timeout(self.sizing.connect_timeout, TcpStream::connect(self.addr))
            .await
        {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(ConnectionError::Connect {
                name: self.name.clone(),
                addr: self.addr,
                source,
            }),
            Err(_) => Err(ConnectionError::Connect {
                name: self.name.clone(),
                addr: self.addr,
                source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
            }),
        }
    }

    /// Return a stream to the idle list, dropping it when the list is full.
    fn release(&self, stream: TcpStream) {
        let mut idle = self.idle_list();
        if (idle.len() as u32) < self.sizing.max_idle {
            idle.push(IdleConn {
                stream,
                since: Instant::now(),
            });
        }
    }

    /// Point-in-time counters for this pool.
    pub fn stats(&self) -> PoolStats {
        let idle = self.idle_list().len() as u32;
        let available = self.semaphore.available_permits() as u32;
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            in_flight: self.sizing.max_total.saturating_sub(available),
            idle,
        }
    }

    fn idle_list(&self) -> MutexGuard<'_, Vec<IdleConn>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for TargetPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetPool")
            .field("name", &self.name)
            .field("addr", &self.addr)
            .field("sizing", &self.sizing)
            .finish_non_exhaustive()
    }
}

/// Reusability check for an idle stream without blocking: a clean remote
/// close reads as EOF, and a stream with unsolicited buffered data is not
/// safe to hand to the next borrower either.
fn stream_is_live(stream: &TcpStream) -> bool {
    let mut probe = [0u8; 1];
    match stream.try_read(&mut probe) {
        Ok(0) => false,
        Ok(_) => false,
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => true,
        Err(_) => false,
    }
}

/// A borrowed connection. Holds one of its pool's `max_total` slots for its
/// whole lifetime and returns the stream to the idle list on drop.
pub struct PooledConnection {
    stream: Option<TcpStream>,
    pool: Arc<TargetPool>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn new(pool: Arc<TargetPool>, stream: TcpStream, permit: OwnedSemaphorePermit) -> Self {
        Self {
            stream: Some(stream),
            pool,
            _permit: permit,
        }
    }

    /// Name of the target this connection belongs to.
    pub fn target(&self) -> &str {
        self.pool.name()
    }

    /// Address of the backend this connection is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.pool.addr()
    }

    /// The underlying TCP stream.
    pub fn stream(&mut self) -> &mut TcpStream {
        // The stream is only taken in Drop.
        self.stream.as_mut().expect("stream present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.pool.release(stream);
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("target", &self.pool.name())
            .field("addr", &self.pool.addr())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn sizing(max_total: u32, max_idle: u32, max_wait_ms: u64) -> PoolSizing {
        PoolSizing {
            max_total,
            max_idle,
            max_wait: Duration::from_millis(max_wait_ms),
            connect_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_borrow_and_return_reuses_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let pool = Arc::new(TargetPool::new("default", addr, sizing(4, 2, 200)));

        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.addr(), addr);
        assert_eq!(conn.target(), "default");
        drop(conn);

        let _again = pool.acquire().await.unwrap();
        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.in_flight, 1);

        server.abort();
    }

    #[tokio::test]
    async fn test_exhausted_pool_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let pool = Arc::new(TargetPool::new("default", addr, sizing(1, 1, 100)));
        let held = pool.acquire().await.unwrap();

        let start = Instant::now();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Exhausted { .. }));
        assert!(start.elapsed() >= Duration::from_millis(100));

        // Releasing the held connection frees the slot.
        drop(held);
        assert!(pool.acquire().await.is_ok());

        server.abort();
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        // Bind then drop to get an address nothing is listening on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let pool = Arc::new(TargetPool::new("default", addr, sizing(1, 1, 100)));
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Connect { .. }));
    }
}
