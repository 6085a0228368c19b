//! Connection lifecycle guard
//!
//! Owns the connect-once-and-reuse discipline for stateful channels: at most
//! one connect attempt is in flight per channel, every transport operation is
//! serialized through the same lock, and failed connects run a bounded
//! exponential-backoff retry loop. There is no terminal state; after an
//! exhausted retry cycle the next operation starts a fresh one.

use crate::core::channel::ChannelError;
use crate::core::errors::ErrorAggregator;
use crate::core::logging::LogPipeline;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Observable connection state of a stateful channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live transport handle
    Disconnected,
    /// A connect cycle is in flight
    Connecting,
    /// Transport handle is live and reusable
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Retry parameters shared by the guard and the stateless channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts before surfacing the failure
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `base * 2^n` before the next try
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with explicit parameters.
    pub fn new(max_retries: u32, backoff_base: Duration) -> Self {
        Self {
            max_retries,
            backoff_base,
        }
    }

    /// Backoff delay inserted after failed attempt `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(attempt)
    }

    /// Run `op` up to `max_retries` times with exponential backoff.
    ///
    /// Non-retryable errors surface immediately. A policy with
    /// `max_retries == 0` still makes a single attempt.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, ChannelError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ChannelError>>,
    {
        let total = self.max_retries.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt + 1).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt >= total {
                        return Err(e);
                    }
                    tokio::time::sleep(self.delay_for(attempt - 1)).await;
                }
            }
        }
    }
}

/// Per-channel lifecycle controller for a stateful transport handle `T`.
///
/// A single async mutex provides both the "one connect in flight" guarantee
/// and the exclusive-access region: callers that arrive while another is
/// connecting or operating simply wait their turn.
pub struct ConnectionGuard<T> {
    conn: Mutex<Option<T>>,
    state: RwLock<ConnectionState>,
    policy: RetryPolicy,
    component: String,
    errors: Arc<ErrorAggregator>,
    logs: Arc<LogPipeline>,
}

impl<T: Send> ConnectionGuard<T> {
    /// Create a guard for the named component.
    pub fn new(
        component: &str,
        policy: RetryPolicy,
        errors: Arc<ErrorAggregator>,
        logs: Arc<LogPipeline>,
    ) -> Self {
        Self {
            conn: Mutex::new(None),
            state: RwLock::new(ConnectionState::Disconnected),
            policy,
            component: component.to_string(),
            errors,
            logs,
        }
    }

    /// Current observable state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Ensure a live connection, then run `op` with exclusive access to it.
    ///
    /// `connect` is invoked (with the 1-based attempt number) only when no
    /// live handle exists. If `op` fails, the handle is dropped so the next
    /// call reconnects; the error surfaces unchanged.
    pub async fn with_connection<R, C, CFut, Op>(&self, connect: C, op: Op) -> Result<R, ChannelError>
    where
        C: Fn(u32) -> CFut,
        CFut: Future<Output = Result<T, ChannelError>>,
        Op: for<'c> FnOnce(&'c mut T) -> BoxFuture<'c, Result<R, ChannelError>>,
    {
        let mut slot = self.conn.lock().await;

        if slot.is_none() {
            *self.state.write() = ConnectionState::Connecting;
            match self.policy.run(&connect).await {
                Ok(conn) => {
                    *slot = Some(conn);
                    *self.state.write() = ConnectionState::Connected;
                    self.logs.info(&self.component, "connection established");
                }
                Err(e) => {
                    *self.state.write() = ConnectionState::Disconnected;
                    let surfaced = match e {
                        ChannelError::Configuration(_) => e,
                        other => ChannelError::Connection(format!(
                            "exhausted {} connect attempt(s): {other}",
                            self.policy.max_retries.max(1)
                        )),
                    };
                    self.errors.record_error(
                        &self.component,
                        "failed to establish connection",
                        Some(&surfaced.to_string()),
                    );
                    self.logs
                        .error_with(&self.component, "failed to establish connection", &surfaced);
                    return Err(surfaced);
                }
            }
        }

        let Some(conn) = slot.as_mut() else {
            return Err(ChannelError::NotConnected);
        };

        match op(conn).await {
            Ok(value) => Ok(value),
            Err(e) => {
                // The handle may be mid-exchange; drop it so the next call
                // starts from a clean connect.
                *slot = None;
                *self.state.write() = ConnectionState::Disconnected;
                self.errors
                    .record_error(&self.component, "operation failed, connection dropped", Some(&e.to_string()));
                Err(e)
            }
        }
    }

    /// Idempotent connect: no-op when already connected, otherwise runs the
    /// bounded retry loop. Concurrent callers wait for the cycle in flight.
    pub async fn ensure_connected<C, CFut>(&self, connect: C) -> Result<(), ChannelError>
    where
        C: Fn(u32) -> CFut,
        CFut: Future<Output = Result<T, ChannelError>>,
    {
        self.with_connection(connect, |_conn: &mut T| async { Ok(()) }.boxed()).await
    }

    /// Drop the current handle, if any, and return it to the caller.
    pub async fn disconnect(&self) -> Option<T> {
        let mut slot = self.conn.lock().await;
        *self.state.write() = ConnectionState::Disconnected;
        slot.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tokio::time::Instant;

    fn guard(policy: RetryPolicy) -> ConnectionGuard<u32> {
        ConnectionGuard::new(
            "test",
            policy,
            Arc::new(ErrorAggregator::new()),
            Arc::new(LogPipeline::new(Vec::new())),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_k_failures() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100));
        let attempts = AtomicU32::new(0);
        let start = Instant::now();

        let result = policy
            .run(|_attempt| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ChannelError::Timeout(100))
                    } else {
                        Ok(42u32)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // Exactly two backoff delays: 100ms then 200ms.
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_after_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let attempts = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<u32, _> = policy
            .run(|_attempt| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(ChannelError::Timeout(100)) }
            })
            .await;

        assert!(matches!(result, Err(ChannelError::Timeout(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // Two sleeps between three attempts.
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_fast() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        let attempts = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<u32, _> = policy
            .run(|_attempt| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(ChannelError::Configuration("bad tag".into())) }
            })
            .await;

        assert!(matches!(result, Err(ChannelError::Configuration(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(5, Duration::from_millis(250));
        assert_eq!(policy.delay_for(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_connect_once_and_reuse() {
        let guard = guard(RetryPolicy::new(1, Duration::from_millis(1)));
        let connects = Arc::new(AtomicU32::new(0));

        for _ in 0..5 {
            let connects = connects.clone();
            let value = guard
                .with_connection(
                    move |_attempt| {
                        connects.fetch_add(1, Ordering::SeqCst);
                        async { Ok(7u32) }
                    },
                    |conn: &mut u32| async move { Ok(*conn) }.boxed(),
                )
                .await
                .unwrap();
            assert_eq!(value, 7);
        }

        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(guard.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_exhausted_connect_is_not_sticky() {
        let guard = guard(RetryPolicy::new(2, Duration::from_millis(1)));
        let healthy = Arc::new(AtomicBool::new(false));

        let h = healthy.clone();
        let result = guard
            .ensure_connected(move |_attempt| {
                let h = h.clone();
                async move {
                    if h.load(Ordering::SeqCst) {
                        Ok(1u32)
                    } else {
                        Err(ChannelError::Connection("refused".into()))
                    }
                }
            })
            .await;
        assert!(matches!(result, Err(ChannelError::Connection(_))));
        assert_eq!(guard.state(), ConnectionState::Disconnected);

        // The transport comes back; the next cycle succeeds.
        healthy.store(true, Ordering::SeqCst);
        let h = healthy.clone();
        guard
            .ensure_connected(move |_attempt| {
                let h = h.clone();
                async move {
                    if h.load(Ordering::SeqCst) {
                        Ok(1u32)
                    } else {
                        Err(ChannelError::Connection("refused".into()))
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(guard.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_failed_operation_drops_connection() {
        let guard = guard(RetryPolicy::new(1, Duration::from_millis(1)));
        let connects = Arc::new(AtomicU32::new(0));

        let c = connects.clone();
        let result: Result<(), _> = guard
            .with_connection(
                move |_attempt| {
                    c.fetch_add(1, Ordering::SeqCst);
                    async { Ok(0u32) }
                },
                |_conn: &mut u32| async { Err(ChannelError::Transmission("broken pipe".into())) }.boxed(),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(guard.state(), ConnectionState::Disconnected);

        let c = connects.clone();
        guard
            .with_connection(
                move |_attempt| {
                    c.fetch_add(1, Ordering::SeqCst);
                    async { Ok(0u32) }
                },
                |_conn: &mut u32| async { Ok(()) }.boxed(),
            )
            .await
            .unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_operations_never_overlap() {
        struct Probe {
            in_flight: Arc<AtomicBool>,
            overlaps: Arc<AtomicU32>,
        }

        let in_flight = Arc::new(AtomicBool::new(false));
        let overlaps = Arc::new(AtomicU32::new(0));
        let guard = Arc::new(ConnectionGuard::<Probe>::new(
            "test",
            RetryPolicy::new(1, Duration::from_millis(1)),
            Arc::new(ErrorAggregator::new()),
            Arc::new(LogPipeline::new(Vec::new())),
        ));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let guard = guard.clone();
            let in_flight = in_flight.clone();
            let overlaps = overlaps.clone();
            handles.push(tokio::spawn(async move {
                guard
                    .with_connection(
                        move |_attempt| {
                            let in_flight = in_flight.clone();
                            let overlaps = overlaps.clone();
                            async move {
                                Ok(Probe {
                                    in_flight,
                                    overlaps,
                                })
                            }
                        },
                        |probe: &mut Probe| {
                            async move {
                                if probe.in_flight.swap(true, Ordering::SeqCst) {
                                    probe.overlaps.fetch_add(1, Ordering::SeqCst);
                                }
                                tokio::time::sleep(Duration::from_millis(1)).await;
                                probe.in_flight.store(false, Ordering::SeqCst);
                                Ok(())
                            }
                            .boxed()
                        },
                    )
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }
}
