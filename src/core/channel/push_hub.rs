//! Push/subscribe hub channel
//!
//! Persistent bidirectional link where the remote hub pushes sample batches
//! and answers correlated status invocations. Frames are line-delimited JSON
//! envelopes named after the hub method they carry. A dedicated reader task
//! owns the inbound half; outbound writes go through the connection guard.
//!
//! Only one batch waiter exists at a time: a new receive call replaces any
//! waiter still pending, and every wait is bounded by the configured timeout.

use super::{ChannelError, ChannelServices, ProtocolChannel, ProtocolKind};
use crate::config::ChannelConfig;
use crate::core::guard::ConnectionGuard;
use crate::core::logging::LogPipeline;
use crate::core::sample::Sample;
use async_trait::async_trait;
use futures::{FutureExt, SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

const COMPONENT: &str = "hub-channel";

/// Upper bound on one hub frame; caps the read buffer against a remote that
/// never sends a newline.
const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Hub method envelope, one JSON object per line.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "method", content = "args", rename_all = "PascalCase")]
enum HubFrame {
    /// Client asks the hub to push `count` samples
    RequestSignals { count: usize },
    /// Client delivers a batch to the hub
    SendSignals { samples: Vec<Sample> },
    /// Client asks for the hub status, correlated by `id`
    CheckStatus { id: u64 },
    /// Hub pushes a batch of samples
    ReceiveSignals { samples: Vec<Sample> },
    /// Hub answers a status invocation
    StatusResult { id: u64, value: bool },
}

/// Inbound dispatch state shared between the reader task and callers.
struct HubShared {
    batch_waiter: Mutex<Option<oneshot::Sender<Vec<Sample>>>>,
    pending_batch: Mutex<Option<Vec<Sample>>>,
    status_waiters: Mutex<HashMap<u64, oneshot::Sender<bool>>>,
}

impl HubShared {
    fn new() -> Self {
        Self {
            batch_waiter: Mutex::new(None),
            pending_batch: Mutex::new(None),
            status_waiters: Mutex::new(HashMap::new()),
        }
    }

    /// Install a fresh batch waiter, superseding any waiter still pending.
    fn install_waiter(&self) -> oneshot::Receiver<Vec<Sample>> {
        let (tx, rx) = oneshot::channel();
        *self.batch_waiter.lock() = Some(tx);
        rx
    }

    /// Hand a pushed batch to the current waiter, or buffer it (latest wins)
    /// when nobody is waiting.
    fn deliver_batch(&self, samples: Vec<Sample>) {
        if let Some(waiter) = self.batch_waiter.lock().take() {
            if let Err(samples) = waiter.send(samples) {
                *self.pending_batch.lock() = Some(samples);
            }
        } else {
            *self.pending_batch.lock() = Some(samples);
        }
    }

    fn take_pending(&self) -> Option<Vec<Sample>> {
        self.pending_batch.lock().take()
    }

    fn register_status(&self, id: u64) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        self.status_waiters.lock().insert(id, tx);
        rx
    }

    fn deliver_status(&self, id: u64, value: bool) {
        if let Some(waiter) = self.status_waiters.lock().remove(&id) {
            let _ = waiter.send(value);
        }
    }

    fn forget_status(&self, id: u64) {
        self.status_waiters.lock().remove(&id);
    }
}

/// Live hub link: the outbound frame sink plus its reader task.
struct HubLink {
    sink: FramedWrite<OwnedWriteHalf, LinesCodec>,
    reader: JoinHandle<()>,
}

impl Drop for HubLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Hub channel over a reused bidirectional connection.
pub struct PushHubChannel {
    config: ChannelConfig,
    guard: ConnectionGuard<HubLink>,
    shared: Arc<HubShared>,
    next_id: AtomicU64,
    services: ChannelServices,
}

impl PushHubChannel {
    /// Create the channel; the hub link is opened lazily on first use.
    pub fn new(config: ChannelConfig, services: ChannelServices) -> Self {
        let guard = ConnectionGuard::new(
            COMPONENT,
            config.retry_policy(),
            services.errors.clone(),
            services.logs.clone(),
        );
        Self {
            config,
            guard,
            shared: Arc::new(HubShared::new()),
            next_id: AtomicU64::new(1),
            services,
        }
    }

    async fn open(
        authority: String,
        timeout: Duration,
        shared: Arc<HubShared>,
        logs: Arc<LogPipeline>,
    ) -> Result<HubLink, ChannelError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&authority))
            .await
            .map_err(|_| ChannelError::Timeout(timeout.as_millis() as u64))?
            .map_err(|e| ChannelError::Connection(e.to_string()))?;
        stream.set_nodelay(true)?;

        let (read, write) = stream.into_split();
        let reader = tokio::spawn(Self::run_reader(read, shared, logs));
        Ok(HubLink {
            sink: FramedWrite::new(write, LinesCodec::new_with_max_length(MAX_FRAME_LEN)),
            reader,
        })
    }

    /// Drains inbound frames until the connection closes, dispatching pushes
    /// and status answers to whoever is waiting.
    async fn run_reader(read: OwnedReadHalf, shared: Arc<HubShared>, logs: Arc<LogPipeline>) {
        let mut frames = FramedRead::new(read, LinesCodec::new_with_max_length(MAX_FRAME_LEN));
        while let Some(line) = frames.next().await {
            let Ok(line) = line else {
                break;
            };
            match serde_json::from_str::<HubFrame>(&line) {
                Ok(HubFrame::ReceiveSignals { samples }) => shared.deliver_batch(samples),
                Ok(HubFrame::StatusResult { id, value }) => shared.deliver_status(id, value),
                Ok(_) => logs.warning(COMPONENT, "ignoring client-to-hub frame from remote"),
                Err(e) => logs.warning(COMPONENT, &format!("malformed hub frame: {e}")),
            }
        }
        logs.info(COMPONENT, "hub stream closed");
    }

    /// Send one outbound frame on the guarded link.
    async fn transmit(&self, frame: &HubFrame) -> Result<(), ChannelError> {
        let line = serde_json::to_string(frame)
            .map_err(|e| ChannelError::Transmission(format!("encode hub frame: {e}")))?;
        let authority = self.config.authority();
        let timeout = self.config.timeout();
        let shared = self.shared.clone();
        let logs = self.services.logs.clone();

        self.guard
            .with_connection(
                move |_attempt| Self::open(authority.clone(), timeout, shared.clone(), logs.clone()),
                |link: &mut HubLink| {
                    async move {
                        link.sink
                            .send(line)
                            .await
                            .map_err(|e| ChannelError::Transmission(e.to_string()))
                    }
                    .boxed()
                },
            )
            .await
    }

    /// One correlated status invocation, bounded by the configured timeout.
    async fn check_status_once(&self) -> Result<bool, ChannelError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = self.shared.register_status(id);

        if let Err(e) = self.transmit(&HubFrame::CheckStatus { id }).await {
            self.shared.forget_status(id);
            return Err(e);
        }

        match tokio::time::timeout(self.config.timeout(), rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => {
                self.shared.forget_status(id);
                Err(ChannelError::Transmission("hub link closed before the answer".into()))
            }
            Err(_) => {
                self.shared.forget_status(id);
                Err(ChannelError::Timeout(self.config.timeout_ms))
            }
        }
    }

    fn surface<T>(&self, message: &str, e: ChannelError) -> Result<T, ChannelError> {
        self.services.report_failure(COMPONENT, message, &e);
        Err(e)
    }
}

#[async_trait]
impl ProtocolChannel for PushHubChannel {
    async fn receive_samples(&self, count: usize) -> Result<Vec<Sample>, ChannelError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let start = Instant::now();

        // A batch pushed before anyone asked satisfies the call directly,
        // but only when it covers the requested count; a short stale batch
        // is discarded in favor of a fresh request.
        if let Some(mut samples) = self.shared.take_pending() {
            if samples.len() >= count {
                samples.truncate(count);
                self.services.metrics.record_elapsed("hub_receive", start);
                return Ok(samples);
            }
        }

        let rx = self.shared.install_waiter();
        if let Err(e) = self.transmit(&HubFrame::RequestSignals { count }).await {
            return self.surface("receive_samples failed", e);
        }

        match tokio::time::timeout(self.config.timeout(), rx).await {
            Ok(Ok(mut samples)) => {
                samples.truncate(count);
                self.services.metrics.record_elapsed("hub_receive", start);
                self.services
                    .logs
                    .info(COMPONENT, &format!("hub pushed {} samples", samples.len()));
                Ok(samples)
            }
            Ok(Err(_)) => self.surface(
                "receive_samples failed",
                ChannelError::Transmission("wait superseded by a newer receive".into()),
            ),
            Err(_) => self.surface(
                "receive_samples failed",
                ChannelError::Timeout(self.config.timeout_ms),
            ),
        }
    }

    async fn send_samples(&self, samples: &[Sample]) -> Result<bool, ChannelError> {
        if samples.is_empty() {
            self.services.logs.warning(COMPONENT, "no samples to send");
            return Ok(false);
        }
        let start = Instant::now();

        let frame = HubFrame::SendSignals {
            samples: samples.to_vec(),
        };
        match self.transmit(&frame).await {
            Ok(()) => {
                self.services.metrics.record_elapsed("hub_send", start);
                self.services
                    .logs
                    .info(COMPONENT, &format!("sent {} samples to hub", samples.len()));
                Ok(true)
            }
            Err(e) => self.surface("send_samples failed", e),
        }
    }

    async fn monitor_status(&self) -> Result<bool, ChannelError> {
        let start = Instant::now();

        // Unanswered probes are retried with a fresh correlation id.
        let result = self
            .config
            .retry_policy()
            .run(|_attempt| self.check_status_once())
            .await;

        match result {
            Ok(value) => {
                self.services.metrics.record_elapsed("hub_status", start);
                Ok(value)
            }
            Err(e) => self.surface("monitor_status failed", e),
        }
    }

    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::PushHub
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.config.authority(), self.config.path)
    }
}
