//! Channel layer: a uniform send/receive/monitor contract over three wire
//! transports
//!
//! Variants:
//! - Request/response over HTTP (stateless, retried per call)
//! - Persistent register socket (stateful, serialized through the guard)
//! - Push/subscribe hub (persistent bidirectional, server-initiated pushes)

mod push_hub;
mod request_response;
mod socket;

pub use push_hub::PushHubChannel;
pub use request_response::RequestResponseChannel;
pub use socket::SocketChannel;

use crate::core::errors::ErrorAggregator;
use crate::core::logging::LogPipeline;
use crate::core::metrics::PerformanceTracker;
use crate::core::sample::Sample;
use crate::core::wire::WireError;
use crate::config::ChannelConfig;
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Channel error taxonomy
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Unknown protocol tag or invalid configuration; never retried
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transport could not be established, or broke mid-exchange
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Exchange failed on an otherwise-connected transport
    #[error("Transmission failed: {0}")]
    Transmission(String),

    /// Operation exceeded its deadline
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// No live connection when one was required
    #[error("Not connected")]
    NotConnected,

    /// Remote replied with a 5xx-equivalent failure; retryable
    #[error("Server error: HTTP {0}")]
    ServerError(u16),

    /// Remote explicitly rejected the request; never retried
    #[error("Request rejected: HTTP {0}")]
    Rejected(u16),

    /// Malformed frame on the register socket
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    /// Underlying socket I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    /// True for transient failures the retry policy may re-attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout(_) | Self::ServerError(_) | Self::Io(_)
        )
    }
}

/// Closed set of supported wire protocols, resolved once at configuration
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolKind {
    /// Stateless HTTP request/response
    RequestResponse,
    /// Persistent register socket
    Socket,
    /// Persistent push/subscribe hub
    PushHub,
}

impl ProtocolKind {
    /// Canonical tag used in configuration and sample payloads.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::RequestResponse => "http",
            Self::Socket => "modbus",
            Self::PushHub => "signalr",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl FromStr for ProtocolKind {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" | "request-response" => Ok(Self::RequestResponse),
            "modbus" | "socket" => Ok(Self::Socket),
            "signalr" | "hub" | "push" => Ok(Self::PushHub),
            other => Err(ChannelError::Configuration(format!(
                "unsupported protocol tag: {other}"
            ))),
        }
    }
}

/// Uniform contract implemented by every channel variant.
#[async_trait]
pub trait ProtocolChannel: Send + Sync {
    /// Receive up to `count` samples. `count == 0` returns an empty vec
    /// without touching the transport.
    async fn receive_samples(&self, count: usize) -> Result<Vec<Sample>, ChannelError>;

    /// Send samples. An empty slice returns `Ok(false)` with no transport
    /// invocation; `Ok(true)` confirms delivery.
    async fn send_samples(&self, samples: &[Sample]) -> Result<bool, ChannelError>;

    /// Probe the remote side. `Ok(false)` means "asked, answer was negative";
    /// an error means the question could not be asked at all.
    async fn monitor_status(&self) -> Result<bool, ChannelError>;

    /// Protocol variant of this channel.
    fn protocol(&self) -> ProtocolKind;

    /// Human-readable endpoint description.
    fn endpoint(&self) -> String;
}

/// Shared observability handles wired into every channel.
#[derive(Clone)]
pub struct ChannelServices {
    /// Non-blocking log pipeline
    pub logs: Arc<LogPipeline>,
    /// Bounded error/event history
    pub errors: Arc<ErrorAggregator>,
    /// Running operation statistics
    pub metrics: Arc<PerformanceTracker>,
}

impl ChannelServices {
    /// Bundle the process-wide singletons.
    pub fn new(logs: Arc<LogPipeline>, errors: Arc<ErrorAggregator>, metrics: Arc<PerformanceTracker>) -> Self {
        Self { logs, errors, metrics }
    }

    /// Record a failure in both the aggregator and the log pipeline.
    pub(crate) fn report_failure(&self, component: &str, message: &str, error: &ChannelError) {
        self.errors.record_error(component, message, Some(&error.to_string()));
        self.logs.error_with(component, message, error);
    }
}

/// Maps a protocol tag plus address configuration to a concrete channel,
/// wiring in the shared observability services and a fresh connection guard.
pub struct ChannelFactory {
    services: ChannelServices,
}

impl ChannelFactory {
    /// Create a factory over the shared services.
    pub fn new(services: ChannelServices) -> Self {
        Self { services }
    }

    /// Build a channel for the given protocol tag.
    ///
    /// Unsupported tags fail fast with a configuration error, logged before
    /// returning.
    pub fn create(&self, tag: &str, config: ChannelConfig) -> Result<Arc<dyn ProtocolChannel>, ChannelError> {
        let kind = match tag.parse::<ProtocolKind>() {
            Ok(kind) => kind,
            Err(e) => {
                self.services
                    .logs
                    .error("factory", &format!("rejected channel request: {e}"));
                self.services
                    .errors
                    .record_error("factory", "unsupported protocol tag", Some(tag));
                return Err(e);
            }
        };
        self.create_kind(kind, config)
    }

    /// Build a channel from an already-resolved protocol kind.
    pub fn create_kind(
        &self,
        kind: ProtocolKind,
        config: ChannelConfig,
    ) -> Result<Arc<dyn ProtocolChannel>, ChannelError> {
        let channel: Arc<dyn ProtocolChannel> = match kind {
            ProtocolKind::RequestResponse => {
                Arc::new(RequestResponseChannel::new(config, self.services.clone())?)
            }
            ProtocolKind::Socket => Arc::new(SocketChannel::new(config, self.services.clone())),
            ProtocolKind::PushHub => Arc::new(PushHubChannel::new(config, self.services.clone())),
        };
        self.services.logs.info(
            "factory",
            &format!("created {} channel for {}", kind, channel.endpoint()),
        );
        Ok(channel)
    }
}
