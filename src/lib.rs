//! # Signalgen Core Library
//!
//! A resilient multi-protocol signal exchange library with support for:
//! - Stateless HTTP request/response endpoints
//! - Persistent register sockets (Modbus-style framing)
//! - Push/subscribe hubs with server-initiated batches
//!
//! ## Features
//!
//! - Uniform send/receive/monitor contract across all transports
//! - Connect-once-and-reuse discipline with serialized transport access
//! - Bounded exponential-backoff retry for transient failures
//! - Non-blocking log pipeline with console and rotating-file sinks
//! - Capped per-component error history
//! - Running per-operation performance statistics
//!
//! ## Example
//!
//! ```rust,no_run
//! use signalgen_core::{ChannelConfig, ChannelFactory, ChannelServices};
//! use signalgen_core::{ErrorAggregator, LogPipeline, PerformanceTracker};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let services = ChannelServices::new(
//!         Arc::new(LogPipeline::new(Vec::new())),
//!         Arc::new(ErrorAggregator::new()),
//!         Arc::new(PerformanceTracker::new()),
//!     );
//!     let factory = ChannelFactory::new(services);
//!
//!     let channel = factory.create("http", ChannelConfig::new("127.0.0.1", 5001))?;
//!     let samples = channel.receive_samples(10).await?;
//!     println!("received {} samples", samples.len());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::config::{ChannelConfig, ChannelProfile, ProfileFile};
pub use crate::core::channel::{
    ChannelError, ChannelFactory, ChannelServices, ProtocolChannel, ProtocolKind,
    PushHubChannel, RequestResponseChannel, SocketChannel,
};
pub use crate::core::errors::{ErrorAggregator, ErrorEvent, SystemStatus};
pub use crate::core::guard::{ConnectionGuard, ConnectionState, RetryPolicy};
pub use crate::core::logging::{
    ConsoleSink, LogLevel, LogPipeline, LogRecord, LogSink, RotatingFileSink, SinkError,
};
pub use crate::core::metrics::{MetricAggregate, PerformanceTracker};
pub use crate::core::sample::Sample;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
