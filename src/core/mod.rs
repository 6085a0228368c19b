//! Core module containing the main functionality of Signalgen
//!
//! This module provides:
//! - Channel layer with three wire transports (HTTP, register socket, hub)
//! - Connection guard with bounded exponential-backoff retry
//! - Register wire codec for the socket transport
//! - Asynchronous log pipeline with pluggable sinks
//! - Bounded per-component error history
//! - Running per-operation performance statistics
//! - Sample value type with register transforms

pub mod channel;
pub mod errors;
pub mod guard;
pub mod logging;
pub mod metrics;
pub mod sample;
pub mod wire;
