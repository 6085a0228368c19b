//! Persistent register-socket channel
//!
//! Holds one TCP connection open across calls and funnels every exchange
//! through the connection guard, because the stream is not safe for
//! concurrent use. Raw register values map to samples with the fixed
//! frequency/power transform.

use super::{ChannelError, ChannelServices, ProtocolChannel, ProtocolKind};
use crate::config::ChannelConfig;
use crate::core::guard::ConnectionGuard;
use crate::core::sample::Sample;
use crate::core::wire::{self, WireResponse};
use crate::core::wire::HEADER_LEN;
use async_trait::async_trait;
use futures::FutureExt;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const COMPONENT: &str = "socket-channel";

/// Stateful register channel over a reused TCP stream.
pub struct SocketChannel {
    config: ChannelConfig,
    guard: ConnectionGuard<TcpStream>,
    txn: AtomicU16,
    services: ChannelServices,
}

impl SocketChannel {
    /// Create the channel; no connection is opened until the first call.
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
            txn: AtomicU16::new(1),
            services,
        }
    }

    async fn open(authority: String, timeout: Duration) -> Result<TcpStream, ChannelError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&authority))
            .await
            .map_err(|_| ChannelError::Timeout(timeout.as_millis() as u64))?
            .map_err(|e| ChannelError::Connection(e.to_string()))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// Send one request frame and read the matching response, bounded by the
    /// configured timeout.
    async fn exchange(stream: &mut TcpStream, frame: Vec<u8>, timeout: Duration) -> Result<WireResponse, ChannelError> {
        let exchange = async {
            stream.write_all(&frame).await?;
            stream.flush().await?;

            let mut header = [0u8; HEADER_LEN];
            stream.read_exact(&mut header).await?;
            let body_len = wire::body_len(&header)?;

            let mut response = header.to_vec();
            response.resize(HEADER_LEN + body_len, 0);
            stream.read_exact(&mut response[HEADER_LEN..]).await?;

            Ok(wire::parse_response(&response)?)
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| ChannelError::Timeout(timeout.as_millis() as u64))?
    }

    async fn request(&self, frame: Vec<u8>) -> Result<WireResponse, ChannelError> {
        let authority = self.config.authority();
        let timeout = self.config.timeout();
        self.guard
            .with_connection(
                move |_attempt| Self::open(authority.clone(), timeout),
                |stream: &mut TcpStream| Self::exchange(stream, frame, timeout).boxed(),
            )
            .await
    }

    fn next_txn(&self) -> u16 {
        self.txn.fetch_add(1, Ordering::Relaxed)
    }

    fn surface<T>(&self, message: &str, e: ChannelError) -> Result<T, ChannelError> {
        self.services.report_failure(COMPONENT, message, &e);
        Err(e)
    }
}

#[async_trait]
impl ProtocolChannel for SocketChannel {
    async fn receive_samples(&self, count: usize) -> Result<Vec<Sample>, ChannelError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        if count > usize::from(u16::MAX) {
            return self.surface(
                "receive_samples failed",
                ChannelError::Transmission(format!("register read of {count} exceeds protocol limit")),
            );
        }
        let start = Instant::now();

        let frame = wire::build_read_request(self.next_txn(), count as u16);
        let response = match self.request(frame).await {
            Ok(response) => response,
            Err(e) => return self.surface("receive_samples failed", e),
        };

        match response {
            WireResponse::Registers(values) if values.len() >= count => {
                let samples = values[..count]
                    .iter()
                    .map(|&raw| Sample::from_register(raw, ProtocolKind::Socket.tag()))
                    .collect::<Vec<_>>();
                self.services.metrics.record_elapsed("socket_receive", start);
                self.services
                    .logs
                    .info(COMPONENT, &format!("read {count} registers"));
                Ok(samples)
            }
            WireResponse::Registers(values) => self.surface(
                "receive_samples failed",
                ChannelError::Transmission(format!("short register read: {} of {count}", values.len())),
            ),
            WireResponse::Exception(code) => self.surface(
                "receive_samples failed",
                ChannelError::Transmission(format!("remote exception {code:#04x}")),
            ),
            WireResponse::WriteAck { .. } => self.surface(
                "receive_samples failed",
                ChannelError::Transmission("unexpected write acknowledgement".into()),
            ),
        }
    }

    async fn send_samples(&self, samples: &[Sample]) -> Result<bool, ChannelError> {
        if samples.is_empty() {
            self.services.logs.warning(COMPONENT, "no samples to send");
            return Ok(false);
        }
        if samples.len() > wire::MAX_WRITE_REGISTERS {
            return self.surface(
                "send_samples failed",
                ChannelError::Transmission(format!(
                    "register write of {} exceeds single-frame limit of {}",
                    samples.len(),
                    wire::MAX_WRITE_REGISTERS
                )),
            );
        }
        let start = Instant::now();

        let values: Vec<u16> = samples.iter().map(Sample::to_register).collect();
        let frame = wire::build_write_request(self.next_txn(), &values);
        let response = match self.request(frame).await {
            Ok(response) => response,
            Err(e) => return self.surface("send_samples failed", e),
        };

        match response {
            WireResponse::WriteAck { quantity, .. } if usize::from(quantity) == values.len() => {
                self.services.metrics.record_elapsed("socket_send", start);
                self.services
                    .logs
                    .info(COMPONENT, &format!("wrote {} registers", values.len()));
                Ok(true)
            }
            WireResponse::WriteAck { quantity, .. } => self.surface(
                "send_samples failed",
                ChannelError::Transmission(format!("partial write: {quantity} of {}", values.len())),
            ),
            WireResponse::Exception(code) => self.surface(
                "send_samples failed",
                ChannelError::Transmission(format!("remote exception {code:#04x}")),
            ),
            WireResponse::Registers(_) => self.surface(
                "send_samples failed",
                ChannelError::Transmission("unexpected register data".into()),
            ),
        }
    }

    async fn monitor_status(&self) -> Result<bool, ChannelError> {
        let start = Instant::now();

        let frame = wire::build_read_request(self.next_txn(), 1);
        let response = match self.request(frame).await {
            Ok(response) => response,
            Err(e) => return self.surface("monitor_status failed", e),
        };
        self.services.metrics.record_elapsed("socket_status", start);

        // A clean negative probe result is an answer, not an error.
        match response {
            WireResponse::Registers(values) => Ok(!values.is_empty()),
            WireResponse::Exception(_) | WireResponse::WriteAck { .. } => Ok(false),
        }
    }

    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Socket
    }

    fn endpoint(&self) -> String {
        self.config.authority()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ErrorAggregator;
    use crate::core::guard::ConnectionState;
    use crate::core::logging::LogPipeline;
    use crate::core::metrics::PerformanceTracker;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    fn services() -> ChannelServices {
        ChannelServices::new(
            Arc::new(LogPipeline::new(Vec::new())),
            Arc::new(ErrorAggregator::new()),
            Arc::new(PerformanceTracker::new()),
        )
    }

    struct RegisterServer {
        port: u16,
        store: Arc<Mutex<Vec<u16>>>,
        connections: Arc<AtomicU32>,
    }

    /// Fake register device speaking the wire codec.
    async fn spawn_register_server(registers: Vec<u16>, fail_reads: bool) -> RegisterServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let store = Arc::new(Mutex::new(registers));
        let connections = Arc::new(AtomicU32::new(0));

        let server_store = store.clone();
        let server_connections = connections.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                server_connections.fetch_add(1, Ordering::SeqCst);
                let store = server_store.clone();
                tokio::spawn(async move {
                    loop {
                        let mut header = [0u8; HEADER_LEN];
                        if stream.read_exact(&mut header).await.is_err() {
                            return;
                        }
                        let txn = u16::from_be_bytes([header[0], header[1]]);
                        let body_len = wire::body_len(&header).unwrap();
                        let mut body = vec![0u8; body_len];
                        if stream.read_exact(&mut body).await.is_err() {
                            return;
                        }

                        let reply = match body[0] {
                            wire::FN_READ_REGISTERS if fail_reads => {
                                wire::build_exception(txn, wire::FN_READ_REGISTERS, 0x02)
                            }
                            wire::FN_READ_REGISTERS => {
                                let quantity = u16::from_be_bytes([body[3], body[4]]) as usize;
                                let store = store.lock();
                                let end = quantity.min(store.len());
                                wire::build_read_response(txn, &store[..end])
                            }
                            wire::FN_WRITE_REGISTERS => {
                                let values = wire::parse_registers(&body[6..]);
                                let quantity = values.len() as u16;
                                *store.lock() = values;
                                wire::build_write_ack(txn, quantity)
                            }
                            _ => wire::build_exception(txn, body[0], 0x01),
                        };
                        if stream.write_all(&reply).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        RegisterServer {
            port,
            store,
            connections,
        }
    }

    fn channel(port: u16) -> SocketChannel {
        let config = ChannelConfig::new("127.0.0.1", port)
            .with_timeout_ms(2000)
            .with_retries(2, 1);
        SocketChannel::new(config, services())
    }

    #[tokio::test]
    async fn test_receive_maps_registers() {
        let server = spawn_register_server(vec![450, 612, 80], false).await;
        let channel = channel(server.port);

        let samples = channel.receive_samples(3).await.unwrap();
        assert_eq!(samples.len(), 3);
        assert!((samples[0].frequency - 45.0).abs() < f64::EPSILON);
        assert!((samples[0].power - 900.0).abs() < f64::EPSILON);
        assert!((samples[1].frequency - 61.2).abs() < f64::EPSILON);
        assert!((samples[2].power - 160.0).abs() < f64::EPSILON);
        assert!(samples.iter().all(|s| s.protocol_type == "modbus"));
    }

    #[tokio::test]
    async fn test_send_writes_scaled_registers() {
        let server = spawn_register_server(Vec::new(), false).await;
        let channel = channel(server.port);

        let mut samples = vec![
            Sample::new(45.0, 0.0, "modbus"),
            Sample::new(61.27, 0.0, "modbus"),
        ];
        samples[1].coil_status = true;

        assert!(channel.send_samples(&samples).await.unwrap());
        assert_eq!(*server.store.lock(), vec![450, 612]);
    }

    #[tokio::test]
    async fn test_oversized_send_is_rejected_locally() {
        let server = spawn_register_server(Vec::new(), false).await;
        let channel = channel(server.port);

        // 128 registers would wrap the one-byte byte-count field to 0.
        let samples: Vec<Sample> = (0..128).map(|i| Sample::new(f64::from(i), 0.0, "modbus")).collect();
        let result = channel.send_samples(&samples).await;
        assert!(matches!(result, Err(ChannelError::Transmission(_))));

        // Rejected before any frame is built or sent.
        assert_eq!(server.connections.load(Ordering::SeqCst), 0);

        // A batch at the limit still goes through.
        let samples: Vec<Sample> = (0..wire::MAX_WRITE_REGISTERS)
            .map(|i| Sample::new(i as f64, 0.0, "modbus"))
            .collect();
        assert!(channel.send_samples(&samples).await.unwrap());
        assert_eq!(server.store.lock().len(), wire::MAX_WRITE_REGISTERS);
    }

    #[tokio::test]
    async fn test_empty_send_skips_transport() {
        let server = spawn_register_server(Vec::new(), false).await;
        let channel = channel(server.port);

        assert!(!channel.send_samples(&[]).await.unwrap());
        assert_eq!(server.connections.load(Ordering::SeqCst), 0);
        assert_eq!(channel.guard.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connection_is_reused() {
        let server = spawn_register_server(vec![100, 200, 300, 400], false).await;
        let channel = channel(server.port);

        channel.receive_samples(2).await.unwrap();
        channel.receive_samples(4).await.unwrap();
        assert!(channel.monitor_status().await.unwrap());

        assert_eq!(server.connections.load(Ordering::SeqCst), 1);
        assert_eq!(channel.guard.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_probe_negative_is_false_not_error() {
        let server = spawn_register_server(vec![1], true).await;
        let channel = channel(server.port);

        assert!(!channel.monitor_status().await.unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_surfaces_connection_error() {
        // Nothing listens here.
        let channel = channel(1);

        let result = channel.receive_samples(1).await;
        assert!(matches!(result, Err(ChannelError::Connection(_))));
        assert_eq!(channel.guard.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_short_read_is_transmission_error() {
        let server = spawn_register_server(vec![450], false).await;
        let channel = channel(server.port);

        let result = channel.receive_samples(5).await;
        assert!(matches!(result, Err(ChannelError::Transmission(_))));
    }
}
