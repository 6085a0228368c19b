//! Stateless request/response channel over HTTP
//!
//! Every call is an independent exchange; there is no persistent handle to
//! guard. Transient failures (timeouts, connect errors, 5xx responses) are
//! retried with exponential backoff; explicit rejections surface immediately.

use super::{ChannelError, ChannelServices, ProtocolChannel, ProtocolKind};
use crate::config::ChannelConfig;
use crate::core::guard::RetryPolicy;
use crate::core::sample::Sample;
use async_trait::async_trait;
use std::time::Instant;

const COMPONENT: &str = "http-channel";

/// HTTP channel against the `{base}/signals/*` endpoints.
pub struct RequestResponseChannel {
    base_url: String,
    client: reqwest::Client,
    policy: RetryPolicy,
    timeout_ms: u64,
    services: ChannelServices,
}

impl RequestResponseChannel {
    /// Build the channel. Fails only if the HTTP client cannot be
    /// constructed from the configuration.
    pub fn new(config: ChannelConfig, services: ChannelServices) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ChannelError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: format!("http://{}{}", config.authority(), config.path),
            client,
            policy: config.retry_policy(),
            timeout_ms: config.timeout_ms,
            services,
        })
    }

    fn classify(&self, e: reqwest::Error) -> ChannelError {
        if e.is_timeout() {
            ChannelError::Timeout(self.timeout_ms)
        } else if e.is_connect() {
            ChannelError::Connection(e.to_string())
        } else {
            ChannelError::Transmission(e.to_string())
        }
    }

    fn check_status(status: reqwest::StatusCode) -> Result<(), ChannelError> {
        if status.is_server_error() {
            Err(ChannelError::ServerError(status.as_u16()))
        } else if status.is_client_error() {
            Err(ChannelError::Rejected(status.as_u16()))
        } else {
            Ok(())
        }
    }

    fn surface<T>(&self, message: &str, e: ChannelError) -> Result<T, ChannelError> {
        self.services.report_failure(COMPONENT, message, &e);
        Err(e)
    }
}

#[async_trait]
impl ProtocolChannel for RequestResponseChannel {
    async fn receive_samples(&self, count: usize) -> Result<Vec<Sample>, ChannelError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let url = format!("{}/signals/get?count={count}", self.base_url);

        let result = self
            .policy
            .run(|_attempt| async {
                let response = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| self.classify(e))?;
                Self::check_status(response.status())?;
                response
                    .json::<Vec<Sample>>()
                    .await
                    .map_err(|e| ChannelError::Transmission(format!("decode samples: {e}")))
            })
            .await;

        match result {
            Ok(samples) => {
                self.services.metrics.record_elapsed("http_receive", start);
                self.services
                    .logs
                    .info(COMPONENT, &format!("received {} samples", samples.len()));
                Ok(samples)
            }
            Err(e) => self.surface("receive_samples failed", e),
        }
    }

    async fn send_samples(&self, samples: &[Sample]) -> Result<bool, ChannelError> {
        if samples.is_empty() {
            self.services.logs.warning(COMPONENT, "no samples to send");
            return Ok(false);
        }
        let start = Instant::now();
        let url = format!("{}/signals/post", self.base_url);

        let result = self
            .policy
            .run(|_attempt| async {
                let response = self
                    .client
                    .post(&url)
                    .json(samples)
                    .send()
                    .await
                    .map_err(|e| self.classify(e))?;
                Self::check_status(response.status())
            })
            .await;

        match result {
            Ok(()) => {
                self.services.metrics.record_elapsed("http_send", start);
                self.services
                    .logs
                    .info(COMPONENT, &format!("sent {} samples", samples.len()));
                Ok(true)
            }
            Err(e) => self.surface("send_samples failed", e),
        }
    }

    async fn monitor_status(&self) -> Result<bool, ChannelError> {
        let start = Instant::now();
        let url = format!("{}/signals/status", self.base_url);

        let result = self
            .policy
            .run(|_attempt| async {
                let response = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| self.classify(e))?;
                Self::check_status(response.status())?;
                response
                    .json::<bool>()
                    .await
                    .map_err(|e| ChannelError::Transmission(format!("decode status: {e}")))
            })
            .await;

        match result {
            Ok(status) => {
                self.services.metrics.record_elapsed("http_status", start);
                Ok(status)
            }
            Err(e) => self.surface("monitor_status failed", e),
        }
    }

    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::RequestResponse
    }

    fn endpoint(&self) -> String {
        self.base_url.clone()
    }
}
