//! HTTP implementation of the byte-fetch seam: bounded retries with
//! exponential backoff, a per-request timeout, and cooperative cancellation
//! racing the request token against network I/O.

use crate::content::descriptor::ResourceHandle;
use crate::runtime::config::LoaderConfig;
use crate::transport::client::{ContentClient, FetchError};
use crate::transport::request::ContentRequest;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_ATTEMPTS: usize = 3;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 250;
const DEFAULT_MAX_BACKOFF_MS: u64 = 2_000;

#[derive(Debug, Clone)]
pub struct HttpClientOptions {
    pub request_timeout: Duration,
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for HttpClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
        }
    }
}

impl HttpClientOptions {
    fn validate(&self) -> Result<()> {
        use anyhow::bail;

        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }
        if self.max_attempts == 0 {
            bail!("max_attempts must be greater than 0");
        }
        if self.initial_backoff.is_zero() {
            bail!("initial_backoff must be greater than 0");
        }
        if self.max_backoff < self.initial_backoff {
            bail!("max_backoff must not be smaller than initial_backoff");
        }
        Ok(())
    }
}

/// Default transport: fetches raw payload bytes over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpContentClient {
    http: reqwest::Client,
    options: HttpClientOptions,
}

impl HttpContentClient {
    pub fn new() -> Result<Self> {
        Self::with_options(HttpClientOptions::default())
    }

    pub fn with_options(options: HttpClientOptions) -> Result<Self> {
        options.validate()?;
        let http = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, options })
    }

    pub fn from_config(config: &LoaderConfig) -> Result<Self> {
        Self::with_options(HttpClientOptions {
            request_timeout: config.request_timeout(),
            max_attempts: config.max_attempts(),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
        })
    }
}

impl ContentClient for HttpContentClient {
    fn fetch(
        &self,
        resource: ResourceHandle,
        request: Arc<ContentRequest>,
    ) -> BoxFuture<'static, Result<Vec<u8>, FetchError>> {
        let http = self.http.clone();
        let options = self.options.clone();
        Box::pin(async move {
            let mut resource = resource;
            let url = resource.url().to_string();
            request.mark_active();

            let mut attempt = 0usize;
            loop {
                attempt += 1;

                let response = tokio::select! {
                    _ = request.cancelled() => return Err(FetchError::Cancelled),
                    response = http.get(url.as_str()).send() => response,
                };

                let error = match response {
                    Ok(response) => {
                        let status = response.status();
                        if status.is_success() {
                            let body = tokio::select! {
                                _ = request.cancelled() => return Err(FetchError::Cancelled),
                                body = response.bytes() => body,
                            };
                            match body {
                                Ok(bytes) => {
                                    request.mark_done();
                                    tracing::debug!(
                                        url = %url,
                                        bytes = bytes.len(),
                                        attempt,
                                        "content payload fetched"
                                    );
                                    return Ok(bytes.to_vec());
                                }
                                Err(err) => FetchError::Transport {
                                    url: url.clone(),
                                    message: err.to_string(),
                                },
                            }
                        } else if retryable_status(status) {
                            FetchError::Status {
                                url: url.clone(),
                                status: status.as_u16(),
                            }
                        } else {
                            request.mark_failed();
                            return Err(FetchError::Status {
                                url,
                                status: status.as_u16(),
                            });
                        }
                    }
                    Err(err) if err.is_timeout() => FetchError::Timeout { url: url.clone() },
                    Err(err) => FetchError::Transport {
                        url: url.clone(),
                        message: err.to_string(),
                    },
                };

                if attempt >= options.max_attempts {
                    request.mark_failed();
                    tracing::warn!(url = %url, attempt, error = %error, "content fetch exhausted retries");
                    return Err(error);
                }

                resource.note_retry();
                let backoff = backoff_delay(&options, attempt);
                tracing::warn!(
                    url = %url,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %error,
                    "content fetch failed; retrying"
                );
                tokio::select! {
                    _ = request.cancelled() => return Err(FetchError::Cancelled),
                    _ = sleep(backoff) => {}
                }
            }
        })
    }
}

fn retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

fn backoff_delay(options: &HttpClientOptions, attempt: usize) -> Duration {
    if attempt <= 1 {
        return options.initial_backoff;
    }

    let exponent = attempt.saturating_sub(1).min(16) as u32;
    let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
    let mut delay = options.initial_backoff.saturating_mul(multiplier);

    if delay > options.max_backoff {
        delay = options.max_backoff;
    }

    delay
}
