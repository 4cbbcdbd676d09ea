//! HTTP ride recorder.
//!
//! POSTs the finished ride as JSON to the ride records endpoint with:
//! - Bearer token authentication
//! - Automatic retry with exponential backoff on 429
//! - Short retry on transport errors

use std::time::Duration;

use log::{debug, info, warn};
use reqwest::{Client, StatusCode};

use crate::config::RecorderConfig;
use crate::error::{RideError, Result};
use crate::submission::{RideRecorder, RideSubmission};

/// Exponential backoff for the n-th consecutive 429: 1s, 2s, 4s, 8s, 16s max.
fn rate_limit_backoff(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(4);
    Duration::from_millis(1000 * (1 << exp))
}

/// Backoff after a transport error: 1s, 2s, 4s...
fn transport_backoff(attempt: u32) -> Duration {
    Duration::from_millis(500 * (1 << attempt.min(4)))
}

/// Submits rides to a REST endpoint.
pub struct HttpRideRecorder {
    client: Client,
    config: RecorderConfig,
}

impl HttpRideRecorder {
    pub fn new(config: RecorderConfig) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(RideError::Config {
                message: "endpoint is required".to_string(),
            });
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RideError::Http {
                message: format!("Failed to create HTTP client: {}", e),
                status_code: None,
            })?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    async fn post_with_retry(&self, ride: &RideSubmission) -> Result<()> {
        let mut rate_limited = 0;
        let mut transport_errors = 0;

        loop {
            let mut request = self.client.post(&self.config.endpoint).json(ride);
            if let Some(token) = &self.config.auth_token {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        rate_limited += 1;
                        if rate_limited > self.config.max_retries {
                            return Err(RideError::Http {
                                message: "Max retries exceeded (429)".to_string(),
                                status_code: Some(429),
                            });
                        }
                        let backoff = rate_limit_backoff(rate_limited);
                        warn!(
                            "[RideRecorder] 429, retry {} after {:?}",
                            rate_limited, backoff
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    if !status.is_success() {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(RideError::Http {
                            message: if body.is_empty() {
                                status.to_string()
                            } else {
                                body
                            },
                            status_code: Some(status.as_u16()),
                        });
                    }

                    debug!("[RideRecorder] Endpoint answered {}", status);
                    return Ok(());
                }
                Err(e) => {
                    transport_errors += 1;
                    if transport_errors > self.config.max_retries {
                        return Err(RideError::Http {
                            message: format!("Request error: {}", e),
                            status_code: None,
                        });
                    }
                    let backoff = transport_backoff(transport_errors);
                    warn!(
                        "[RideRecorder] Error: {}, retry {} after {:?}",
                        e, transport_errors, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

impl RideRecorder for HttpRideRecorder {
    async fn record_ride(&self, ride: &RideSubmission) -> Result<()> {
        self.post_with_retry(ride).await?;
        info!("[RideRecorder] Ride recorded at {}", self.config.endpoint);
        Ok(())
    }
}

/// Synchronous wrapper for FFI - runs the submission on a tokio runtime
#[cfg(feature = "ffi")]
pub fn record_ride_sync(config: RecorderConfig, ride: &RideSubmission) -> Result<()> {
    use tokio::runtime::Runtime;

    let rt = Runtime::new().map_err(|e| RideError::Internal {
        message: format!("Runtime error: {}", e),
    })?;
    let recorder = HttpRideRecorder::new(config)?;
    rt.block_on(recorder.record_ride(ride))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_backoff() {
        assert_eq!(rate_limit_backoff(1), Duration::from_secs(1));
        assert_eq!(rate_limit_backoff(2), Duration::from_secs(2));
        assert_eq!(rate_limit_backoff(3), Duration::from_secs(4));
        assert_eq!(rate_limit_backoff(10), Duration::from_secs(16));
    }

    #[test]
    fn test_transport_backoff() {
        assert_eq!(transport_backoff(1), Duration::from_secs(1));
        assert_eq!(transport_backoff(2), Duration::from_secs(2));
    }

    #[test]
    fn test_requires_endpoint() {
        assert!(matches!(
            HttpRideRecorder::new(RecorderConfig::default()),
            Err(RideError::Config { .. })
        ));
        let recorder = HttpRideRecorder::new(RecorderConfig {
            endpoint: "https://api.example.com/rides".to_string(),
            ..RecorderConfig::default()
        })
        .unwrap();
        assert_eq!(recorder.config().max_retries, 3);
    }
}
