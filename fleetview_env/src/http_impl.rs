//! Production polling backend over HTTP.

use crate::backend::StatusPoller;
use crate::error::EnvError;
use crate::types::Endpoint;
use async_trait::async_trait;
use std::time::Duration;

/// Issues `GET` requests against the status and zone endpoints.
#[derive(Debug, Clone)]
pub struct HttpPoller {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpPoller {
    /// Creates a poller whose requests are bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, EnvError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EnvError::connect(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    async fn get_text(&self, url: &str) -> Result<String, EnvError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                EnvError::timeout(self.timeout)
            } else {
                EnvError::connect(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EnvError::HttpStatus(status.as_u16()));
        }

        response
            .text()
            .await
            .map_err(|e| EnvError::protocol(e.to_string()))
    }
}

#[async_trait]
impl StatusPoller for HttpPoller {
    async fn fetch_status(&self, endpoint: &Endpoint) -> Result<String, EnvError> {
        self.get_text(&endpoint.status_url).await
    }

    async fn fetch_zones(&self, endpoint: &Endpoint) -> Result<String, EnvError> {
        self.get_text(&endpoint.zones_url).await
    }
}
