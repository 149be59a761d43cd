//! HTTP Ticker Source
//!
//! [`TickerSource`] adapter that fetches the ticker list from the polling
//! endpoint with `reqwest`.

use std::time::Duration;

use async_trait::async_trait;

use crate::application::ports::{FetchError, TickerSource};
use crate::domain::ticker::Ticker;
use crate::infrastructure::feed::codec::TickerCodec;

/// Polling endpoint client.
#[derive(Debug, Clone)]
pub struct HttpTickerSource {
    client: reqwest::Client,
    url: String,
    codec: TickerCodec,
}

impl HttpTickerSource {
    /// Create a client for `url` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Network`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
            codec: TickerCodec::new(),
        })
    }

    /// Endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TickerSource for HttpTickerSource {
    async fn fetch(&self) -> Result<Vec<Ticker>, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        self.codec
            .decode_snapshot(&body)
            .map_err(|e| FetchError::InvalidBody(e.to_string()))
    }
}
