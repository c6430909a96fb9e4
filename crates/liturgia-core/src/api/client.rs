//! API client for the daily liturgy service.
//!
//! This module provides the `LiturgyClient` struct for fetching the liturgy of
//! a single calendar date, and the `LiturgyProvider` trait the cache depends on.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use reqwest::{header, Client};
use tracing::{debug, warn};

use crate::models::LiturgyDocument;

use super::FetchError;

// ============================================================================
// Constants
// ============================================================================

/// Public liturgy API
pub const DEFAULT_BASE_URL: &str = "https://liturgia.up.railway.app";

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Source of liturgy documents, one calendar date at a time.
///
/// `Ok(None)` means the source answered but had nothing for that date;
/// `Err` means it could not be reached or answered garbage.
#[async_trait]
pub trait LiturgyProvider: Send + Sync {
    async fn fetch(&self, date: NaiveDate) -> Result<Option<LiturgyDocument>, FetchError>;
}

/// HTTP client for the liturgy API.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct LiturgyClient {
    client: Client,
    base_url: String,
    initial_backoff: Duration,
}

impl LiturgyClient {
    /// Create a client for the public API with the default timeout
    pub fn new() -> Result<Self> {
        Self::with_config(DEFAULT_BASE_URL, Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn with_config(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Request URL for a date. The service expects an unpadded day and a
    /// zero-padded month.
    pub fn request_url(&self, date: NaiveDate) -> String {
        format!(
            "{}/?dia={}&mes={:02}&ano={}",
            self.base_url,
            date.day(),
            date.month(),
            date.year()
        )
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, FetchError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(FetchError::from_status(status, &body))
        }
    }

    async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let response = self
                .client
                .get(url)
                .header(header::ACCEPT, "application/json")
                .send()
                .await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Ok(response.text().await?),
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(FetchError::RateLimited);
                    }
                    warn!(
                        url = url,
                        retry = retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }
}

#[async_trait]
impl LiturgyProvider for LiturgyClient {
    async fn fetch(&self, date: NaiveDate) -> Result<Option<LiturgyDocument>, FetchError> {
        let url = self.request_url(date);
        debug!(url = %url, "Fetching liturgy");

        let body = self.get_text(&url).await?;
        let doc = LiturgyDocument::from_json(&body)
            .map_err(|e| FetchError::InvalidResponse(format!("{} from {}", e, url)))?;

        if doc.is_empty() {
            debug!(%date, "Liturgy API returned an empty document");
            return Ok(None);
        }
        Ok(Some(doc))
    }
}
