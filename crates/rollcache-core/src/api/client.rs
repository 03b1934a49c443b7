//! HTTP gateway for a JSON attendance service.
//!
//! Endpoints, relative to the configured base URL:
//!
//! - `GET    /attendance`           → array of rows
//! - `POST   /attendance`           → created row
//! - `DELETE /attendance/{id}`
//! - `PATCH  /attendance/{id}`      with `{"status": ...}`
//! - `POST   /attendance/time_out`  with `{"ids": [...], "time_out": ...}`

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use super::{AttendanceGateway, GatewayError, NewAttendance};
use crate::models::{AttendanceStatus, RawRow};

// ============================================================================
// Constants
// ============================================================================

/// Default HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

const ATTENDANCE_PATH: &str = "attendance";

/// Gateway speaking JSON over HTTP.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: Url,
}

impl HttpGateway {
    pub fn new(base_url: &str) -> Result<Self, GatewayError> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let base_url = Self::parse_base_url(base_url)?;
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self { client, base_url })
    }

    /// Base URLs must be http(s). A trailing slash is added so that
    /// relative joins keep any path prefix.
    fn parse_base_url(raw: &str) -> Result<Url, GatewayError> {
        let trimmed = raw.trim();
        let with_slash = if trimmed.ends_with('/') {
            trimmed.to_string()
        } else {
            format!("{}/", trimmed)
        };
        let url = Url::parse(&with_slash)
            .map_err(|e| GatewayError::InvalidUrl(format!("{}: {}", trimmed, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(GatewayError::InvalidUrl(format!(
                "unsupported scheme '{}' in {}",
                other, trimmed
            ))),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        self.base_url
            .join(path)
            .map_err(|e| GatewayError::InvalidUrl(format!("{}: {}", path, e)))
    }

    fn with_headers(request: RequestBuilder) -> RequestBuilder {
        request.header(header::ACCEPT, "application/json")
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(response: Response) -> Result<Option<Response>, GatewayError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(GatewayError::from_status(status, &body))
        }
    }

    /// Send a request, backing off and retrying while the server rate-limits.
    async fn send<F>(&self, url: &Url, build: F) -> Result<Response, GatewayError>
    where
        F: Fn(&Client, Url) -> RequestBuilder,
    {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = Self::with_headers(build(&self.client, url.clone()))
                .send()
                .await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(GatewayError::RateLimited);
                    }
                    warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }

    async fn read_json<T: DeserializeOwned>(response: Response, url: &Url) -> Result<T, GatewayError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            GatewayError::InvalidResponse(format!("Failed to parse JSON from {}: {}", url, e))
        })
    }
}

#[async_trait]
impl AttendanceGateway for HttpGateway {
    async fn fetch_all(&self) -> Result<Vec<RawRow>, GatewayError> {
        let url = self.endpoint(ATTENDANCE_PATH)?;
        let response = self.send(&url, |c, u| c.get(u)).await?;
        let rows: Vec<RawRow> = Self::read_json(response, &url).await?;
        debug!(count = rows.len(), "Fetched attendance rows");
        Ok(rows)
    }

    async fn create(&self, entry: &NewAttendance) -> Result<RawRow, GatewayError> {
        let url = self.endpoint(ATTENDANCE_PATH)?;
        let response = self.send(&url, |c, u| c.post(u).json(entry)).await?;
        Self::read_json(response, &url).await
    }

    async fn delete(&self, id: i64) -> Result<(), GatewayError> {
        let url = self.endpoint(&format!("{}/{}", ATTENDANCE_PATH, id))?;
        self.send(&url, |c, u| c.delete(u)).await?;
        Ok(())
    }

    async fn update_status(&self, id: i64, status: AttendanceStatus) -> Result<(), GatewayError> {
        let url = self.endpoint(&format!("{}/{}", ATTENDANCE_PATH, id))?;
        let body = json!({ "status": status });
        self.send(&url, |c, u| c.patch(u).json(&body)).await?;
        Ok(())
    }

    async fn set_time_out(&self, ids: &[i64], time_out: DateTime<Utc>) -> Result<(), GatewayError> {
        let url = self.endpoint(&format!("{}/time_out", ATTENDANCE_PATH))?;
        let body = json!({ "ids": ids, "time_out": time_out.to_rfc3339() });
        self.send(&url, |c, u| c.post(u).json(&body)).await?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
